//! Command handlers for the CLI.
//!
//! Each handler drives the shared [`OrderService`] and prints its report as
//! pretty JSON on stdout. Logs go to stderr so the output can be piped.

use std::sync::Arc;

use sellerdesk_core::AppConfig;
use sellerdesk_orders::{JobStream, ListOrdersQuery, OrderService, RequestKind, SendReviewRequest};
use sellerdesk_spapi::SpApiClient;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub(crate) type Service = OrderService<SpApiClient>;

pub(crate) async fn build_service(config: &AppConfig) -> anyhow::Result<Arc<Service>> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", config.data_dir.display()))?;
    Ok(Arc::new(OrderService::from_config(config)?))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancels `token` on ctrl-c so long runs stop between upstream calls.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            token.cancel();
        }
    });
}

/// Fetches a listing. With background enrichment enabled, waits for the
/// enrichment job before exiting so its results reach the store.
pub(crate) async fn run_fetch(
    service: &Service,
    query: &ListOrdersQuery,
) -> anyhow::Result<()> {
    let listing = service.list_orders(query).await?;
    if let Some(partial) = &listing.partial_error {
        eprintln!(
            "warning: partial listing ({} orders): {partial}",
            listing.collection.total_count
        );
    }
    print_json(&listing)?;

    if listing.enrichment_job.is_some() {
        if let Some(handle) = service.job_handle(JobStream::Enrich).await {
            let done = handle.wait().await;
            tracing::info!(
                state = ?done.state,
                processed = done.processed,
                total = done.total,
                "background enrichment finished"
            );
        }
    }
    Ok(())
}

pub(crate) async fn run_sync(service: &Service) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);
    let report = service.sync(&cancel, None).await?;
    print_json(&report)
}

pub(crate) async fn run_prune(service: &Service) -> anyhow::Result<()> {
    let outcome = service.prune().await?;
    print_json(&outcome)
}

pub(crate) async fn run_eligible(service: &Service) -> anyhow::Result<()> {
    let orders = service.eligible_orders().await?;
    if orders.is_empty() {
        eprintln!("no orders are currently eligible for a review request");
    }
    print_json(&orders)
}

pub(crate) async fn run_check(service: &Service, order_ids: &[String]) -> anyhow::Result<()> {
    let report = service.check_eligibility(order_ids).await?;
    for id in &report.not_found {
        eprintln!("warning: order {id} is not in the local store");
    }
    print_json(&report)
}

pub(crate) async fn run_send(
    service: &Service,
    order_ids: Vec<String>,
    batch: bool,
    template: Option<String>,
) -> anyhow::Result<()> {
    let request = send_request(order_ids, batch, template);
    let outcome = service.send_review_requests(&request).await?;
    print_json(&outcome)
}

pub(crate) fn send_request(
    order_ids: Vec<String>,
    batch: bool,
    template: Option<String>,
) -> SendReviewRequest {
    SendReviewRequest {
        order_ids,
        kind: if batch {
            RequestKind::Batch
        } else {
            RequestKind::Single
        },
        template,
    }
}
