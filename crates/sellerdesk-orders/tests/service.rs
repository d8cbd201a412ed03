//! `OrderService` flows against the fake upstream and a temporary data dir.

mod common;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{page, raw_order, raw_orders, FakeApi, Fail};
use futures::future::BoxFuture;
use sellerdesk_core::{ReviewRequestStatus, SolicitationReason};
use sellerdesk_orders::review::{BatchStatus, DispatchChannel};
use sellerdesk_orders::{
    EmailMessage, EmailSink, JobState, JobStream, ListOrdersQuery, OrderService, OrdersError,
    RequestKind, SendOutcome, SendReviewRequest, ServiceSettings, TracingEmailSink,
};
use sellerdesk_orders::service::ListingSource;
use sellerdesk_spapi::RawOrder;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<EmailMessage>>,
}

impl EmailSink for RecordingSink {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), String>> {
        self.sent.lock().unwrap().push(message.clone());
        Box::pin(async { Ok(()) })
    }
}

fn settings(dir: &Path) -> ServiceSettings {
    let mut settings = ServiceSettings::new(dir);
    settings.enrich.group_pause = Duration::ZERO;
    settings.job_grace = Duration::ZERO;
    settings
}

fn service(api: &Arc<FakeApi>, dir: &Path) -> OrderService<FakeApi> {
    OrderService::new(Arc::clone(api), settings(dir), Arc::new(TracingEmailSink))
}

fn send(ids: &[&str], kind: RequestKind) -> SendReviewRequest {
    SendReviewRequest {
        order_ids: ids.iter().map(ToString::to_string).collect(),
        kind,
        template: None,
    }
}

fn canceled_order(id: &str) -> RawOrder {
    RawOrder {
        order_status: Some("Canceled".to_string()),
        ..raw_order(id, 7)
    }
}

async fn seed(service: &OrderService<FakeApi>) {
    service
        .list_orders(&ListOrdersQuery {
            refresh: true,
            ..ListOrdersQuery::default()
        })
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn listing_is_served_from_cache_after_the_first_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 3), None));
    let service = service(&api, dir.path());

    let first = service.list_orders(&ListOrdersQuery::default()).await.unwrap();
    assert_eq!(first.source, ListingSource::Upstream);
    assert_eq!(first.collection.total_count, 3);
    assert!(first.collection.orders.iter().all(|o| o.has_resolved_items()));

    let second = service.list_orders(&ListOrdersQuery::default()).await.unwrap();
    assert_eq!(second.source, ListingSource::Cache);
    assert_eq!(second.collection.orders, first.collection.orders);
    assert_eq!(FakeApi::count(&api.orders_calls), 1);

    let refreshed = service
        .list_orders(&ListOrdersQuery {
            refresh: true,
            ..ListOrdersQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(refreshed.source, ListingSource::Upstream);
    assert_eq!(FakeApi::count(&api.orders_calls), 2);
}

#[tokio::test]
async fn invalid_listing_query_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    let service = service(&api, dir.path());

    let err = service
        .list_orders(&ListOrdersQuery {
            max_results: Some(0),
            ..ListOrdersQuery::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrdersError::Validation(_)));
    assert_eq!(FakeApi::count(&api.orders_calls), 0);
}

#[tokio::test]
async fn background_enrichment_returns_parsed_orders_then_fills_them_in() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 4), None));
    let mut settings = settings(dir.path());
    settings.background_enrichment = true;
    let service = OrderService::new(Arc::clone(&api), settings, Arc::new(TracingEmailSink));

    let listing = service.list_orders(&ListOrdersQuery::default()).await.unwrap();
    assert!(listing.collection.orders.iter().all(|o| o.needs_enrichment()));
    assert!(listing.enrichment_job.is_some());

    let handle = service.job_handle(JobStream::Enrich).await.unwrap();
    let last = handle.wait().await;
    assert_eq!(last.state, JobState::Completed);
    assert_eq!(last.processed, 4);

    let stored = service.store().load().await.unwrap();
    assert!(stored.orders.iter().all(|o| o.has_resolved_items()));

    let cached = service.list_orders(&ListOrdersQuery::default()).await.unwrap();
    assert_eq!(cached.source, ListingSource::Cache);
    assert!(cached.collection.orders.iter().all(|o| o.has_resolved_items()));
}

#[tokio::test]
async fn limited_listing_does_not_advance_the_sync_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 2), Some("more")));
    api.push_page(page(Vec::new(), None));
    let service = service(&api, dir.path());

    let started = Utc::now();
    let listing = service
        .list_orders(&ListOrdersQuery {
            max_results: Some(1),
            ..ListOrdersQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(listing.collection.total_count, 1);
    assert_eq!(listing.collection.next_token.as_deref(), Some("more"));
    assert!(service.store().load().await.unwrap().data_fetched_at.is_none());

    service.sync(&CancellationToken::new(), None).await.unwrap();
    let queries = api.queries();
    assert_eq!(queries.len(), 2);
    assert!(queries[1].created_after.unwrap() <= started - ChronoDuration::days(29));
}

#[tokio::test]
async fn windowed_listing_does_not_advance_the_sync_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 2), None));
    let service = service(&api, dir.path());

    service
        .list_orders(&ListOrdersQuery {
            created_after: Some(Utc::now() - ChronoDuration::days(3)),
            ..ListOrdersQuery::default()
        })
        .await
        .unwrap();
    assert!(service.store().load().await.unwrap().data_fetched_at.is_none());
}

#[tokio::test]
async fn full_default_listing_advances_the_sync_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 2), None));
    let service = service(&api, dir.path());

    let started = Utc::now();
    service.list_orders(&ListOrdersQuery::default()).await.unwrap();
    let fetched_at = service.store().load().await.unwrap().data_fetched_at.unwrap();
    assert!(fetched_at >= started);
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_send_marks_the_order_and_survives_a_refetch() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    let raw = raw_orders("ord", 1);
    let id = raw[0].amazon_order_id.clone();
    api.push_page(page(raw.clone(), None));
    let service = service(&api, dir.path());
    seed(&service).await;

    let SendOutcome::Single(result) = service
        .send_review_requests(&send(&[&id], RequestKind::Single))
        .await
        .unwrap()
    else {
        panic!("expected a single result");
    };
    assert_eq!(result.status, ReviewRequestStatus::Sent);
    assert_eq!(result.channel, DispatchChannel::Solicitation);
    assert_eq!(api.created(), vec![id.clone()]);

    // The upstream knows nothing about local review state; a refetch must
    // not clear it.
    api.push_page(page(raw, None));
    let listing = service
        .list_orders(&ListOrdersQuery {
            refresh: true,
            ..ListOrdersQuery::default()
        })
        .await
        .unwrap();
    let order = &listing.collection.orders[0];
    assert!(order.review.request_sent);
    assert_eq!(
        order.review.solicitation_reason_code,
        Some(SolicitationReason::AlreadyRequested)
    );

    let SendOutcome::Single(again) = service
        .send_review_requests(&send(&[&id], RequestKind::Single))
        .await
        .unwrap()
    else {
        panic!("expected a single result");
    };
    assert_eq!(again.status, ReviewRequestStatus::Failed);
    assert_eq!(api.created().len(), 1);
}

#[tokio::test]
async fn malformed_send_requests_are_rejected_before_any_call() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 2), None));
    let service = service(&api, dir.path());
    seed(&service).await;

    let empty = service
        .send_review_requests(&send(&[], RequestKind::Batch))
        .await
        .unwrap_err();
    assert!(matches!(empty, OrdersError::Validation(_)));

    let two_for_single = service
        .send_review_requests(&send(&["ord-0000", "ord-0001"], RequestKind::Single))
        .await
        .unwrap_err();
    assert!(matches!(two_for_single, OrdersError::Validation(_)));

    let unknown = service
        .send_review_requests(&send(&["ord-0000", "nope"], RequestKind::Batch))
        .await
        .unwrap_err();
    assert!(matches!(unknown, OrdersError::UnknownOrders(ref ids) if ids == &["nope".to_string()]));

    assert!(api.created().is_empty());
}

#[tokio::test]
async fn batch_is_sequential_and_reports_partial_failure() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 3), None));
    api.fail_create("ord-0001", Fail::Status(500));
    let service = service(&api, dir.path());
    seed(&service).await;

    let SendOutcome::Batch(batch) = service
        .send_review_requests(&send(&["ord-0002", "ord-0001", "ord-0000"], RequestKind::Batch))
        .await
        .unwrap()
    else {
        panic!("expected a batch result");
    };
    assert_eq!((batch.total, batch.sent, batch.failed), (3, 2, 1));
    assert_eq!(batch.status, BatchStatus::Partial);
    assert_eq!(api.created(), vec!["ord-0002", "ord-0000"]);

    let (stored, _) = service
        .store()
        .find(&["ord-0001".to_string(), "ord-0002".to_string()])
        .await
        .unwrap();
    assert_eq!(stored[0].review.status, Some(ReviewRequestStatus::Failed));
    assert!(!stored[0].review.request_sent);
    assert!(stored[1].review.request_sent);
}

#[tokio::test]
async fn batch_auth_failure_keeps_orders_already_sent() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 3), None));
    api.fail_create("ord-0001", Fail::Auth);
    let service = service(&api, dir.path());
    seed(&service).await;

    let err = service
        .send_review_requests(&send(&["ord-0000", "ord-0001", "ord-0002"], RequestKind::Batch))
        .await
        .unwrap_err();
    assert!(err.is_upstream_auth());
    assert_eq!(api.created(), vec!["ord-0000"]);

    let (stored, _) = service
        .store()
        .find(&["ord-0000".to_string(), "ord-0002".to_string()])
        .await
        .unwrap();
    assert!(stored[0].review.request_sent);
    assert!(!stored[1].review.request_sent);
}

#[tokio::test]
async fn custom_template_goes_to_the_email_sink() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 1), None));
    let sink = Arc::new(RecordingSink::default());
    let service = OrderService::new(Arc::clone(&api), settings(dir.path()), sink.clone());
    seed(&service).await;

    let request = SendReviewRequest {
        template: Some("{{buyer_name}}様 注文{{order_id}}".to_string()),
        ..send(&["ord-0000"], RequestKind::Single)
    };
    let SendOutcome::Single(result) = service.send_review_requests(&request).await.unwrap() else {
        panic!("expected a single result");
    };
    assert_eq!(result.status, ReviewRequestStatus::Sent);
    assert_eq!(result.channel, DispatchChannel::Email);
    assert!(api.created().is_empty());

    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ord-0000@marketplace.amazon.co.jp");
    assert_eq!(sent[0].body, "山田 太郎様 注文ord-0000");
}

#[tokio::test]
async fn ineligible_orders_fail_without_any_upstream_call() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(
        vec![
            canceled_order("canceled"),
            raw_order("old", 31),
            raw_order("ok", 7),
        ],
        None,
    ));
    let service = service(&api, dir.path());
    seed(&service).await;

    let SendOutcome::Batch(batch) = service
        .send_review_requests(&send(&["canceled", "old", "ok"], RequestKind::Batch))
        .await
        .unwrap()
    else {
        panic!("expected a batch result");
    };
    assert_eq!((batch.total, batch.sent, batch.failed), (3, 1, 2));
    assert_eq!(api.created(), vec!["ok"]);
    for result in batch.results.iter().filter(|r| r.order_id != "ok") {
        assert_eq!(result.status, ReviewRequestStatus::Failed);
        assert!(result.message.contains("not eligible"));
    }

    let (stored, _) = service
        .store()
        .find(&["canceled".to_string(), "old".to_string()])
        .await
        .unwrap();
    assert!(stored.iter().all(|o| !o.review.request_sent));
}

#[tokio::test]
async fn ineligible_order_is_not_emailed() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(vec![canceled_order("canceled")], None));
    let sink = Arc::new(RecordingSink::default());
    let service = OrderService::new(Arc::clone(&api), settings(dir.path()), sink.clone());
    seed(&service).await;

    let request = SendReviewRequest {
        template: Some("{{buyer_name}}様".to_string()),
        ..send(&["canceled"], RequestKind::Single)
    };
    let SendOutcome::Single(result) = service.send_review_requests(&request).await.unwrap() else {
        panic!("expected a single result");
    };
    assert_eq!(result.status, ReviewRequestStatus::Failed);
    assert_eq!(result.channel, DispatchChannel::Email);
    assert!(sink.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn sent_flag_reaches_cache_snapshots_written_before_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 2), None));
    seed(&service(&api, dir.path())).await;

    let restarted = service(&api, dir.path());
    restarted
        .send_review_requests(&send(&["ord-0001"], RequestKind::Single))
        .await
        .unwrap();

    let listing = service(&api, dir.path())
        .list_orders(&ListOrdersQuery::default())
        .await
        .unwrap();
    assert_eq!(listing.source, ListingSource::Cache);
    let sent = listing
        .collection
        .orders
        .iter()
        .find(|o| o.id == "ord-0001")
        .unwrap();
    assert!(sent.review.request_sent);
    assert_eq!(FakeApi::count(&api.orders_calls), 1);
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

#[tokio::test]
async fn eligibility_check_reports_per_order_results() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 2), None));
    let service = service(&api, dir.path());
    seed(&service).await;
    api.mark_eligible("ord-0000");

    let report = service
        .check_eligibility(&[
            "ord-0000".to_string(),
            "ord-0001".to_string(),
            "missing".to_string(),
        ])
        .await
        .unwrap();

    assert!(report.results["ord-0000"].eligible);
    assert_eq!(report.results["ord-0000"].reason_code, SolicitationReason::Eligible);
    assert!(!report.results["ord-0001"].eligible);
    assert_eq!(report.results["ord-0001"].reason_code, SolicitationReason::NotOffered);
    assert_eq!(report.not_found, vec!["missing"]);

    let (stored, _) = service.store().find(&["ord-0000".to_string()]).await.unwrap();
    assert_eq!(stored[0].review.solicitation_eligible, Some(true));

    let empty = service.check_eligibility(&[]).await.unwrap_err();
    assert!(matches!(empty, OrdersError::Validation(_)));
}

#[tokio::test]
async fn eligible_orders_uses_the_local_predicate() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(
        vec![raw_order("recent", 10), raw_order("old", 31)],
        None,
    ));
    let service = service(&api, dir.path());
    seed(&service).await;

    let eligible = service.eligible_orders().await.unwrap();
    let ids: Vec<&str> = eligible.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["recent"]);
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_fetches_incrementally_and_rechecks_eligibility() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 2), None));
    let service = service(&api, dir.path());

    let started = Utc::now();
    let first = service.sync(&CancellationToken::new(), None).await.unwrap();
    assert_eq!(first.fetched, 2);
    assert_eq!(first.merge.added, 2);
    assert_eq!(first.rechecked, 2);
    assert_eq!(first.newly_eligible, 0);

    let stored = service.store().load().await.unwrap();
    let fetched_at = stored.data_fetched_at.unwrap();
    assert!(fetched_at >= started);

    api.mark_eligible("ord-0001");
    let second = service.sync(&CancellationToken::new(), None).await.unwrap();
    assert_eq!(second.fetched, 0);
    assert_eq!(second.newly_eligible, 1);

    let queries = api.queries();
    let first_after = queries[0].created_after.unwrap();
    assert!(first_after <= started - ChronoDuration::days(29));
    assert_eq!(
        queries[1].created_after.unwrap(),
        fetched_at - ChronoDuration::minutes(10)
    );
}

#[tokio::test]
async fn sync_prunes_expired_orders_from_store_and_cache() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(vec![raw_order("fresh", 3), raw_order("stale", 45)], None));
    let service = service(&api, dir.path());
    let listing = service.list_orders(&ListOrdersQuery::default()).await.unwrap();
    assert_eq!(listing.collection.total_count, 2);

    let report = service.sync(&CancellationToken::new(), None).await.unwrap();
    assert_eq!(report.pruned.removed, 1);
    assert_eq!(report.pruned.remaining, 1);

    let cached = service.list_orders(&ListOrdersQuery::default()).await.unwrap();
    assert_eq!(cached.source, ListingSource::Cache);
    let ids: Vec<&str> = cached.collection.orders.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["fresh"]);
}

#[tokio::test]
async fn sync_job_reports_progress_and_summary() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 2), None));
    let service = Arc::new(service(&api, dir.path()));

    let handle = service.start_sync().await;
    let last = handle.wait().await;
    assert_eq!(last.state, JobState::Completed);
    assert!(last.message.unwrap().contains("fetched 2"));

    let status = service.job_status(JobStream::Sync).await.unwrap();
    assert_eq!(status.id, handle.id());
}

#[tokio::test]
async fn health_reports_store_contents() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new());
    api.push_page(page(raw_orders("ord", 3), None));
    let service = service(&api, dir.path());
    seed(&service).await;

    let health = service.health().await;
    assert!(health.store_readable);
    assert_eq!(health.total_orders, 3);
    assert_eq!(health.cache_entries, 1);

    tokio::fs::write(service.store().path(), b"{ not json").await.unwrap();
    let broken = service.health().await;
    assert!(!broken.store_readable);
    assert!(broken.store_error.is_some());
}
