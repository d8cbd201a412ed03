//! Pagination controller for the orders list.
//!
//! Pages are requested one at a time. When an enricher is supplied, each
//! page is enriched before the next page is requested, so page pacing and
//! enrichment pacing interleave instead of stacking up outstanding calls.
//!
//! The loop stops on the first of: target reached, no continuation token,
//! page cap reached, an upstream error on a page, or cancellation. A page
//! error is not a failure of the whole fetch; the orders accumulated so far
//! are returned with the error noted.

use chrono::{DateTime, Duration, Utc};
use sellerdesk_core::Order;
use sellerdesk_spapi::{MarketplaceApi, OrdersQuery, SpApiError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::enrich::{parse_orders, Enricher};
use crate::jobs::JobReporter;

/// Upstream ceiling on orders per page.
pub const PAGE_SIZE: usize = 100;

/// `CreatedBefore` must trail the current time by at least this much.
pub const CREATED_BEFORE_MARGIN_MINUTES: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub created_after: DateTime<Utc>,
    pub created_before: Option<DateTime<Utc>>,
    pub statuses: Vec<String>,
    pub target_count: usize,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    Exhausted,
    PageCap,
    UpstreamError,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub orders: Vec<Order>,
    pub next_token: Option<String>,
    pub total_count: usize,
    pub pages: usize,
    pub stop_reason: StopReason,
    /// Set when a page failed and the result is partial.
    pub partial_error: Option<String>,
    pub degraded: usize,
}

/// Pages allowed for a target: twice the pages a full-page fetch would
/// need, so short pages still reach the target.
#[must_use]
pub fn page_cap(target_count: usize) -> usize {
    target_count.div_ceil(PAGE_SIZE).max(1) * 2
}

/// Latest `CreatedBefore` the upstream accepts at `now`.
#[must_use]
pub fn clamp_created_before(
    requested: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let latest = now - Duration::minutes(CREATED_BEFORE_MARGIN_MINUTES);
    requested.map_or(latest, |r| r.min(latest))
}

/// Fetches up to `request.target_count` orders.
///
/// # Errors
///
/// Authentication failures and unreadable page payloads are returned as
/// errors. Every other page failure ends the loop with a partial result.
pub async fn fetch_orders<A: MarketplaceApi>(
    api: &A,
    enricher: Option<&Enricher<A>>,
    request: &FetchRequest,
    cancel: &CancellationToken,
    progress: Option<&JobReporter>,
) -> Result<FetchOutcome, SpApiError> {
    let now = Utc::now();
    let target = request.target_count.max(1);
    let cap = page_cap(target);
    let created_before = clamp_created_before(request.created_before, now);

    let mut orders: Vec<Order> = Vec::with_capacity(target.min(PAGE_SIZE * cap));
    let mut token = request.next_token.clone();
    let mut pages = 0;
    let mut degraded = 0;
    let mut partial_error = None;
    if let Some(reporter) = progress {
        reporter.set_total(target);
    }

    let stop_reason = loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        if pages >= cap {
            tracing::warn!(pages, target, "order page cap reached");
            break StopReason::PageCap;
        }

        let remaining = target - orders.len();
        let query = OrdersQuery {
            created_after: Some(request.created_after),
            created_before: Some(created_before),
            statuses: request.statuses.clone(),
            max_results: u32::try_from(remaining.min(PAGE_SIZE)).unwrap_or(100),
            next_token: token.clone(),
        };

        let page = match api.get_orders_page(&query).await {
            Ok(page) => page,
            Err(e) if e.is_auth() || matches!(e, SpApiError::Deserialize { .. }) => {
                return Err(e);
            }
            Err(e) => {
                let transient = e.is_transient();
                tracing::warn!(
                    page = pages + 1,
                    accumulated = orders.len(),
                    transient,
                    error = %e,
                    "order page failed, returning partial results"
                );
                partial_error = Some(if transient {
                    format!("{e} (temporary upstream failure, retry later)")
                } else {
                    e.to_string()
                });
                break StopReason::UpstreamError;
            }
        };
        pages += 1;

        let mut parsed = parse_orders(&page.orders);
        if let Some(enricher) = enricher {
            let outcome = enricher.enrich_orders(parsed, cancel, progress).await?;
            degraded += outcome.degraded;
            parsed = outcome.orders;
        } else if let Some(reporter) = progress {
            reporter.advance(parsed.len());
        }
        orders.extend(parsed);
        token = page.next_token;

        tracing::debug!(page = pages, accumulated = orders.len(), target, "fetched order page");

        if orders.len() >= target {
            orders.truncate(target);
            break StopReason::TargetReached;
        }
        if token.is_none() {
            break StopReason::Exhausted;
        }
    };

    Ok(FetchOutcome {
        total_count: orders.len(),
        orders,
        next_token: token,
        pages,
        stop_reason,
        partial_error,
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_cap_scales_with_target() {
        assert_eq!(page_cap(1), 2);
        assert_eq!(page_cap(100), 2);
        assert_eq!(page_cap(101), 4);
        assert_eq!(page_cap(250), 6);
    }

    #[test]
    fn created_before_never_within_margin_of_now() {
        let now: DateTime<Utc> = "2026-10-17T12:00:00Z".parse().unwrap();
        let latest = now - Duration::minutes(CREATED_BEFORE_MARGIN_MINUTES);
        assert_eq!(clamp_created_before(None, now), latest);
        assert_eq!(clamp_created_before(Some(now), now), latest);

        let earlier = now - Duration::days(1);
        assert_eq!(clamp_created_before(Some(earlier), now), earlier);
    }
}
