//! Enrichment orchestrator.
//!
//! Orders are processed in small concurrent groups. For each order the line
//! items are fetched first; when any item carries a product identifier, the
//! catalog lookups and the solicitation check for that order then run
//! concurrently. Groups are separated by a pause so aggregate throughput
//! stays under the strictest endpoint limit, and each endpoint's pacer still
//! spaces the individual calls.
//!
//! Per-order failures never fail the batch. A throttled item lookup yields a
//! quota placeholder (retried on a later sync); any other failure yields a
//! degraded order with an error status. Only an authentication failure
//! aborts the whole run.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use sellerdesk_core::{AppConfig, ItemState, Order, OrderItem, SolicitationReason};
use sellerdesk_spapi::{
    parse_order, parse_order_item, CatalogItem, MarketplaceApi, RawOrder, SpApiError,
};
use tokio_util::sync::CancellationToken;

use crate::jobs::JobReporter;
use crate::review::evaluate_solicitation;

/// Bounds on orders processed concurrently in one group.
pub const MIN_GROUP_SIZE: usize = 2;
pub const MAX_GROUP_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichSettings {
    pub group_size: usize,
    pub group_pause: Duration,
}

impl Default for EnrichSettings {
    fn default() -> Self {
        Self {
            group_size: 3,
            group_pause: Duration::from_secs(2),
        }
    }
}

impl EnrichSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            group_size: config.enrich_group_size,
            group_pause: Duration::from_millis(config.enrich_group_pause_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichOutcome {
    /// Same length and order as the input.
    pub orders: Vec<Order>,
    /// Orders whose enrichment failed and which carry an error status.
    pub degraded: usize,
    /// Orders whose item lookup was throttled.
    pub quota_limited: usize,
    /// True when the run stopped early; the tail is left unenriched.
    pub cancelled: bool,
}

/// Parses one page of raw orders. Orders that fail to parse are logged and
/// skipped; there is no stable data to build a degraded copy from.
#[must_use]
pub fn parse_orders(raw: &[RawOrder]) -> Vec<Order> {
    raw.iter()
        .filter_map(|r| match parse_order(r) {
            Ok(order) => Some(order),
            Err(e) => {
                tracing::warn!(order_id = %r.amazon_order_id, error = %e, "skipping unparseable order");
                None
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct Enricher<A> {
    api: Arc<A>,
    settings: EnrichSettings,
}

impl<A: MarketplaceApi> Enricher<A> {
    #[must_use]
    pub fn new(api: Arc<A>, settings: EnrichSettings) -> Self {
        let group_size = settings.group_size.clamp(MIN_GROUP_SIZE, MAX_GROUP_SIZE);
        Self {
            api,
            settings: EnrichSettings {
                group_size,
                ..settings
            },
        }
    }

    #[must_use]
    pub fn settings(&self) -> EnrichSettings {
        self.settings
    }

    /// Parses and enriches raw orders.
    ///
    /// # Errors
    ///
    /// Returns the upstream error only when it is an authentication failure.
    pub async fn enrich(
        &self,
        raw: &[RawOrder],
        cancel: &CancellationToken,
    ) -> Result<EnrichOutcome, SpApiError> {
        self.enrich_orders(parse_orders(raw), cancel, None).await
    }

    /// Enriches already-parsed orders group by group.
    ///
    /// # Errors
    ///
    /// Returns the upstream error only when it is an authentication failure.
    pub async fn enrich_orders(
        &self,
        orders: Vec<Order>,
        cancel: &CancellationToken,
        progress: Option<&JobReporter>,
    ) -> Result<EnrichOutcome, SpApiError> {
        let mut outcome = EnrichOutcome {
            orders: Vec::with_capacity(orders.len()),
            ..EnrichOutcome::default()
        };
        let mut pending = orders.into_iter();
        let mut first_group = true;

        loop {
            let group: Vec<Order> = pending.by_ref().take(self.settings.group_size).collect();
            if group.is_empty() {
                break;
            }

            if !first_group {
                tokio::select! {
                    () = tokio::time::sleep(self.settings.group_pause) => {}
                    () = cancel.cancelled() => {}
                }
            }
            first_group = false;

            if cancel.is_cancelled() {
                let skipped = group.len() + pending.len();
                tracing::info!(skipped, "enrichment cancelled, leaving remaining orders unenriched");
                outcome.orders.extend(group);
                outcome.orders.extend(pending.by_ref());
                outcome.cancelled = true;
                break;
            }

            let group_len = group.len();
            let results = join_all(group.into_iter().map(|o| self.enrich_one(o))).await;
            for result in results {
                let order = result?;
                if order.enrichment_error.is_some() {
                    outcome.degraded += 1;
                } else if order.items.iter().any(|i| i.state == ItemState::QuotaExceeded) {
                    outcome.quota_limited += 1;
                }
                outcome.orders.push(order);
            }
            if let Some(reporter) = progress {
                reporter.advance(group_len);
            }
        }

        Ok(outcome)
    }

    /// Enriches one order. Never fails except on authentication errors.
    async fn enrich_one(&self, mut order: Order) -> Result<Order, SpApiError> {
        let raw_items = match self.api.get_order_items(&order.id).await {
            Ok(items) => items,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) if e.is_quota_exceeded() => {
                tracing::warn!(order_id = %order.id, "order items quota exceeded, leaving placeholder");
                order.items = vec![OrderItem::quota_exceeded(&order.id)];
                return Ok(order);
            }
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "order enrichment failed");
                order.degrade(format!("line item lookup failed: {e}"));
                return Ok(order);
            }
        };

        let mut items: Vec<OrderItem> = raw_items.iter().map(parse_order_item).collect();
        let asins: BTreeSet<String> = items.iter().filter_map(|i| i.asin.clone()).collect();
        if asins.is_empty() {
            order.items = items;
            return Ok(order);
        }

        let (catalog, solicitation) = tokio::join!(
            self.fetch_catalog(&asins),
            self.api.get_solicitation_actions(&order.id)
        );
        let catalog = catalog?;

        for item in &mut items {
            if let Some(asin) = item.asin.clone() {
                apply_catalog(item, &asin, catalog.get(&asin));
            }
        }
        order.items = items;

        let now = Utc::now();
        match solicitation {
            Ok(actions) => {
                let (eligible, reason) = evaluate_solicitation(&actions, order.purchase_date, now);
                order.record_solicitation_check(eligible, reason, now);
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "solicitation check failed");
                order.record_solicitation_check(false, SolicitationReason::CheckFailed, now);
            }
        }

        Ok(order)
    }

    /// Looks up every distinct product identifier. Failed lookups are absent
    /// from the map.
    async fn fetch_catalog(
        &self,
        asins: &BTreeSet<String>,
    ) -> Result<HashMap<String, CatalogItem>, SpApiError> {
        let lookups = asins.iter().map(|asin| async move {
            (asin.clone(), self.api.get_catalog_item(asin).await)
        });

        let mut found = HashMap::with_capacity(asins.len());
        for (asin, result) in join_all(lookups).await {
            match result {
                Ok(item) => {
                    found.insert(asin, item);
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    tracing::debug!(asin = %asin, error = %e, "catalog lookup failed, using fallback");
                }
            }
        }
        Ok(found)
    }
}

/// Image URL derivable from the product identifier alone.
#[must_use]
pub fn fallback_image_url(asin: &str) -> String {
    format!("https://images-fe.ssl-images-amazon.com/images/P/{asin}.09.LZZZZZZZ.jpg")
}

#[must_use]
pub fn fallback_title(asin: &str) -> String {
    format!("商品 {asin}")
}

fn apply_catalog(item: &mut OrderItem, asin: &str, catalog: Option<&CatalogItem>) {
    let Some(catalog) = catalog else {
        if item.title.trim().is_empty() {
            item.title = fallback_title(asin);
        }
        item.image_url = Some(fallback_image_url(asin));
        return;
    };

    if item.title.trim().is_empty() {
        item.title = catalog
            .title()
            .map_or_else(|| fallback_title(asin), ToOwned::to_owned);
    }
    item.image_url = Some(
        catalog
            .main_image()
            .map_or_else(|| fallback_image_url(asin), ToOwned::to_owned),
    );
    item.brand = catalog.brand().map(ToOwned::to_owned);
    item.manufacturer = catalog.manufacturer().map(ToOwned::to_owned);
    item.product_type = catalog.product_type().map(ToOwned::to_owned);
}
