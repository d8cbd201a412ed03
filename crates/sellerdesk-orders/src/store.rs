//! Durable order store.
//!
//! One JSON document (`orders.json` under the data directory) holds every
//! order seen within the retention window. Fetches are folded in with
//! [`merge_orders`]: locally tracked review state always survives a refetch,
//! everything else takes the freshest upstream value. Pruning is a separate,
//! explicit operation.
//!
//! Writes from this process are serialized by an internal lock. Nothing
//! coordinates separate processes sharing the same data directory; the store
//! assumes a single writing process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use sellerdesk_core::{
    dedupe_orders, CachedOrderCollection, Order, ReviewRequestStatus, ReviewState,
};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::OrdersError;
use crate::snapshot::{read_json, write_json_atomic};

pub const STORE_FILE_NAME: &str = "orders.json";

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub merged: Vec<Order>,
    pub added: usize,
    pub updated: usize,
}

impl MergeOutcome {
    #[must_use]
    pub fn counts(&self) -> MergeCounts {
        MergeCounts {
            added: self.added,
            updated: self.updated,
            total: self.merged.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub added: usize,
    pub updated: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneOutcome {
    pub removed: usize,
    pub remaining: usize,
    #[serde(skip)]
    pub removed_ids: Vec<String>,
}

/// Folds `incoming` into `existing`, keyed by order id.
///
/// For orders present on both sides, the sent flag and solicitation fields
/// come from the existing record whenever it has a value and everything else
/// comes from the incoming record. Resolved line items are never replaced by
/// placeholders. Duplicate ids inside `incoming` collapse to their last
/// occurrence before merging.
#[must_use]
pub fn merge_orders(existing: Vec<Order>, incoming: Vec<Order>) -> MergeOutcome {
    let (incoming, _) = dedupe_orders(incoming);
    let (mut merged, _) = dedupe_orders(existing);
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, o)| (o.id.clone(), i))
        .collect();

    let mut added = 0;
    let mut updated = 0;
    for order in incoming {
        if let Some(&i) = index.get(&order.id) {
            let prior = std::mem::replace(&mut merged[i], order);
            merge_into(&mut merged[i], prior);
            updated += 1;
        } else {
            index.insert(order.id.clone(), merged.len());
            merged.push(order);
            added += 1;
        }
    }

    sort_newest_first(&mut merged);
    MergeOutcome {
        merged,
        added,
        updated,
    }
}

/// Overlays the locally tracked parts of `prior` onto the fresh `order`.
///
/// The request status follows the fresh record unless a request was already
/// sent. A fresh record without a status keeps the prior one, except a prior
/// `Error`, which belongs to the earlier enrichment attempt.
fn merge_into(order: &mut Order, prior: Order) {
    let prior_resolved = prior.has_resolved_items();
    let fresh = std::mem::take(&mut order.review);
    let kept = prior.review;
    let request_sent = kept.request_sent || fresh.request_sent;
    let prior_status = kept.status.filter(|s| *s != ReviewRequestStatus::Error);
    let status = if kept.request_sent {
        Some(ReviewRequestStatus::Sent)
    } else {
        fresh.status.or(prior_status)
    };
    order.review = ReviewState {
        request_sent,
        sent_at: kept.sent_at.or(fresh.sent_at),
        status,
        solicitation_eligible: kept.solicitation_eligible.or(fresh.solicitation_eligible),
        solicitation_reason: kept.solicitation_reason.or(fresh.solicitation_reason),
        solicitation_reason_code: kept
            .solicitation_reason_code
            .or(fresh.solicitation_reason_code),
        solicitation_checked_at: kept
            .solicitation_checked_at
            .or(fresh.solicitation_checked_at),
    };

    if order.needs_enrichment() && prior_resolved {
        order.items = prior.items;
        if order.enrichment_error.is_some() {
            order.enrichment_error = prior.enrichment_error;
            if order.enrichment_error.is_none()
                && order.review.status == Some(ReviewRequestStatus::Error)
            {
                order.review.status = prior_status;
            }
        }
    }
    if order.customer.email.is_none() {
        order.customer.email = prior.customer.email;
    }
    if order.customer.name.is_none() {
        order.customer.name = prior.customer.name;
    }
    if order.buyer_info.is_none() {
        order.buyer_info = prior.buyer_info;
    }
    if order.shipping_address.is_none() {
        order.shipping_address = prior.shipping_address;
    }
}

/// Removes orders purchased before `now - retention`.
#[must_use]
pub fn prune_expired(
    orders: Vec<Order>,
    retention: Duration,
    now: DateTime<Utc>,
) -> (Vec<Order>, PruneOutcome) {
    let cutoff = now - retention;
    let (kept, removed): (Vec<Order>, Vec<Order>) =
        orders.into_iter().partition(|o| o.purchase_date >= cutoff);
    let outcome = PruneOutcome {
        removed: removed.len(),
        remaining: kept.len(),
        removed_ids: removed.into_iter().map(|o| o.id).collect(),
    };
    (kept, outcome)
}

/// Whether an order's solicitation eligibility should be looked up again.
///
/// Never-checked orders qualify. Orders found ineligible qualify unless the
/// recorded reason is terminal. A record without a reason code (written
/// before codes existed) is treated as non-terminal.
#[must_use]
pub fn needs_solicitation_recheck(order: &Order) -> bool {
    if order.review.request_sent {
        return false;
    }
    match order.review.solicitation_eligible {
        None => true,
        Some(true) => false,
        Some(false) => !order
            .review
            .solicitation_reason_code
            .is_some_and(sellerdesk_core::SolicitationReason::is_terminal),
    }
}

fn sort_newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| b.purchase_date.cmp(&a.purchase_date));
}

/// File-backed store for the authoritative order collection.
#[derive(Debug)]
pub struct OrderStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl OrderStore {
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(STORE_FILE_NAME),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored collection; an absent file is an empty collection.
    ///
    /// # Errors
    ///
    /// [`OrdersError::Snapshot`] or [`OrdersError::SnapshotFormat`] when the
    /// file exists but cannot be read.
    pub async fn load(&self) -> Result<CachedOrderCollection, OrdersError> {
        let stored: Option<CachedOrderCollection> = read_json(&self.path).await?;
        let mut collection = stored.unwrap_or_else(|| CachedOrderCollection::empty(Utc::now()));
        let duplicates = collection.normalize();
        if !duplicates.is_empty() {
            tracing::warn!(
                path = %self.path.display(),
                count = duplicates.len(),
                ids = ?duplicates,
                "duplicate order ids in store, keeping last occurrence"
            );
        }
        Ok(collection)
    }

    /// Merges freshly fetched orders into the store. `fetched_at` marks the
    /// upstream fetch boundary the incoming orders cover, if any.
    ///
    /// # Errors
    ///
    /// Propagates load and write failures.
    pub async fn merge(
        &self,
        incoming: Vec<Order>,
        fetched_at: Option<DateTime<Utc>>,
    ) -> Result<MergeOutcome, OrdersError> {
        let _guard = self.write_lock.lock().await;
        let current = self.load().await?;
        let outcome = merge_orders(current.orders, incoming);

        let now = Utc::now();
        let (mut next, _) = CachedOrderCollection::new(outcome.merged.clone(), now);
        next.data_fetched_at = match (current.data_fetched_at, fetched_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        next.valid_until = current.valid_until;
        write_json_atomic(&self.path, &next).await?;

        tracing::info!(
            added = outcome.added,
            updated = outcome.updated,
            total = next.total_count,
            "merged orders into store"
        );
        Ok(outcome)
    }

    /// Drops orders older than the retention window.
    ///
    /// # Errors
    ///
    /// Propagates load and write failures.
    pub async fn prune(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<PruneOutcome, OrdersError> {
        let _guard = self.write_lock.lock().await;
        let current = self.load().await?;
        let (kept, outcome) = prune_expired(current.orders, retention, now);
        if outcome.removed > 0 {
            let (mut next, _) = CachedOrderCollection::new(kept, now);
            next.data_fetched_at = current.data_fetched_at;
            next.valid_until = current.valid_until;
            write_json_atomic(&self.path, &next).await?;
        }
        tracing::info!(
            removed = outcome.removed,
            remaining = outcome.remaining,
            "pruned expired orders"
        );
        Ok(outcome)
    }

    /// Replaces stored orders by id with the given copies. Ids not present
    /// in the store are ignored. Returns how many orders were replaced.
    ///
    /// Unlike [`OrderStore::merge`], the given review state overwrites the
    /// stored one; use this for local mutations (send, recheck).
    ///
    /// # Errors
    ///
    /// Propagates load and write failures.
    pub async fn replace(&self, orders: &[Order]) -> Result<usize, OrdersError> {
        if orders.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let mut current = self.load().await?;
        let by_id: HashMap<&str, &Order> = orders.iter().map(|o| (o.id.as_str(), o)).collect();

        let mut replaced = 0;
        for stored in &mut current.orders {
            if let Some(update) = by_id.get(stored.id.as_str()) {
                *stored = (*update).clone();
                replaced += 1;
            }
        }
        if replaced > 0 {
            current.last_updated = Utc::now();
            write_json_atomic(&self.path, &current).await?;
        }
        Ok(replaced)
    }

    /// Looks up stored orders by id, preserving the requested order.
    /// Returns the found orders and the ids that were not found.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn find(&self, ids: &[String]) -> Result<(Vec<Order>, Vec<String>), OrdersError> {
        let current = self.load().await?;
        let mut found = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match current.get(id) {
                Some(order) => found.push(order.clone()),
                None => missing.push(id.clone()),
            }
        }
        Ok((found, missing))
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
