//! `OrderService`: the façade the server and CLI drive.
//!
//! Composes the upstream client, the enricher, the durable store, the
//! two-tier cache, review dispatch, and the job registry. Each instance is
//! constructed once at process start and shared behind an `Arc`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sellerdesk_core::{AppConfig, CachedOrderCollection, Order, SolicitationReason};
use sellerdesk_spapi::{MarketplaceApi, SpApiClient, SpApiError};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cache::OrderCache;
use crate::enrich::{EnrichSettings, Enricher};
use crate::error::OrdersError;
use crate::jobs::{JobHandle, JobProgress, JobRegistry, JobReporter, JobStream, DEFAULT_GRACE};
use crate::pagination::{fetch_orders, FetchRequest, StopReason};
use crate::review::{
    eligible_orders, evaluate_solicitation, EmailSink, ReviewDispatcher, ReviewRequest,
    ReviewRequestBatch, TracingEmailSink,
};
use crate::store::{needs_solicitation_recheck, MergeCounts, OrderStore, PruneOutcome};

/// Incremental syncs re-read this much before the last fetch boundary.
pub const SYNC_OVERLAP_MINUTES: i64 = 10;

/// Upper bound on orders pulled by one sync.
pub const SYNC_MAX_ORDERS: usize = 1_000;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub data_dir: PathBuf,
    pub enrich: EnrichSettings,
    pub background_enrichment: bool,
    pub default_target_count: usize,
    pub cache_ttl: Duration,
    pub snapshot_ttl: Duration,
    pub retention_days: i64,
    pub review_window_days: i64,
    pub recheck_limit: usize,
    pub job_grace: std::time::Duration,
}

impl ServiceSettings {
    /// Defaults matching the documented configuration defaults.
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            enrich: EnrichSettings::default(),
            background_enrichment: false,
            default_target_count: 100,
            cache_ttl: Duration::minutes(30),
            snapshot_ttl: Duration::hours(24),
            retention_days: 30,
            review_window_days: 30,
            recheck_limit: 20,
            job_grace: DEFAULT_GRACE,
        }
    }

    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            enrich: EnrichSettings::from_config(config),
            background_enrichment: config.background_enrichment,
            default_target_count: config.default_target_count,
            cache_ttl: secs(config.cache_ttl_secs),
            snapshot_ttl: secs(config.snapshot_ttl_secs),
            retention_days: config.retention_days,
            review_window_days: config.review_window_days,
            recheck_limit: config.recheck_limit,
            job_grace: DEFAULT_GRACE,
        }
    }
}

/// TTLs beyond a year are treated as a year.
const MAX_TTL_SECS: i64 = 366 * 24 * 60 * 60;

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).map_or(MAX_TTL_SECS, |v| v.min(MAX_TTL_SECS)))
}

/// Query accepted by [`OrderService::list_orders`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersQuery {
    #[serde(default)]
    pub refresh: bool,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub next_token: Option<String>,
    pub max_results: Option<usize>,
}

impl ListOrdersQuery {
    /// Cache key for this query. `refresh` is not part of the key.
    #[must_use]
    pub fn cache_key(&self) -> String {
        fn ts(value: Option<DateTime<Utc>>) -> String {
            value.map_or_else(|| "-".to_string(), |t| t.timestamp().to_string())
        }
        format!(
            "orders|after={}|before={}|token={}|max={}",
            ts(self.created_after),
            ts(self.created_before),
            self.next_token.as_deref().unwrap_or("-"),
            self.max_results
                .map_or_else(|| "-".to_string(), |m| m.to_string()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingSource {
    Cache,
    Upstream,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListing {
    #[serde(flatten)]
    pub collection: CachedOrderCollection,
    pub source: ListingSource,
    pub stop_reason: Option<StopReason>,
    /// Present when a page failed and the listing is partial.
    pub partial_error: Option<String>,
    pub degraded: usize,
    pub enrichment_job: Option<JobProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityCheck {
    pub eligible: bool,
    pub reason: String,
    pub reason_code: SolicitationReason,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityReport {
    pub results: BTreeMap<String, EligibilityCheck>,
    pub not_found: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    #[default]
    Single,
    Batch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReviewRequest {
    #[serde(default)]
    pub order_ids: Vec<String>,
    #[serde(default, rename = "type")]
    pub kind: RequestKind,
    pub template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SendOutcome {
    Single(ReviewRequest),
    Batch(ReviewRequestBatch),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub pruned: PruneOutcome,
    pub fetched: usize,
    pub merge: MergeCounts,
    pub fetch_stop_reason: Option<StopReason>,
    pub partial_error: Option<String>,
    pub rechecked: usize,
    pub newly_eligible: usize,
    pub cache_entries_updated: usize,
    pub cancelled: bool,
}

impl SyncReport {
    fn summary(&self) -> String {
        format!(
            "pruned {}, fetched {} ({} new), rechecked {} ({} eligible)",
            self.pruned.removed, self.fetched, self.merge.added, self.rechecked, self.newly_eligible
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub store_readable: bool,
    pub store_error: Option<String>,
    pub total_orders: usize,
    pub data_fetched_at: Option<DateTime<Utc>>,
    pub cache_entries: usize,
}

pub struct OrderService<A> {
    api: Arc<A>,
    enricher: Arc<Enricher<A>>,
    dispatcher: ReviewDispatcher<A>,
    store: Arc<OrderStore>,
    cache: Arc<OrderCache>,
    jobs: JobRegistry,
    settings: ServiceSettings,
}

impl<A> std::fmt::Debug for OrderService<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderService")
            .field("store", &self.store.path())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl OrderService<SpApiClient> {
    /// Builds the service against the live upstream.
    ///
    /// # Errors
    ///
    /// Returns [`OrdersError::Upstream`] if the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, OrdersError> {
        let client = SpApiClient::from_config(config)?;
        Ok(Self::new(
            Arc::new(client),
            ServiceSettings::from_config(config),
            Arc::new(TracingEmailSink),
        ))
    }
}

impl<A: MarketplaceApi> OrderService<A> {
    #[must_use]
    pub fn new(api: Arc<A>, settings: ServiceSettings, email: Arc<dyn EmailSink>) -> Self {
        Self {
            enricher: Arc::new(Enricher::new(Arc::clone(&api), settings.enrich)),
            dispatcher: ReviewDispatcher::new(Arc::clone(&api), email, settings.review_window_days),
            store: Arc::new(OrderStore::new(&settings.data_dir)),
            cache: Arc::new(OrderCache::new(
                &settings.data_dir,
                settings.cache_ttl,
                settings.snapshot_ttl,
            )),
            jobs: JobRegistry::new(settings.job_grace),
            api,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    #[must_use]
    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &OrderCache {
        &self.cache
    }

    /// Lists orders, serving from cache unless `refresh` is set.
    ///
    /// # Errors
    ///
    /// [`OrdersError::Validation`] for an inconsistent query, upstream auth
    /// or payload failures, and store write failures. A failed page is not
    /// an error; the listing carries `partial_error`.
    pub async fn list_orders(&self, query: &ListOrdersQuery) -> Result<OrderListing, OrdersError> {
        validate_listing_query(query)?;
        let key = query.cache_key();

        if !query.refresh {
            if let Some(collection) = self.cache.get(&key).await {
                return Ok(OrderListing {
                    collection,
                    source: ListingSource::Cache,
                    stop_reason: None,
                    partial_error: None,
                    degraded: 0,
                    enrichment_job: self.jobs.status(JobStream::Enrich).await,
                });
            }
        }

        let now = Utc::now();
        let request = FetchRequest {
            created_after: query
                .created_after
                .unwrap_or_else(|| now - Duration::days(self.settings.retention_days)),
            created_before: query.created_before,
            statuses: Vec::new(),
            target_count: query
                .max_results
                .unwrap_or(self.settings.default_target_count),
            next_token: query.next_token.clone(),
        };
        let enricher = (!self.settings.background_enrichment).then_some(self.enricher.as_ref());
        let outcome = fetch_orders(
            self.api.as_ref(),
            enricher,
            &request,
            &CancellationToken::new(),
            None,
        )
        .await?;

        let fetched_ids: Vec<String> = outcome.orders.iter().map(|o| o.id.clone()).collect();
        // Only a full default-window walk may advance the sync boundary.
        let complete = outcome.stop_reason == StopReason::Exhausted
            && query.created_after.is_none()
            && query.created_before.is_none()
            && query.next_token.is_none();
        let fetched_at = complete.then_some(now);
        let merged = self.store.merge(outcome.orders, fetched_at).await?;
        let listed = pick_by_id(merged.merged, &fetched_ids);

        let (mut collection, _) = CachedOrderCollection::new(listed, now);
        collection.data_fetched_at = Some(now);
        collection.valid_until = Some(now + self.settings.cache_ttl);
        collection.next_token.clone_from(&outcome.next_token);
        if outcome.partial_error.is_none() {
            self.cache.set(&key, collection.clone()).await;
        }

        let enrichment_job = if self.settings.background_enrichment {
            let pending: Vec<Order> = collection
                .orders
                .iter()
                .filter(|o| o.needs_enrichment())
                .cloned()
                .collect();
            if pending.is_empty() {
                None
            } else {
                Some(self.start_enrichment(pending).await.progress())
            }
        } else {
            None
        };

        Ok(OrderListing {
            collection,
            source: ListingSource::Upstream,
            stop_reason: Some(outcome.stop_reason),
            partial_error: outcome.partial_error,
            degraded: outcome.degraded,
            enrichment_job,
        })
    }

    /// Enriches `orders` in a background job on the `enrich` stream, then
    /// folds the results into the store and the cache.
    pub async fn start_enrichment(&self, orders: Vec<Order>) -> JobHandle {
        let enricher = Arc::clone(&self.enricher);
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);

        self.jobs
            .start(JobStream::Enrich, move |token, reporter| async move {
                reporter.set_total(orders.len());
                let ids: Vec<String> = orders.iter().map(|o| o.id.clone()).collect();
                let outcome = enricher
                    .enrich_orders(orders, &token, Some(&reporter))
                    .await
                    .map_err(|e| e.to_string())?;
                let degraded = outcome.degraded;
                let merged = store
                    .merge(outcome.orders, None)
                    .await
                    .map_err(|e| e.to_string())?;
                let affected = pick_by_id(merged.merged, &ids);
                cache.replace_orders(&affected).await;
                reporter.message(format!("enriched {} orders, {degraded} degraded", affected.len()));
                Ok(())
            })
            .await
    }

    /// Stored orders that pass the local eligibility predicate.
    ///
    /// # Errors
    ///
    /// Propagates store read failures.
    pub async fn eligible_orders(&self) -> Result<Vec<Order>, OrdersError> {
        let stored = self.store.load().await?;
        Ok(eligible_orders(
            &stored.orders,
            self.settings.review_window_days,
            Utc::now(),
        ))
    }

    /// Checks upstream eligibility for each stored order, one call at a
    /// time, and records the results on the orders.
    ///
    /// # Errors
    ///
    /// [`OrdersError::Validation`] for an empty id list. Upstream auth
    /// failures are returned after the orders already checked are saved.
    pub async fn check_eligibility(&self, ids: &[String]) -> Result<EligibilityReport, OrdersError> {
        let ids = normalize_ids(ids);
        if ids.is_empty() {
            return Err(OrdersError::Validation("orderIds must not be empty".to_string()));
        }
        let (mut orders, not_found) = self.store.find(&ids).await?;
        let result = self.recheck(&mut orders, &CancellationToken::new()).await;
        self.persist_local(&orders).await?;
        result?;

        let results = orders
            .iter()
            .filter_map(|o| {
                let code = o.review.solicitation_reason_code?;
                Some((
                    o.id.clone(),
                    EligibilityCheck {
                        eligible: o.review.solicitation_eligible.unwrap_or(false),
                        reason: code.description().to_string(),
                        reason_code: code,
                        checked_at: o.review.solicitation_checked_at.unwrap_or_else(Utc::now),
                    },
                ))
            })
            .collect();
        Ok(EligibilityReport { results, not_found })
    }

    /// Sends review requests for stored orders.
    ///
    /// # Errors
    ///
    /// [`OrdersError::Validation`] for a malformed request,
    /// [`OrdersError::UnknownOrders`] when an id is not stored. Nothing is
    /// sent in either case. Upstream auth failures are returned after the
    /// orders already processed are saved.
    pub async fn send_review_requests(
        &self,
        request: &SendReviewRequest,
    ) -> Result<SendOutcome, OrdersError> {
        let ids = normalize_ids(&request.order_ids);
        if ids.is_empty() {
            return Err(OrdersError::Validation("orderIds must not be empty".to_string()));
        }
        if request.kind == RequestKind::Single && ids.len() != 1 {
            return Err(OrdersError::Validation(format!(
                "a single request takes exactly one order id, got {}",
                ids.len()
            )));
        }
        let template = request
            .template
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let (mut orders, missing) = self.store.find(&ids).await?;
        if !missing.is_empty() {
            return Err(OrdersError::UnknownOrders(missing));
        }

        let outcome = match request.kind {
            RequestKind::Single => self
                .dispatcher
                .send_single(&mut orders[0], template)
                .await
                .map(SendOutcome::Single),
            RequestKind::Batch => self
                .dispatcher
                .send_batch(&mut orders, template)
                .await
                .map(SendOutcome::Batch),
        };
        self.persist_local(&orders).await?;
        outcome.map_err(OrdersError::from)
    }

    /// Runs one sync cycle: prune, incremental fetch, merge, recheck.
    ///
    /// # Errors
    ///
    /// Store failures and upstream auth or payload failures. A failed page
    /// ends the fetch early and is reported in `partial_error`.
    pub async fn sync(
        &self,
        cancel: &CancellationToken,
        progress: Option<&JobReporter>,
    ) -> Result<SyncReport, OrdersError> {
        let now = Utc::now();
        let retention = Duration::days(self.settings.retention_days);
        let mut report = SyncReport {
            pruned: self.prune_at(now).await?,
            ..SyncReport::default()
        };

        let stored = self.store.load().await?;
        let request = FetchRequest {
            created_after: sync_window_start(stored.data_fetched_at, retention, now),
            created_before: None,
            statuses: Vec::new(),
            target_count: SYNC_MAX_ORDERS,
            next_token: None,
        };
        let outcome = fetch_orders(
            self.api.as_ref(),
            Some(self.enricher.as_ref()),
            &request,
            cancel,
            progress,
        )
        .await?;

        report.fetched = outcome.orders.len();
        report.fetch_stop_reason = Some(outcome.stop_reason);
        report.partial_error.clone_from(&outcome.partial_error);
        let complete = outcome.stop_reason == StopReason::Exhausted;
        let fetched_ids: Vec<String> = outcome.orders.iter().map(|o| o.id.clone()).collect();
        let merged = self
            .store
            .merge(outcome.orders, complete.then_some(now))
            .await?;
        report.merge = merged.counts();

        let mut affected = pick_by_id(merged.merged.clone(), &fetched_ids);
        if cancel.is_cancelled() {
            report.cancelled = true;
            report.cache_entries_updated = self.cache.replace_orders(&affected).await;
            return Ok(report);
        }

        let review_window = Duration::days(self.settings.review_window_days);
        let mut candidates: Vec<Order> = merged
            .merged
            .into_iter()
            .filter(|o| {
                needs_solicitation_recheck(o)
                    && o.status.permits_review_request()
                    && now - o.purchase_date <= review_window
            })
            .collect();
        candidates.sort_by_key(|o| o.purchase_date);
        candidates.truncate(self.settings.recheck_limit);

        let result = self.recheck(&mut candidates, cancel).await;
        self.store.replace(&candidates).await?;
        report.rechecked = result?;
        report.newly_eligible = candidates
            .iter()
            .filter(|o| o.review.solicitation_eligible == Some(true))
            .count();
        report.cancelled = cancel.is_cancelled();

        let rechecked_ids: HashSet<&str> = candidates.iter().map(|o| o.id.as_str()).collect();
        affected.retain(|o| !rechecked_ids.contains(o.id.as_str()));
        affected.extend(candidates);
        report.cache_entries_updated = self.cache.replace_orders(&affected).await;

        tracing::info!(
            pruned = report.pruned.removed,
            fetched = report.fetched,
            added = report.merge.added,
            rechecked = report.rechecked,
            newly_eligible = report.newly_eligible,
            "sync finished"
        );
        Ok(report)
    }

    /// Starts [`OrderService::sync`] on the `sync` job stream.
    pub async fn start_sync(self: &Arc<Self>) -> JobHandle {
        let service = Arc::clone(self);
        self.jobs
            .start(JobStream::Sync, move |token, reporter| async move {
                let report = service
                    .sync(&token, Some(&reporter))
                    .await
                    .map_err(|e| e.to_string())?;
                reporter.message(report.summary());
                Ok(())
            })
            .await
    }

    /// Drops stored and cached orders older than the retention window.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn prune(&self) -> Result<PruneOutcome, OrdersError> {
        self.prune_at(Utc::now()).await
    }

    async fn prune_at(&self, now: DateTime<Utc>) -> Result<PruneOutcome, OrdersError> {
        let outcome = self
            .store
            .prune(Duration::days(self.settings.retention_days), now)
            .await?;
        self.cache.remove_orders(&outcome.removed_ids).await;
        Ok(outcome)
    }

    pub async fn cleanup_cache(&self) -> usize {
        self.cache.cleanup_expired(Utc::now()).await
    }

    pub async fn job_status(&self, stream: JobStream) -> Option<JobProgress> {
        self.jobs.status(stream).await
    }

    pub async fn job_handle(&self, stream: JobStream) -> Option<JobHandle> {
        self.jobs.handle(stream).await
    }

    /// Cancels every running job. Called on shutdown.
    pub async fn shutdown(&self) {
        self.jobs.cancel_all().await;
    }

    pub async fn health(&self) -> HealthReport {
        let cache_entries = self.cache.len().await;
        match self.store.load().await {
            Ok(stored) => HealthReport {
                store_readable: true,
                store_error: None,
                total_orders: stored.total_count,
                data_fetched_at: stored.data_fetched_at,
                cache_entries,
            },
            Err(e) => HealthReport {
                store_readable: false,
                store_error: Some(e.to_string()),
                total_orders: 0,
                data_fetched_at: None,
                cache_entries,
            },
        }
    }

    /// Looks up upstream eligibility for each order in turn, recording the
    /// result on it. Orders already requested are recorded without a call.
    /// Stops early on cancellation. Returns how many orders were checked.
    async fn recheck(
        &self,
        orders: &mut [Order],
        cancel: &CancellationToken,
    ) -> Result<usize, SpApiError> {
        let mut checked = 0;
        for order in orders.iter_mut() {
            if cancel.is_cancelled() {
                tracing::info!("eligibility recheck cancelled");
                break;
            }
            let now = Utc::now();
            checked += 1;
            if order.review.request_sent {
                order.record_solicitation_check(false, SolicitationReason::AlreadyRequested, now);
                continue;
            }
            match self.api.get_solicitation_actions(&order.id).await {
                Ok(actions) => {
                    let (eligible, reason) =
                        evaluate_solicitation(&actions, order.purchase_date, now);
                    order.record_solicitation_check(eligible, reason, now);
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "solicitation check failed");
                    order.record_solicitation_check(false, SolicitationReason::CheckFailed, now);
                }
            }
        }
        Ok(checked)
    }

    /// Writes locally mutated orders to the store and every cache entry
    /// holding them.
    async fn persist_local(&self, orders: &[Order]) -> Result<(), OrdersError> {
        self.store.replace(orders).await?;
        self.cache.replace_orders(orders).await;
        Ok(())
    }
}

fn validate_listing_query(query: &ListOrdersQuery) -> Result<(), OrdersError> {
    if query.max_results == Some(0) {
        return Err(OrdersError::Validation("maxResults must be positive".to_string()));
    }
    if let (Some(after), Some(before)) = (query.created_after, query.created_before) {
        if after >= before {
            return Err(OrdersError::Validation(
                "createdAfter must be earlier than createdBefore".to_string(),
            ));
        }
    }
    Ok(())
}

/// Trims ids, drops blanks, and removes repeats keeping first occurrence.
fn normalize_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(ToOwned::to_owned)
        .collect()
}

/// Start of an incremental sync window.
#[must_use]
pub fn sync_window_start(
    last_fetched: Option<DateTime<Utc>>,
    retention: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let oldest = now - retention;
    last_fetched.map_or(oldest, |t| {
        (t - Duration::minutes(SYNC_OVERLAP_MINUTES)).max(oldest)
    })
}

/// Orders from `orders` whose ids appear in `ids`, in `ids` order.
fn pick_by_id(orders: Vec<Order>, ids: &[String]) -> Vec<Order> {
    let mut by_id: HashMap<String, Order> = orders.into_iter().map(|o| (o.id.clone(), o)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}
