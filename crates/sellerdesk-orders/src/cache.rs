//! Two-tier order cache: an in-memory map in front of per-key JSON
//! snapshots on disk.
//!
//! Reads check memory first, then the snapshot; a live snapshot is promoted
//! back into memory. Writes dedupe the collection, replace the memory entry,
//! and persist the snapshot atomically. Expiry is evaluated on read;
//! [`OrderCache::cleanup_expired`] is an optional sweep that only bounds
//! memory. Snapshot I/O failures never fail a cache operation: a bad read is
//! a miss and a bad write is logged.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use sellerdesk_core::{CachedOrderCollection, Order};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::snapshot::{read_json, write_json_atomic};

const CACHE_DIR_NAME: &str = "cache";

#[derive(Debug, Clone)]
struct CacheEntry {
    collection: CachedOrderCollection,
    expires_at: DateTime<Utc>,
    snapshot_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDoc {
    key: String,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    collection: CachedOrderCollection,
}

#[derive(Debug)]
pub struct OrderCache {
    dir: PathBuf,
    ttl: Duration,
    snapshot_ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl OrderCache {
    /// `ttl` bounds the in-memory copy, `snapshot_ttl` the on-disk copy.
    #[must_use]
    pub fn new(data_dir: &Path, ttl: Duration, snapshot_ttl: Duration) -> Self {
        Self {
            dir: data_dir.join(CACHE_DIR_NAME),
            ttl,
            snapshot_ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<CachedOrderCollection> {
        self.get_at(key, Utc::now()).await
    }

    pub async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<CachedOrderCollection> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key) {
                if now < entry.expires_at {
                    tracing::debug!(key, "order cache hit (memory)");
                    return Some(entry.collection.clone());
                }
            }
        }

        let doc = self.read_snapshot(key).await?;
        if now >= doc.expires_at {
            tracing::debug!(key, "order cache snapshot expired");
            return None;
        }

        tracing::debug!(key, "order cache hit (snapshot), promoting");
        let entry = CacheEntry {
            expires_at: (now + self.ttl).min(doc.expires_at),
            snapshot_expires_at: doc.expires_at,
            collection: doc.collection,
        };
        let collection = entry.collection.clone();
        self.entries.write().await.insert(key.to_string(), entry);
        Some(collection)
    }

    pub async fn set(&self, key: &str, collection: CachedOrderCollection) {
        self.set_at(key, collection, Utc::now()).await;
    }

    /// Stores `collection` under `key` after dropping duplicate order ids
    /// (last occurrence wins).
    pub async fn set_at(&self, key: &str, mut collection: CachedOrderCollection, now: DateTime<Utc>) {
        let duplicates = collection.normalize();
        if !duplicates.is_empty() {
            tracing::warn!(
                key,
                count = duplicates.len(),
                ids = ?duplicates,
                "discarded duplicate order ids on cache write"
            );
        }

        let entry = CacheEntry {
            collection,
            expires_at: now + self.ttl,
            snapshot_expires_at: now + self.snapshot_ttl,
        };
        self.entries
            .write()
            .await
            .insert(key.to_string(), entry.clone());
        self.persist(key, &entry, now).await;
    }

    /// Drops one key from both tiers.
    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
        let path = self.snapshot_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(key, path = %path.display(), error = %e, "failed to remove cache snapshot");
            }
        }
    }

    /// Drops in-memory entries past their TTL. Returns how many were removed.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!(removed, remaining = entries.len(), "cleaned up expired cache entries");
        }
        removed
    }

    /// Replaces cached copies of the given orders in every entry that holds
    /// them, in memory and on disk. Returns the number of entries touched.
    pub async fn replace_orders(&self, orders: &[Order]) -> usize {
        if orders.is_empty() {
            return 0;
        }
        let by_id: HashMap<&str, &Order> = orders.iter().map(|o| (o.id.as_str(), o)).collect();
        self.rewrite_entries(|collection| {
            let mut changed = false;
            for cached in &mut collection.orders {
                if let Some(update) = by_id.get(cached.id.as_str()) {
                    *cached = (*update).clone();
                    changed = true;
                }
            }
            changed
        })
        .await
    }

    /// Removes the given order ids from every entry, in memory and on disk.
    /// Returns the number of entries touched.
    pub async fn remove_orders(&self, ids: &[String]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        self.rewrite_entries(|collection| {
            let before = collection.orders.len();
            collection.orders.retain(|o| !ids.contains(&o.id));
            collection.total_count = collection.orders.len();
            before != collection.orders.len()
        })
        .await
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Applies `edit` to every in-memory entry, then to every snapshot on
    /// disk whose key is not held in memory, re-persisting what changed.
    /// Returns the number of entries and snapshots touched.
    async fn rewrite_entries<F>(&self, mut edit: F) -> usize
    where
        F: FnMut(&mut CachedOrderCollection) -> bool,
    {
        let now = Utc::now();
        let (changed, in_memory): (Vec<(String, CacheEntry)>, HashSet<String>) = {
            let mut entries = self.entries.write().await;
            let in_memory = entries.keys().cloned().collect();
            let changed = entries
                .iter_mut()
                .filter_map(|(key, entry)| {
                    if edit(&mut entry.collection) {
                        entry.collection.last_updated = now;
                        Some((key.clone(), entry.clone()))
                    } else {
                        None
                    }
                })
                .collect();
            (changed, in_memory)
        };

        for (key, entry) in &changed {
            self.persist(key, entry, now).await;
        }
        changed.len() + self.rewrite_snapshots(&in_memory, &mut edit, now).await
    }

    /// Snapshots outlive their memory entries across restarts and
    /// [`OrderCache::cleanup_expired`], so local edits must reach them too.
    async fn rewrite_snapshots<F>(
        &self,
        skip: &HashSet<String>,
        edit: &mut F,
        now: DateTime<Utc>,
    ) -> usize
    where
        F: FnMut(&mut CachedOrderCollection) -> bool,
    {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "failed to list cache snapshots");
                return 0;
            }
        };

        let mut touched = 0;
        loop {
            let path = match dir.next_entry().await {
                Ok(Some(entry)) => entry.path(),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %self.dir.display(), error = %e, "failed to list cache snapshots");
                    break;
                }
            };
            if !is_snapshot_file(&path) {
                continue;
            }
            let mut doc = match read_json::<SnapshotDoc>(&path).await {
                Ok(Some(doc)) => doc,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable cache snapshot");
                    continue;
                }
            };
            if skip.contains(&doc.key) || !edit(&mut doc.collection) {
                continue;
            }
            doc.collection.last_updated = now;
            doc.cached_at = now;
            match write_json_atomic(&path, &doc).await {
                Ok(()) => touched += 1,
                Err(e) => {
                    tracing::warn!(key = %doc.key, error = %e, "failed to rewrite cache snapshot");
                }
            }
        }
        touched
    }

    async fn persist(&self, key: &str, entry: &CacheEntry, now: DateTime<Utc>) {
        let path = self.snapshot_path(key);
        let doc = SnapshotDoc {
            key: key.to_string(),
            cached_at: now,
            expires_at: entry.snapshot_expires_at,
            collection: entry.collection.clone(),
        };
        if let Err(e) = write_json_atomic(&path, &doc).await {
            tracing::warn!(key, error = %e, "failed to persist cache snapshot");
        }
    }

    async fn read_snapshot(&self, key: &str) -> Option<SnapshotDoc> {
        let path = self.snapshot_path(key);
        match read_json::<SnapshotDoc>(&path).await {
            Ok(Some(doc)) if doc.key == key => Some(doc),
            Ok(Some(_)) => {
                tracing::warn!(key, path = %path.display(), "cache snapshot key mismatch, ignoring");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "unreadable cache snapshot, treating as miss");
                None
            }
        }
    }

    fn snapshot_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("orders-{}.json", key_digest(key)))
    }
}

fn is_snapshot_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("orders-"))
}

fn key_digest(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(32);
    for b in &digest[..16] {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
