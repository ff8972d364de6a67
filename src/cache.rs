//! # Feed cache
//! Merge/dedup/sort of fetched posts against the previously cached set,
//! plus the persisted per-scope cache entries behind it.
//!
//! Cached entries are read before any network activity so a previously
//! successful result is served immediately; a staleness threshold decides
//! whether a background refresh is warranted on top of it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::KeyValueStore;
use crate::sync::types::FeedPost;

const FEED_CACHE_PREFIX: &str = "azdo-newsfeed:feedcache:v1:";

/// Cached results older than this trigger an automatic refresh on load.
pub const STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Merge freshly fetched posts with the previously cached set.
///
/// Fresh posts are concatenated before previous ones and duplicates are
/// removed keeping the first occurrence, so a re-fetched post replaces its
/// stale cached copy. The result is sorted newest first (stable, so ties
/// keep concatenation order). The second return value lists ids seen in
/// `fresh` but not in `previous`.
pub fn merge_posts(previous: &[FeedPost], fresh: Vec<FeedPost>) -> (Vec<FeedPost>, Vec<String>) {
    let previous_ids: HashSet<&str> = previous.iter().map(|p| p.id.as_str()).collect();
    let new_ids: Vec<String> = fresh
        .iter()
        .filter(|p| !previous_ids.contains(p.id.as_str()))
        .map(|p| p.id.clone())
        .collect();

    let mut seen: HashSet<String> = HashSet::with_capacity(fresh.len() + previous.len());
    let mut merged: Vec<FeedPost> = Vec::with_capacity(fresh.len() + previous.len());
    for post in fresh.into_iter().chain(previous.iter().cloned()) {
        if seen.insert(post.id.clone()) {
            merged.push(post);
        }
    }

    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    (merged, new_ids)
}

/// One cache partition: the merged post set for a single scope fingerprint,
/// overwritten wholesale on each successful merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub fetched_at_ms: u64,
    pub posts: Vec<FeedPost>,
}

/// Scope-partitioned feed cache over a [`KeyValueStore`].
pub struct FeedCache {
    store: Arc<dyn KeyValueStore>,
    stale_after: Duration,
}

impl FeedCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            stale_after: STALE_AFTER,
        }
    }

    pub fn with_staleness(store: Arc<dyn KeyValueStore>, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }

    fn key(fingerprint: &str) -> String {
        format!("{FEED_CACHE_PREFIX}{}", urlencoding::encode(fingerprint))
    }

    /// Load the entry for a scope. Unparseable payloads count as a miss.
    pub fn load(&self, fingerprint: &str) -> Option<CacheEntry> {
        let raw = self.store.get(&Self::key(fingerprint))?;
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable cache entry");
                None
            }
        }
    }

    /// Persist an entry, best-effort.
    pub fn save(&self, fingerprint: &str, entry: &CacheEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.store.set(&Self::key(fingerprint), &json),
            Err(e) => tracing::warn!(error = %e, "cache entry serialization failed"),
        }
    }

    pub fn is_stale(&self, entry: &CacheEntry, now_ms: u64) -> bool {
        now_ms.saturating_sub(entry.fetched_at_ms) > self.stale_after.as_millis() as u64
    }
}
