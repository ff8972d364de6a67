//! # Feed service
//! Request-facing coordination of the cache fast path, the sync engine, and
//! the merge commit. Holds the only cross-request mutable state: the
//! current scope fingerprint (guarding against late commits from an
//! abandoned scope) and the short-lived new-post highlight set.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::azdo::AzdoApi;
use crate::cache::{merge_posts, CacheEntry, FeedCache};
use crate::sync::types::{AggregateResult, FeedPost, FeedPostKind, FeedScope, SourceError};
use crate::sync::{sync_feed_at, SyncError};

/// How long freshly observed post ids stay flagged as new.
pub const NEW_HIGHLIGHT_TTL_MS: u64 = 12_000;

/// Success responses carry at most this many example error messages.
pub const ERROR_SAMPLE_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMeta {
    pub projects_requested: usize,
    pub projects_succeeded: usize,
    pub error_count: usize,
    pub pr_error_count: usize,
    pub wi_error_count: usize,
    pub error_samples: Vec<SourceError>,
    /// Window start in unix millis; 0 for an unbounded scope.
    pub since: i64,
    pub posts_count: usize,
    pub pr_count: usize,
    pub wi_count: usize,
}

/// What one feed request resolves to: the merged post list, its metadata,
/// the ids currently flagged new, and whether the network was skipped.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub posts: Vec<FeedPost>,
    pub meta: FeedMeta,
    pub new_ids: Vec<String>,
    pub from_cache: bool,
}

#[derive(Debug, Default)]
struct ServiceState {
    current_fingerprint: Option<String>,
    new_ids: Vec<String>,
    new_since_ms: u64,
}

pub struct FeedService {
    api: Arc<dyn AzdoApi>,
    cache: FeedCache,
    workers: usize,
    state: Mutex<ServiceState>,
}

impl FeedService {
    pub fn new(api: Arc<dyn AzdoApi>, cache: FeedCache, workers: usize) -> Self {
        Self {
            api,
            cache,
            workers,
            state: Mutex::new(ServiceState::default()),
        }
    }

    /// Serve one feed request: fresh cache entries short-circuit unless
    /// `force` is set; everything else runs a full synchronization and
    /// commits the merged result.
    pub async fn feed(
        &self,
        scope: &FeedScope,
        pat: &str,
        force: bool,
    ) -> Result<FeedSnapshot, SyncError> {
        self.feed_at(scope, pat, force, Utc::now()).await
    }

    /// [`feed`](Self::feed) with an explicit clock.
    pub async fn feed_at(
        &self,
        scope: &FeedScope,
        pat: &str,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<FeedSnapshot, SyncError> {
        let fingerprint = scope.fingerprint();
        let now_ms = now.timestamp_millis().max(0) as u64;
        self.begin_scope(&fingerprint);

        let cached = self.cache.load(&fingerprint);
        if !force {
            if let Some(entry) = &cached {
                if !self.cache.is_stale(entry, now_ms) {
                    tracing::debug!(fingerprint = %fingerprint, "serving fresh cache entry");
                    let since_ms = scope
                        .window_start(now)
                        .map(|s| s.timestamp_millis())
                        .unwrap_or(0);
                    return Ok(FeedSnapshot {
                        meta: cached_meta(&entry.posts, since_ms),
                        posts: entry.posts.clone(),
                        new_ids: self.current_new_ids_at(now_ms),
                        from_cache: true,
                    });
                }
            }
        }

        let result = sync_feed_at(self.api.as_ref(), scope, pat, self.workers, now).await?;

        let previous = cached.map(|e| e.posts).unwrap_or_default();
        let (posts, new_ids) = match self.commit(&fingerprint, &previous, result.posts.clone(), now_ms)
        {
            Some(committed) => committed,
            None => {
                // The scope changed while this fetch was in flight. The
                // response still belongs to its caller, but the shared
                // cache and highlight state stay untouched.
                tracing::info!(fingerprint = %fingerprint, "discarding late commit for abandoned scope");
                merge_posts(&previous, result.posts.clone())
            }
        };

        let meta = result_meta(&result, &posts);
        Ok(FeedSnapshot {
            posts,
            meta,
            new_ids,
            from_cache: false,
        })
    }

    /// Mark `fingerprint` as the scope the service is currently serving.
    fn begin_scope(&self, fingerprint: &str) {
        let mut st = self.state.lock().expect("feed state mutex poisoned");
        st.current_fingerprint = Some(fingerprint.to_string());
    }

    /// Merge and persist a completed fetch, unless the current scope moved
    /// on while it was in flight. Returns `None` without side effects in
    /// that case.
    fn commit(
        &self,
        fingerprint: &str,
        previous: &[FeedPost],
        fetched: Vec<FeedPost>,
        now_ms: u64,
    ) -> Option<(Vec<FeedPost>, Vec<String>)> {
        let mut st = self.state.lock().expect("feed state mutex poisoned");
        if st.current_fingerprint.as_deref() != Some(fingerprint) {
            return None;
        }

        let (merged, new_ids) = merge_posts(previous, fetched);
        self.cache.save(
            fingerprint,
            &CacheEntry {
                fetched_at_ms: now_ms,
                posts: merged.clone(),
            },
        );
        if !new_ids.is_empty() {
            st.new_ids = new_ids.clone();
            st.new_since_ms = now_ms;
        }
        Some((merged, new_ids))
    }

    /// Ids still inside the highlight window. Expired ids are cleared for
    /// good; later calls never resurrect them.
    pub fn current_new_ids_at(&self, now_ms: u64) -> Vec<String> {
        let mut st = self.state.lock().expect("feed state mutex poisoned");
        if st.new_ids.is_empty() {
            return Vec::new();
        }
        if now_ms.saturating_sub(st.new_since_ms) > NEW_HIGHLIGHT_TTL_MS {
            st.new_ids.clear();
            return Vec::new();
        }
        st.new_ids.clone()
    }
}

fn kind_counts(posts: &[FeedPost]) -> (usize, usize) {
    let pr = posts
        .iter()
        .filter(|p| p.kind == FeedPostKind::PullRequest)
        .count();
    let wi = posts
        .iter()
        .filter(|p| p.kind == FeedPostKind::WorkItem)
        .count();
    (pr, wi)
}

fn cached_meta(posts: &[FeedPost], since_ms: i64) -> FeedMeta {
    let (pr_count, wi_count) = kind_counts(posts);
    FeedMeta {
        projects_requested: 0,
        projects_succeeded: 0,
        error_count: 0,
        pr_error_count: 0,
        wi_error_count: 0,
        error_samples: Vec::new(),
        since: since_ms,
        posts_count: posts.len(),
        pr_count,
        wi_count,
    }
}

fn result_meta(result: &AggregateResult, posts: &[FeedPost]) -> FeedMeta {
    let (pr_count, wi_count) = kind_counts(posts);
    FeedMeta {
        projects_requested: result.projects_requested,
        projects_succeeded: result.projects_succeeded,
        error_count: result.errors.len(),
        pr_error_count: result.pr_error_count,
        wi_error_count: result.wi_error_count,
        error_samples: result
            .errors
            .iter()
            .take(ERROR_SAMPLE_LIMIT)
            .cloned()
            .collect(),
        since: result.since_ms,
        posts_count: posts.len(),
        pr_count,
        wi_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azdo::{AzdoError, Project, PullRequest, WorkItem};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingApi {
        prs: Vec<PullRequest>,
        calls: AtomicUsize,
    }

    impl CountingApi {
        fn with_prs(prs: Vec<PullRequest>) -> Arc<Self> {
            Arc::new(Self {
                prs,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AzdoApi for CountingApi {
        async fn list_projects(&self, _org: &str, _pat: &str) -> Result<Vec<Project>, AzdoError> {
            Ok(Vec::new())
        }

        async fn list_pull_requests(
            &self,
            _org: &str,
            _project: &str,
            _pat: &str,
            _top: u32,
        ) -> Result<Vec<PullRequest>, AzdoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.prs.clone())
        }

        async fn query_work_item_ids_changed_since(
            &self,
            _org: &str,
            _project: &str,
            _pat: &str,
            _since_date: &str,
            _top: u32,
        ) -> Result<Vec<i64>, AzdoError> {
            Ok(Vec::new())
        }

        async fn work_items(
            &self,
            _org: &str,
            _project: &str,
            _pat: &str,
            _ids: &[i64],
        ) -> Result<Vec<WorkItem>, AzdoError> {
            Ok(Vec::new())
        }
    }

    fn pr(id: i64, updated: &str) -> PullRequest {
        serde_json::from_value(json!({
            "pullRequestId": id,
            "title": format!("PR {id}"),
            "status": "active",
            "lastUpdateTime": updated,
            "createdBy": { "displayName": "Ada" },
            "repository": { "id": "r", "name": "repo" }
        }))
        .expect("pr json")
    }

    fn scope() -> FeedScope {
        FeedScope {
            org: "contoso".into(),
            projects: Some(vec!["Web".into()]),
            lookback_hours: Some(24),
            pr_top: 50,
            wi_top: 100,
        }
    }

    fn now() -> DateTime<Utc> {
        "2024-03-10T12:00:00Z".parse().expect("now")
    }

    fn service(api: Arc<CountingApi>) -> FeedService {
        FeedService::new(api, FeedCache::new(Arc::new(MemoryStore::new())), 5)
    }

    #[tokio::test]
    async fn fresh_cache_entry_skips_the_network() {
        let api = CountingApi::with_prs(vec![pr(1, "2024-03-10T08:00:00Z")]);
        let svc = service(api.clone());

        let first = svc
            .feed_at(&scope(), "pat", false, now())
            .await
            .expect("first");
        assert!(!first.from_cache);
        assert_eq!(first.posts.len(), 1);
        assert_eq!(first.new_ids.len(), 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        // One minute later the entry is still fresh.
        let later = now() + chrono::Duration::minutes(1);
        let second = svc
            .feed_at(&scope(), "pat", false, later)
            .await
            .expect("second");
        assert!(second.from_cache);
        assert_eq!(second.posts, first.posts);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.meta.posts_count, 1);
        assert_eq!(second.meta.pr_count, 1);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_a_fresh_cache() {
        let api = CountingApi::with_prs(vec![pr(1, "2024-03-10T08:00:00Z")]);
        let svc = service(api.clone());

        svc.feed_at(&scope(), "pat", false, now()).await.expect("first");
        let later = now() + chrono::Duration::minutes(1);
        let forced = svc
            .feed_at(&scope(), "pat", true, later)
            .await
            .expect("forced");
        assert!(!forced.from_cache);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        // Same upstream posts, so nothing is newly observed.
        assert!(forced.new_ids.is_empty());
    }

    #[tokio::test]
    async fn stale_cache_triggers_refresh_and_merges() {
        let api = CountingApi::with_prs(vec![pr(1, "2024-03-10T08:00:00Z")]);
        let svc = service(api.clone());

        svc.feed_at(&scope(), "pat", false, now()).await.expect("first");

        // Past the staleness threshold the same request refetches.
        let later = now() + chrono::Duration::minutes(6);
        let refreshed = svc
            .feed_at(&scope(), "pat", false, later)
            .await
            .expect("refresh");
        assert!(!refreshed.from_cache);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshed.posts.len(), 1);
    }

    #[tokio::test]
    async fn late_commit_for_abandoned_scope_is_discarded() {
        let api = CountingApi::with_prs(Vec::new());
        let svc = service(api);

        let fp_a = scope().fingerprint();
        svc.begin_scope(&fp_a);
        let mut other = scope();
        other.org = "fabrikam".into();
        svc.begin_scope(&other.fingerprint());

        let committed = svc.commit(&fp_a, &[], Vec::new(), 1_000);
        assert!(committed.is_none());

        // The active scope still commits.
        let committed = svc.commit(&other.fingerprint(), &[], Vec::new(), 1_000);
        assert!(committed.is_some());
    }

    #[tokio::test]
    async fn new_id_highlight_expires_after_ttl() {
        let api = CountingApi::with_prs(vec![pr(1, "2024-03-10T08:00:00Z")]);
        let svc = service(api);

        let snap = svc
            .feed_at(&scope(), "pat", false, now())
            .await
            .expect("feed");
        assert_eq!(snap.new_ids.len(), 1);

        let t0 = now().timestamp_millis() as u64;
        assert_eq!(svc.current_new_ids_at(t0 + NEW_HIGHLIGHT_TTL_MS).len(), 1);
        assert!(svc
            .current_new_ids_at(t0 + NEW_HIGHLIGHT_TTL_MS + 1)
            .is_empty());
        // Once expired, the set stays cleared.
        assert!(svc.current_new_ids_at(t0).is_empty());
    }
}
