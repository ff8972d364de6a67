// src/sync/mod.rs
pub mod normalize;
pub mod types;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::azdo::{AzdoApi, AzdoError, WORK_ITEM_CHUNK_SIZE};
use crate::sync::types::{AggregateResult, FeedPost, FeedScope, FetchOutcome, SourceError};

/// Default worker count for the per-project fetch pool.
pub const DEFAULT_SYNC_WORKERS: usize = 5;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sync_runs_total", "Total synchronization runs started.");
        describe_counter!("sync_posts_total", "Posts gathered across all runs.");
        describe_counter!(
            "sync_projects_failed_total",
            "Projects where both upstream streams failed."
        );
        describe_counter!(
            "sync_pr_errors_total",
            "Pull-request stream errors in otherwise successful projects."
        );
        describe_counter!(
            "sync_wi_errors_total",
            "Work-item stream errors in otherwise successful projects."
        );
        describe_histogram!("sync_run_ms", "Wall-clock duration of one sync run.");
        describe_gauge!("sync_last_run_ts", "Unix ts when a sync run last finished.");
    });
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// The project directory lookup failed, so there was nothing to fetch.
    #[error(transparent)]
    Directory(#[from] AzdoError),
    /// Every requested project failed both streams. Carries the full error
    /// list so callers can still report per-project detail.
    #[error("{first_error}")]
    TotalFailure {
        first_error: String,
        projects_requested: usize,
        errors: Vec<SourceError>,
        since_ms: i64,
    },
}

/// Fetch both activity streams for one project. Each stream fails
/// independently; the outcome records errors instead of short-circuiting.
async fn fetch_project(
    api: &dyn AzdoApi,
    scope: &FeedScope,
    pat: &str,
    project: String,
    since: Option<DateTime<Utc>>,
    since_date: &str,
) -> FetchOutcome {
    let org = scope.org.as_str();

    let mut posts: Vec<FeedPost> = Vec::new();

    let pr_error = match api
        .list_pull_requests(org, &project, pat, scope.pr_top)
        .await
    {
        Ok(prs) => {
            posts.extend(
                prs.iter()
                    .filter_map(|pr| normalize::pull_request_post(org, &project, pr))
                    .filter(|post| since.map_or(true, |s| post.created_at >= s)),
            );
            None
        }
        Err(e) => {
            tracing::warn!(project = %project, error = %e, "pull request fetch failed");
            Some(e.to_string())
        }
    };

    let wi_error = match fetch_work_items(api, org, &project, pat, scope, since_date).await {
        Ok(items) => {
            posts.extend(
                items
                    .iter()
                    .filter_map(|wi| normalize::work_item_post(org, &project, wi))
                    .filter(|post| since.map_or(true, |s| post.created_at >= s)),
            );
            None
        }
        Err(e) => {
            tracing::warn!(project = %project, error = %e, "work item fetch failed");
            Some(e.to_string())
        }
    };

    FetchOutcome {
        project,
        pr_error,
        wi_error,
        posts,
    }
}

/// Two-step work-item retrieval: a WIQL id query, then batched reads capped
/// at [`WORK_ITEM_CHUNK_SIZE`] ids per call.
async fn fetch_work_items(
    api: &dyn AzdoApi,
    org: &str,
    project: &str,
    pat: &str,
    scope: &FeedScope,
    since_date: &str,
) -> Result<Vec<crate::azdo::WorkItem>, AzdoError> {
    let ids = api
        .query_work_item_ids_changed_since(org, project, pat, since_date, scope.wi_top)
        .await?;

    let mut out = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(WORK_ITEM_CHUNK_SIZE) {
        let mut items = api.work_items(org, project, pat, chunk).await?;
        out.append(&mut items);
    }
    Ok(out)
}

/// Run one full synchronization: resolve the project set, fetch every
/// project through a bounded worker pool, and aggregate with the
/// partial-failure rules (a project counts as failed only when both of its
/// streams failed).
pub async fn sync_feed(
    api: &dyn AzdoApi,
    scope: &FeedScope,
    pat: &str,
    workers: usize,
) -> Result<AggregateResult, SyncError> {
    sync_feed_at(api, scope, pat, workers, Utc::now()).await
}

/// [`sync_feed`] with an explicit `now`, so window filtering is testable.
pub async fn sync_feed_at(
    api: &dyn AzdoApi,
    scope: &FeedScope,
    pat: &str,
    workers: usize,
    now: DateTime<Utc>,
) -> Result<AggregateResult, SyncError> {
    ensure_metrics_described();
    counter!("sync_runs_total").increment(1);
    let started = Instant::now();

    let projects = match &scope.projects {
        Some(list) => list.clone(),
        None => api
            .list_projects(&scope.org, pat)
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect(),
    };

    let since = scope.window_start(now);
    let since_ms = since.map(|s| s.timestamp_millis()).unwrap_or(0);
    // WIQL comparisons are day-granular; an unbounded scope queries from
    // the epoch, which upstream treats as all-time.
    let since_date = since
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .format("%Y-%m-%d")
        .to_string();

    let queue: Mutex<VecDeque<String>> = Mutex::new(projects.iter().cloned().collect());
    let worker_count = workers.max(1).min(projects.len().max(1));

    let worker_futs = (0..worker_count).map(|_| {
        let queue = &queue;
        let since_date = since_date.as_str();
        async move {
            let mut outcomes = Vec::new();
            loop {
                // Lock is scoped to the pop; never held across an await.
                let next = queue.lock().expect("project queue poisoned").pop_front();
                let Some(project) = next else { break };
                outcomes.push(fetch_project(api, scope, pat, project, since, since_date).await);
            }
            outcomes
        }
    });

    let outcomes: Vec<FetchOutcome> = join_all(worker_futs).await.into_iter().flatten().collect();

    let mut posts: Vec<FeedPost> = Vec::new();
    let mut errors: Vec<SourceError> = Vec::new();
    let mut pr_error_count = 0usize;
    let mut wi_error_count = 0usize;
    let mut projects_succeeded = 0usize;

    for outcome in outcomes {
        match (&outcome.pr_error, &outcome.wi_error) {
            (Some(pr), Some(wi)) => {
                // Both streams down: the project is failed and reports one
                // combined message. Per-stream counters track partial
                // failures only.
                errors.push(SourceError {
                    project: outcome.project.clone(),
                    message: format!("PRs: {pr}; Work items: {wi}"),
                });
                counter!("sync_projects_failed_total").increment(1);
            }
            (pr_error, wi_error) => {
                projects_succeeded += 1;
                if let Some(pr) = pr_error {
                    errors.push(SourceError {
                        project: outcome.project.clone(),
                        message: format!("PRs: {pr}"),
                    });
                    pr_error_count += 1;
                    counter!("sync_pr_errors_total").increment(1);
                }
                if let Some(wi) = wi_error {
                    errors.push(SourceError {
                        project: outcome.project.clone(),
                        message: format!("Work items: {wi}"),
                    });
                    wi_error_count += 1;
                    counter!("sync_wi_errors_total").increment(1);
                }
                posts.extend(outcome.posts);
            }
        }
    }

    // Newest first; stable so same-timestamp posts keep fetch order.
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    if projects_succeeded == 0 && !projects.is_empty() {
        let first_error = errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "Unable to fetch Azure DevOps data".to_string());
        return Err(SyncError::TotalFailure {
            first_error,
            projects_requested: projects.len(),
            errors,
            since_ms,
        });
    }

    counter!("sync_posts_total").increment(posts.len() as u64);
    histogram!("sync_run_ms").record(started.elapsed().as_millis() as f64);
    gauge!("sync_last_run_ts").set(now.timestamp().max(0) as f64);

    Ok(AggregateResult {
        posts,
        projects_requested: projects.len(),
        projects_succeeded,
        errors,
        pr_error_count,
        wi_error_count,
        since_ms,
    })
}
