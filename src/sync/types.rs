// src/sync/types.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Kind discriminator for feed posts. Wire format matches the UI contract
/// (`pull_request`, `work_item`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedPostKind {
    PullRequest,
    WorkItem,
    Commit,
    Build,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub display_name: String,
    pub unique_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestDetail {
    pub id: i64,
    pub title: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemDetail {
    pub id: i64,
    pub title: String,
    pub state: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One normalized upstream event.
///
/// `id` is a deterministic function of (kind, project, native id, revision,
/// event timestamp), so re-fetching the same upstream event always produces
/// the same id. It is the dedup key for [`crate::cache::merge_posts`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FeedPostKind,
    pub org: String,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub actor: Actor,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_item: Option<WorkItemDetail>,
}

/// One synchronization target: organization + project selection + time
/// window + per-stream caps. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedScope {
    pub org: String,
    /// `None` means every project in the organization.
    pub projects: Option<Vec<String>>,
    /// `None` means all time.
    pub lookback_hours: Option<u32>,
    pub pr_top: u32,
    pub wi_top: u32,
}

impl FeedScope {
    /// Stable cache-partition key. Project order does not matter: the list
    /// is sorted before serialization.
    pub fn fingerprint(&self) -> String {
        let projects = match &self.projects {
            None => "*".to_string(),
            Some(list) => {
                let mut sorted = list.clone();
                sorted.sort();
                sorted.join(",")
            }
        };
        let lookback = match self.lookback_hours {
            None => "all".to_string(),
            Some(h) => h.to_string(),
        };
        format!(
            "org={}|projects={}|lookback={}|prTop={}|wiTop={}",
            self.org, projects, lookback, self.pr_top, self.wi_top
        )
    }

    /// Start of the time window, or `None` for an unbounded scope.
    pub fn window_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lookback_hours
            .map(|h| now - Duration::hours(i64::from(h)))
    }
}

/// Per-project fetch result. A project is failed only when both sub-fetches
/// failed; either error alone still leaves the project counted as succeeded.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub project: String,
    pub pr_error: Option<String>,
    pub wi_error: Option<String>,
    pub posts: Vec<FeedPost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    pub project: String,
    pub message: String,
}

/// Outcome of one whole synchronization run.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    /// All gathered posts, sorted descending by event timestamp.
    pub posts: Vec<FeedPost>,
    pub projects_requested: usize,
    pub projects_succeeded: usize,
    /// Combined error list: per-stream messages for partially failed
    /// projects plus one combined message per fully failed project.
    pub errors: Vec<SourceError>,
    pub pr_error_count: usize,
    pub wi_error_count: usize,
    /// Window start in unix millis; 0 for an unbounded scope.
    pub since_ms: i64,
}
