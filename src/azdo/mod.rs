//! # Azure DevOps client
//!
//! Thin REST client for the three upstream surfaces the feed engine needs:
//! the project directory, the pull-request stream, and the two-step
//! work-item stream (WIQL id query + batched retrieval).
//!
//! Everything is behind the [`AzdoApi`] trait so the orchestrator and the
//! HTTP layer can be exercised against mocks. The real client speaks
//! `api-version=7.1`, authenticates with a PAT over Basic auth (empty
//! username), and bounds every call with a fixed timeout.

pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use urlencoding::encode;

pub use types::{Identity, ListEnvelope, Project, PullRequest, WiqlResult, WorkItem};

/// Work-item batch retrieval has practical payload limits upstream.
pub const WORK_ITEM_CHUNK_SIZE: usize = 200;

const API_VERSION: &str = "7.1";

/// Fixed field list for work-item retrieval, kept intentionally small.
const WORK_ITEM_FIELDS: [&str; 6] = [
    "System.Id",
    "System.Title",
    "System.State",
    "System.WorkItemType",
    "System.ChangedDate",
    "System.ChangedBy",
];

#[derive(Debug, Error)]
pub enum AzdoError {
    /// Non-2xx upstream response. Only the status code is surfaced; bodies
    /// may contain account details and are never echoed back.
    #[error("Azure DevOps API error ({0})")]
    Api(u16),
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    /// WIQL only accepts day-granularity dates; anything that is not a
    /// strict `YYYY-MM-DD` is rejected before it can reach the query text.
    #[error("invalid date format")]
    InvalidSinceDate,
    #[error("{0}")]
    Transport(reqwest::Error),
}

impl AzdoError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AzdoError::Timeout { .. })
    }
}

#[async_trait]
pub trait AzdoApi: Send + Sync {
    /// Directory lookup: every project in the organization.
    async fn list_projects(&self, org: &str, pat: &str) -> Result<Vec<Project>, AzdoError>;

    /// Activity stream A: pull requests in any state, server-capped at
    /// `top`, no server-side time filter.
    async fn list_pull_requests(
        &self,
        org: &str,
        project: &str,
        pat: &str,
        top: u32,
    ) -> Result<Vec<PullRequest>, AzdoError>;

    /// Activity stream B, step one: ids of work items changed at or after
    /// `since_date` (strict `YYYY-MM-DD`), newest first, truncated
    /// client-side to `max(1, top)` because WIQL has no TOP clause.
    async fn query_work_item_ids_changed_since(
        &self,
        org: &str,
        project: &str,
        pat: &str,
        since_date: &str,
        top: u32,
    ) -> Result<Vec<i64>, AzdoError>;

    /// Activity stream B, step two: retrieve one chunk of work items by id
    /// with the fixed field list. Callers chunk to [`WORK_ITEM_CHUNK_SIZE`].
    async fn work_items(
        &self,
        org: &str,
        project: &str,
        pat: &str,
        ids: &[i64],
    ) -> Result<Vec<WorkItem>, AzdoError>;
}

static SINCE_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("since-date regex"));

pub fn validate_since_date(date: &str) -> Result<(), AzdoError> {
    if SINCE_DATE_RE.is_match(date) {
        Ok(())
    } else {
        Err(AzdoError::InvalidSinceDate)
    }
}

/// Production client over `reqwest`.
pub struct AzdoClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl AzdoClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    fn apply_common(&self, req: reqwest::RequestBuilder, pat: &str) -> reqwest::RequestBuilder {
        // PAT goes in as Basic auth with an empty username.
        req.basic_auth("", Some(pat))
            .header(reqwest::header::ACCEPT, "application/json")
            .header("X-Requested-With", "XMLHttpRequest")
            .timeout(self.timeout)
    }

    fn map_send_error(&self, url: &str, err: reqwest::Error) -> AzdoError {
        if err.is_timeout() {
            AzdoError::Timeout {
                url: url.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AzdoError::Transport(err)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, pat: &str) -> Result<T, AzdoError> {
        let resp = self
            .apply_common(self.http.get(url), pat)
            .send()
            .await
            .map_err(|e| self.map_send_error(url, e))?;
        Self::decode(url, resp, self.timeout).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        pat: &str,
        body: &B,
    ) -> Result<T, AzdoError> {
        let resp = self
            .apply_common(self.http.post(url), pat)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(url, e))?;
        Self::decode(url, resp, self.timeout).await
    }

    async fn decode<T: DeserializeOwned>(
        url: &str,
        resp: reqwest::Response,
        timeout: Duration,
    ) -> Result<T, AzdoError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(AzdoError::Api(status.as_u16()));
        }
        resp.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                AzdoError::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                AzdoError::Transport(e)
            }
        })
    }
}

#[async_trait]
impl AzdoApi for AzdoClient {
    async fn list_projects(&self, org: &str, pat: &str) -> Result<Vec<Project>, AzdoError> {
        let url = format!(
            "https://dev.azure.com/{}/_apis/projects?api-version={}",
            encode(org),
            API_VERSION
        );
        let data: ListEnvelope<Project> = self.get_json(&url, pat).await?;
        Ok(data.value)
    }

    async fn list_pull_requests(
        &self,
        org: &str,
        project: &str,
        pat: &str,
        top: u32,
    ) -> Result<Vec<PullRequest>, AzdoError> {
        let url = format!(
            "https://dev.azure.com/{}/{}/_apis/git/pullrequests?searchCriteria.status=all&$top={}&api-version={}",
            encode(org),
            encode(project),
            top,
            API_VERSION
        );
        let data: ListEnvelope<PullRequest> = self.get_json(&url, pat).await?;
        Ok(data.value)
    }

    async fn query_work_item_ids_changed_since(
        &self,
        org: &str,
        project: &str,
        pat: &str,
        since_date: &str,
        top: u32,
    ) -> Result<Vec<i64>, AzdoError> {
        validate_since_date(since_date)?;

        let url = format!(
            "https://dev.azure.com/{}/{}/_apis/wit/wiql?api-version={}",
            encode(org),
            encode(project),
            API_VERSION
        );

        // @project scopes the query; a fixed date literal avoids WIQL macro
        // ambiguity. Some organizations reject any time component here.
        let query = format!(
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = @project \
             AND [System.ChangedDate] >= '{since_date}' ORDER BY [System.ChangedDate] DESC"
        );
        let body = serde_json::json!({ "query": query });

        let data: WiqlResult = self.post_json(&url, pat, &body).await?;
        let cap = top.max(1) as usize;
        Ok(data
            .work_items
            .into_iter()
            .map(|w| w.id)
            .take(cap)
            .collect())
    }

    async fn work_items(
        &self,
        org: &str,
        project: &str,
        pat: &str,
        ids: &[i64],
    ) -> Result<Vec<WorkItem>, AzdoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let id_list = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let fields = WORK_ITEM_FIELDS.join(",");
        let url = format!(
            "https://dev.azure.com/{}/{}/_apis/wit/workitems?ids={}&fields={}&api-version={}",
            encode(org),
            encode(project),
            id_list,
            encode(&fields),
            API_VERSION
        );
        let data: ListEnvelope<WorkItem> = self.get_json(&url, pat).await?;
        Ok(data.value)
    }
}
