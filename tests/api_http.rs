// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /api/feed      (XHR guard, validation, happy path, cache, 502, 429)
// - POST /api/projects  (directory listing + upstream failure sanitization)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use azdo_newsfeed::api::{create_router, AppState};
use azdo_newsfeed::azdo::{AzdoApi, AzdoError, Project, PullRequest, WorkItem};
use azdo_newsfeed::cache::FeedCache;
use azdo_newsfeed::feed::FeedService;
use azdo_newsfeed::ratelimit::RateLimiter;
use azdo_newsfeed::store::MemoryStore;

const BODY_LIMIT: usize = 1 * 1024 * 1024; // 1MB, safe for tests

/// Upstream stand-in with canned payloads. `fail_status` makes every call
/// fail with that API status instead.
#[derive(Default)]
struct MockApi {
    projects: Vec<Project>,
    pull_requests: Vec<PullRequest>,
    work_items: Vec<WorkItem>,
    fail_status: Option<u16>,
}

impl MockApi {
    fn failing(status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Self::default()
        }
    }

    fn check_fail(&self) -> Result<(), AzdoError> {
        match self.fail_status {
            Some(status) => Err(AzdoError::Api(status)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AzdoApi for MockApi {
    async fn list_projects(&self, _org: &str, _pat: &str) -> Result<Vec<Project>, AzdoError> {
        self.check_fail()?;
        Ok(self.projects.clone())
    }

    async fn list_pull_requests(
        &self,
        _org: &str,
        _project: &str,
        _pat: &str,
        _top: u32,
    ) -> Result<Vec<PullRequest>, AzdoError> {
        self.check_fail()?;
        Ok(self.pull_requests.clone())
    }

    async fn query_work_item_ids_changed_since(
        &self,
        _org: &str,
        _project: &str,
        _pat: &str,
        _since_date: &str,
        _top: u32,
    ) -> Result<Vec<i64>, AzdoError> {
        self.check_fail()?;
        Ok(self.work_items.iter().map(|w| w.id).collect())
    }

    async fn work_items(
        &self,
        _org: &str,
        _project: &str,
        _pat: &str,
        ids: &[i64],
    ) -> Result<Vec<WorkItem>, AzdoError> {
        self.check_fail()?;
        Ok(self
            .work_items
            .iter()
            .filter(|w| ids.contains(&w.id))
            .cloned()
            .collect())
    }
}

fn pr(id: i64, updated: &str) -> PullRequest {
    serde_json::from_value(json!({
        "pullRequestId": id,
        "title": format!("PR {id}"),
        "status": "active",
        "lastUpdateTime": updated,
        "createdBy": { "displayName": "Ada", "uniqueName": "ada@contoso.example" },
        "repository": { "id": "r1", "name": "web" }
    }))
    .expect("pr json")
}

fn wi(id: i64, changed: &str) -> WorkItem {
    serde_json::from_value(json!({
        "id": id,
        "rev": 3,
        "fields": {
            "System.Title": format!("Task {id}"),
            "System.State": "Active",
            "System.WorkItemType": "Task",
            "System.ChangedDate": changed,
            "System.ChangedBy": { "displayName": "Grace", "uniqueName": "grace@contoso.example" }
        }
    }))
    .expect("wi json")
}

fn sample_api() -> MockApi {
    MockApi {
        projects: vec![Project {
            id: "p1".into(),
            name: "Web".into(),
        }],
        pull_requests: vec![pr(7, "2024-03-10T09:00:00Z")],
        work_items: vec![wi(42, "2024-03-10T10:00:00Z")],
        fail_status: None,
    }
}

/// Build the same Router the binary uses, backed by a mock upstream.
fn test_router(api: MockApi) -> Router {
    let state = AppState::new(Arc::new(api), Arc::new(MemoryStore::new()), 2);
    create_router(state)
}

/// Like [`test_router`], but with a custom feed-refresh budget.
fn test_router_with_feed_limit(api: MockApi, max_requests: usize) -> Router {
    let api: Arc<dyn AzdoApi> = Arc::new(api);
    let state = AppState {
        feed: Arc::new(FeedService::new(
            api.clone(),
            FeedCache::new(Arc::new(MemoryStore::new())),
            2,
        )),
        directory: api,
        feed_limiter: Arc::new(RateLimiter::new(max_requests, Duration::from_secs(60))),
        projects_limiter: Arc::new(RateLimiter::projects_default()),
    };
    create_router(state)
}

fn feed_request(body: Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/feed")
        .header("content-type", "application/json")
        .header("X-Requested-With", "XMLHttpRequest")
        .body(Body::from(body.to_string()))
        .expect("build POST /api/feed")
}

fn feed_body() -> Json {
    // `hours: null` keeps the window unbounded, so canned timestamps stay
    // inside scope no matter when the test runs.
    json!({
        "org": "contoso",
        "pat": "a".repeat(52),
        "hours": null,
        "projects": ["Web"]
    })
}

async fn read_json(resp: axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    serde_json::from_slice(&bytes).expect("parse response json")
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router(sample_api());

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let body = String::from_utf8(bytes).expect("utf8");
    assert_eq!(body.trim(), "ok", "health body should be 'ok'");
}

#[tokio::test]
async fn api_feed_without_xhr_header_is_refused() {
    let app = test_router(sample_api());

    let req = Request::builder()
        .method("POST")
        .uri("/api/feed")
        .header("content-type", "application/json")
        .body(Body::from(feed_body().to_string()))
        .expect("build POST /api/feed");

    let resp = app.oneshot(req).await.expect("oneshot /api/feed");
    assert_eq!(
        resp.status(),
        StatusCode::FORBIDDEN,
        "missing X-Requested-With must be refused"
    );
    let v = read_json(resp).await;
    assert_eq!(v["error"], "Invalid request");
}

#[tokio::test]
async fn api_feed_returns_posts_meta_and_flags() {
    let app = test_router(sample_api());

    let resp = app
        .oneshot(feed_request(feed_body()))
        .await
        .expect("oneshot /api/feed");
    assert_eq!(resp.status(), StatusCode::OK, "happy path should be 200");

    let v = read_json(resp).await;
    let posts = v["posts"].as_array().expect("'posts' must be an array");
    assert_eq!(posts.len(), 2, "one PR + one work item expected");

    // Sorted newest first: the work item changed after the PR updated.
    assert_eq!(posts[0]["type"], "work_item");
    assert_eq!(posts[1]["type"], "pull_request");

    let meta = &v["meta"];
    assert_eq!(meta["projectsRequested"], 1);
    assert_eq!(meta["projectsSucceeded"], 1);
    assert_eq!(meta["errorCount"], 0);
    assert_eq!(meta["since"], 0, "unbounded window reports since=0");
    assert_eq!(meta["postsCount"], 2);
    assert_eq!(meta["prCount"], 1);
    assert_eq!(meta["wiCount"], 1);

    let new_ids = v["newIds"].as_array().expect("'newIds' must be an array");
    assert_eq!(new_ids.len(), 2, "everything is new on the first fetch");
    assert_eq!(v["fromCache"], false);
}

#[tokio::test]
async fn api_feed_serves_repeat_request_from_cache() {
    let app = test_router(sample_api());

    let first = app
        .clone()
        .oneshot(feed_request(feed_body()))
        .await
        .expect("first oneshot");
    let first = read_json(first).await;
    assert_eq!(first["fromCache"], false);

    let second = app
        .oneshot(feed_request(feed_body()))
        .await
        .expect("second oneshot");
    let second = read_json(second).await;
    assert_eq!(
        second["fromCache"], true,
        "identical scope inside the staleness window must hit the cache"
    );
    assert_eq!(second["posts"], first["posts"]);
}

#[tokio::test]
async fn api_feed_rejects_invalid_org_with_400() {
    let app = test_router(sample_api());

    let mut body = feed_body();
    body["org"] = json!("bad org!");
    let resp = app
        .oneshot(feed_request(body))
        .await
        .expect("oneshot /api/feed");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let v = read_json(resp).await;
    assert_eq!(
        v["error"],
        "Organization name can only contain letters, numbers, hyphens, and underscores"
    );
}

#[tokio::test]
async fn api_feed_maps_total_upstream_failure_to_502() {
    let app = test_router(MockApi::failing(500));

    let resp = app
        .oneshot(feed_request(feed_body()))
        .await
        .expect("oneshot /api/feed");
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let v = read_json(resp).await;
    let error = v["error"].as_str().expect("'error' must be a string");
    assert!(
        error.contains("Azure DevOps API error (500)"),
        "combined stream error should survive sanitization, got '{error}'"
    );
    assert_eq!(v["meta"]["projectsRequested"], 1);
    assert_eq!(v["meta"]["projectsSucceeded"], 0);
    assert_eq!(v["meta"]["errorCount"], 1);
}

#[tokio::test]
async fn api_feed_over_budget_returns_429_with_retry_after() {
    let app = test_router_with_feed_limit(sample_api(), 1);

    let first = app
        .clone()
        .oneshot(feed_request(feed_body()))
        .await
        .expect("first oneshot");
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(feed_request(feed_body()))
        .await
        .expect("second oneshot");
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = second
        .headers()
        .get("retry-after")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse().ok())
        .expect("Retry-After must be a number of seconds");
    assert!(
        (1..=60).contains(&retry_after),
        "Retry-After should fall inside the window, got {retry_after}"
    );

    let v = read_json(second).await;
    let error = v["error"].as_str().expect("'error' must be a string");
    assert!(
        error.starts_with("Too many requests."),
        "429 body should explain the wait, got '{error}'"
    );
}

#[tokio::test]
async fn api_projects_lists_the_directory() {
    let app = test_router(sample_api());

    let payload = json!({ "org": "contoso", "pat": "a".repeat(52) });
    let req = Request::builder()
        .method("POST")
        .uri("/api/projects")
        .header("content-type", "application/json")
        .header("X-Requested-With", "XMLHttpRequest")
        .body(Body::from(payload.to_string()))
        .expect("build POST /api/projects");

    let resp = app.oneshot(req).await.expect("oneshot /api/projects");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = read_json(resp).await;
    let projects = v["projects"]
        .as_array()
        .expect("'projects' must be an array");
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["name"], "Web");
}

#[tokio::test]
async fn api_projects_sanitizes_auth_failures() {
    let app = test_router(MockApi::failing(401));

    let payload = json!({ "org": "contoso", "pat": "a".repeat(52) });
    let req = Request::builder()
        .method("POST")
        .uri("/api/projects")
        .header("content-type", "application/json")
        .header("X-Requested-With", "XMLHttpRequest")
        .body(Body::from(payload.to_string()))
        .expect("build POST /api/projects");

    let resp = app.oneshot(req).await.expect("oneshot /api/projects");
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let v = read_json(resp).await;
    assert_eq!(
        v["error"],
        "Authentication failed. Please check your Personal Access Token."
    );
}
