use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics::counter;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::azdo::AzdoApi;
use crate::cache::FeedCache;
use crate::feed::{FeedMeta, FeedService};
use crate::ratelimit::RateLimiter;
use crate::store::KeyValueStore;
use crate::sync::types::{FeedPost, FeedScope};
use crate::sync::SyncError;
use crate::validation::{
    sanitize_error_message, validate_lookback_hours, validate_org, validate_pat, validate_pr_top,
    validate_projects, validate_wi_top, ValidationError,
};

pub const DEFAULT_LOOKBACK_HOURS: u32 = 24;
pub const DEFAULT_PR_TOP: u32 = 50;
pub const DEFAULT_WI_TOP: u32 = 100;

const FEED_RATE_KEY: &str = "feed-refresh";
const PROJECTS_RATE_KEY: &str = "projects-list";

#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<FeedService>,
    pub directory: Arc<dyn AzdoApi>,
    pub feed_limiter: Arc<RateLimiter>,
    pub projects_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Standard wiring: one upstream client shared by the feed service and
    /// the project directory endpoint, default per-endpoint rate budgets.
    pub fn new(api: Arc<dyn AzdoApi>, store: Arc<dyn KeyValueStore>, workers: usize) -> Self {
        Self {
            feed: Arc::new(FeedService::new(
                api.clone(),
                FeedCache::new(store),
                workers,
            )),
            directory: api,
            feed_limiter: Arc::new(RateLimiter::feed_default()),
            projects_limiter: Arc::new(RateLimiter::projects_default()),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/feed", post(feed))
        .route("/api/projects", post(projects))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Distinguishes an absent field from an explicit `null`: absent keeps the
/// default lookback window, `null` means all time.
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRequest {
    pub org: String,
    pub pat: String,
    #[serde(default, deserialize_with = "double_option")]
    pub hours: Option<Option<u32>>,
    #[serde(default)]
    pub projects: Option<Vec<String>>,
    #[serde(default)]
    pub pr_top: Option<u32>,
    #[serde(default)]
    pub wi_top: Option<u32>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProjectsRequest {
    pub org: String,
    pub pat: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedResponse {
    posts: Vec<FeedPost>,
    meta: FeedMeta,
    new_ids: Vec<String>,
    from_cache: bool,
}

fn feed_scope(req: &FeedRequest) -> Result<FeedScope, ValidationError> {
    validate_org(&req.org)?;
    validate_pat(&req.pat)?;
    if let Some(projects) = &req.projects {
        validate_projects(projects)?;
    }

    let lookback_hours = match req.hours {
        None => Some(DEFAULT_LOOKBACK_HOURS),
        Some(None) => None,
        Some(Some(h)) => {
            validate_lookback_hours(h)?;
            Some(h)
        }
    };
    let pr_top = req.pr_top.unwrap_or(DEFAULT_PR_TOP);
    validate_pr_top(pr_top)?;
    let wi_top = req.wi_top.unwrap_or(DEFAULT_WI_TOP);
    validate_wi_top(wi_top)?;

    Ok(FeedScope {
        org: req.org.clone(),
        projects: req.projects.clone(),
        lookback_hours,
        pr_top,
        wi_top,
    })
}

/// Browser clients must mark requests as XHR; plain form posts are refused.
fn require_xhr(headers: &HeaderMap) -> Result<(), Response> {
    match headers.get("X-Requested-With").and_then(|v| v.to_str().ok()) {
        Some("XMLHttpRequest") => Ok(()),
        _ => Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Invalid request" })),
        )
            .into_response()),
    }
}

fn check_rate(limiter: &RateLimiter, key: &str) -> Result<(), Response> {
    if limiter.check(key) {
        return Ok(());
    }
    counter!("rate_limit_rejections_total", "bucket" => key.to_string()).increment(1);
    let retry_after_secs = limiter.time_until_reset(key).div_ceil(1000);
    Err((
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after_secs.to_string())],
        Json(json!({
            "error": format!(
                "Too many requests. Please wait {retry_after_secs} seconds before refreshing."
            )
        })),
    )
        .into_response())
}

fn bad_request(e: ValidationError) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
}

async fn feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FeedRequest>,
) -> Response {
    if let Err(resp) = require_xhr(&headers) {
        return resp;
    }
    if let Err(resp) = check_rate(&state.feed_limiter, FEED_RATE_KEY) {
        return resp;
    }
    let scope = match feed_scope(&req) {
        Ok(s) => s,
        Err(e) => return bad_request(e),
    };

    match state.feed.feed(&scope, &req.pat, req.force).await {
        Ok(snapshot) => Json(FeedResponse {
            posts: snapshot.posts,
            meta: snapshot.meta,
            new_ids: snapshot.new_ids,
            from_cache: snapshot.from_cache,
        })
        .into_response(),
        Err(SyncError::TotalFailure {
            first_error,
            projects_requested,
            errors,
            since_ms,
        }) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": sanitize_error_message(&first_error),
                "meta": {
                    "projectsRequested": projects_requested,
                    "projectsSucceeded": 0,
                    "errorCount": errors.len(),
                    "since": since_ms,
                }
            })),
        )
            .into_response(),
        Err(SyncError::Directory(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": sanitize_error_message(&e.to_string()) })),
        )
            .into_response(),
    }
}

async fn projects(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ProjectsRequest>,
) -> Response {
    if let Err(resp) = require_xhr(&headers) {
        return resp;
    }
    if let Err(resp) = check_rate(&state.projects_limiter, PROJECTS_RATE_KEY) {
        return resp;
    }
    if let Err(e) = validate_org(&req.org).and_then(|()| validate_pat(&req.pat)) {
        return bad_request(e);
    }

    match state.directory.list_projects(&req.org, &req.pat).await {
        Ok(projects) => Json(json!({ "projects": projects })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": sanitize_error_message(&e.to_string()) })),
        )
            .into_response(),
    }
}
