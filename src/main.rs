//! Azure DevOps Newsfeed — Binary Entrypoint
//! Boots the Axum HTTP server, wiring shared state, routes, and the
//! Prometheus exporter.
//!
//! See `README.md` for quickstart notes.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use azdo_newsfeed::api::{create_router, AppState};
use azdo_newsfeed::azdo::AzdoClient;
use azdo_newsfeed::cache::STALE_AFTER;
use azdo_newsfeed::config::AppConfig;
use azdo_newsfeed::metrics::Metrics;
use azdo_newsfeed::store::{JsonFileStore, KeyValueStore, MemoryStore};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - NEWSFEED_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("NEWSFEED_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("azdo_newsfeed=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let config = AppConfig::from_env();

    // The recorder is installed exactly once, here. Library code only emits
    // macros, which are no-ops until a recorder exists.
    let metrics = Metrics::init(STALE_AFTER.as_millis() as u64);

    let store: Arc<dyn KeyValueStore> = match &config.store_path {
        Some(path) => Arc::new(JsonFileStore::open(path)),
        None => Arc::new(MemoryStore::new()),
    };
    let api = Arc::new(AzdoClient::new(config.upstream_timeout));
    let state = AppState::new(api, store, config.sync_workers);

    let router = create_router(state).merge(metrics.router());
    Ok(router.into())
}
