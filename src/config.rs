// src/config.rs
//
// Process configuration from the environment (dotenv-friendly). Per-user
// credentials never live here: the organization and PAT arrive with each
// request. These knobs only shape how the service itself behaves.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::sync::DEFAULT_SYNC_WORKERS;

const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Size of the per-project fetch worker pool.
    pub sync_workers: usize,
    /// Bound on every individual upstream HTTP call.
    pub upstream_timeout: Duration,
    /// Cache persistence file; `None` keeps the cache in memory only.
    pub store_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sync_workers: DEFAULT_SYNC_WORKERS,
            upstream_timeout: Duration::from_millis(DEFAULT_UPSTREAM_TIMEOUT_MS),
            store_path: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sync_workers: env_parse("SYNC_WORKERS")
                .filter(|&w: &usize| w >= 1)
                .unwrap_or(defaults.sync_workers),
            upstream_timeout: env_parse("UPSTREAM_TIMEOUT_MS")
                .filter(|&ms: &u64| ms >= 1)
                .map(Duration::from_millis)
                .unwrap_or(defaults.upstream_timeout),
            store_path: env::var("STORE_PATH").ok().filter(|p| !p.is_empty()).map(PathBuf::from),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.sync_workers, 5);
        assert_eq!(cfg.upstream_timeout, Duration::from_millis(30_000));
        assert!(cfg.store_path.is_none());
    }
}
