//! # Sliding-window rate limiter
//! Per-key request budgets over a rolling time window.
//!
//! Keys partition independent buckets (for example one per endpoint).
//! Expired entries are pruned on every touch, so memory stays bounded by
//! the number of admitted requests inside the window. Limiters are plain
//! values handed to their consumers; nothing here is process-global.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Thread-safe sliding-window limiter: at most `max_requests` admissions
/// per key within the trailing `window`.
#[derive(Debug)]
pub struct RateLimiter {
    inner: Mutex<Inner>,
    max_requests: usize,
    window: Duration,
}

#[derive(Debug)]
struct Inner {
    /// Admission timestamps in unix millis, oldest at the front.
    buckets: HashMap<String, VecDeque<u64>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buckets: HashMap::new(),
            }),
            max_requests,
            window,
        }
    }

    /// Default budget for feed refreshes: 10 per minute.
    pub fn feed_default() -> Self {
        Self::new(10, Duration::from_secs(60))
    }

    /// Default budget for project directory lookups: 20 per minute.
    pub fn projects_default() -> Self {
        Self::new(20, Duration::from_secs(60))
    }

    /// Try to admit one request for `key`. Returns `false` when the window
    /// already holds `max_requests` admissions; a denied request is not
    /// recorded and does not extend anyone's wait.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, now_ms())
    }

    /// [`check`](Self::check) with an explicit clock.
    pub fn check_at(&self, key: &str, now_ms: u64) -> bool {
        let window_ms = self.window.as_millis() as u64;
        let mut inner = self.inner.lock().expect("rate limiter mutex poisoned");
        let bucket = inner.buckets.entry(key.to_string()).or_default();

        prune(bucket, now_ms, window_ms);

        if bucket.len() >= self.max_requests {
            return false;
        }
        bucket.push_back(now_ms);
        true
    }

    /// Milliseconds until the oldest admission leaves the window, or 0 when
    /// the key has headroom right now.
    pub fn time_until_reset(&self, key: &str) -> u64 {
        self.time_until_reset_at(key, now_ms())
    }

    /// [`time_until_reset`](Self::time_until_reset) with an explicit clock.
    pub fn time_until_reset_at(&self, key: &str, now_ms: u64) -> u64 {
        let window_ms = self.window.as_millis() as u64;
        let mut inner = self.inner.lock().expect("rate limiter mutex poisoned");
        let Some(bucket) = inner.buckets.get_mut(key) else {
            return 0;
        };

        prune(bucket, now_ms, window_ms);

        match bucket.front() {
            Some(&oldest) => (oldest + window_ms).saturating_sub(now_ms),
            None => 0,
        }
    }

    /// Forget one key's history.
    pub fn reset(&self, key: &str) {
        self.inner
            .lock()
            .expect("rate limiter mutex poisoned")
            .buckets
            .remove(key);
    }

    /// Forget everything.
    pub fn reset_all(&self) {
        self.inner
            .lock()
            .expect("rate limiter mutex poisoned")
            .buckets
            .clear();
    }
}

fn prune(bucket: &mut VecDeque<u64>, now_ms: u64, window_ms: u64) {
    while let Some(&t) = bucket.front() {
        if now_ms.saturating_sub(t) >= window_ms {
            bucket.pop_front();
        } else {
            break;
        }
    }
}

/// Current UNIX time in milliseconds.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: usize) -> RateLimiter {
        RateLimiter::new(max, Duration::from_secs(60))
    }

    #[test]
    fn admits_up_to_max_then_denies() {
        let rl = limiter(3);
        assert!(rl.check_at("feed", 1_000));
        assert!(rl.check_at("feed", 1_001));
        assert!(rl.check_at("feed", 1_002));
        assert!(!rl.check_at("feed", 1_003));
    }

    #[test]
    fn denied_request_is_not_recorded() {
        let rl = limiter(1);
        assert!(rl.check_at("feed", 0));
        // Hammering while denied must not push the reset point out.
        for t in 1..100 {
            assert!(!rl.check_at("feed", t));
        }
        assert_eq!(rl.time_until_reset_at("feed", 100), 60_000 - 100);
    }

    #[test]
    fn window_slides_and_oldest_expiry_reopens_the_budget() {
        let rl = limiter(2);
        assert!(rl.check_at("feed", 0));
        assert!(rl.check_at("feed", 30_000));
        assert!(!rl.check_at("feed", 59_999));
        // At 60s the first admission has aged out.
        assert!(rl.check_at("feed", 60_000));
        assert!(!rl.check_at("feed", 60_001));
    }

    #[test]
    fn time_until_reset_tracks_the_oldest_admission() {
        let rl = limiter(2);
        assert_eq!(rl.time_until_reset_at("feed", 0), 0);
        assert!(rl.check_at("feed", 10_000));
        assert!(rl.check_at("feed", 20_000));
        assert_eq!(rl.time_until_reset_at("feed", 25_000), 45_000);
        assert_eq!(rl.time_until_reset_at("feed", 70_000), 10_000);
        assert_eq!(rl.time_until_reset_at("feed", 90_000), 0);
    }

    #[test]
    fn keys_are_independent() {
        let rl = limiter(1);
        assert!(rl.check_at("feed", 0));
        assert!(rl.check_at("projects", 0));
        assert!(!rl.check_at("feed", 1));
    }

    #[test]
    fn reset_clears_one_key_only() {
        let rl = limiter(1);
        assert!(rl.check_at("feed", 0));
        assert!(rl.check_at("projects", 0));
        rl.reset("feed");
        assert!(rl.check_at("feed", 1));
        assert!(!rl.check_at("projects", 1));
        rl.reset_all();
        assert!(rl.check_at("projects", 2));
    }

    #[test]
    fn separate_instances_share_nothing() {
        let a = RateLimiter::feed_default();
        let b = RateLimiter::feed_default();
        for _ in 0..10 {
            assert!(a.check_at("feed", 0));
        }
        assert!(!a.check_at("feed", 0));
        assert!(b.check_at("feed", 0));
    }
}
