//! Sliding-window request throttling, keyed by caller identity.
//!
//! State is intentionally instance-local and resets on restart: this is a
//! best-effort abuse guard, not a correctness-critical ledger. Counters live
//! behind a plain mutex that is never held across an await point, and stale
//! timestamps are pruned by a cancellable background sweeper rather than on
//! the request path.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Outcome of a limiter check, returned for allowed and rejected calls alike
/// so well-behaved clients can self-throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the oldest counted request leaves the window.
    pub reset_after: Duration,
    /// Present only on rejection.
    pub retry_after: Option<Duration>,
}

/// At most `max_requests` actions per rolling `window`, per key.
pub struct SlidingWindowLimiter {
    name: &'static str,
    max_requests: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Vec<Instant>>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(name: &'static str, max_requests: u32, window: Duration) -> Self {
        Self {
            name,
            max_requests,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record an attempt under `key` and decide whether it is allowed.
    pub fn check(&self, key: &str) -> Verdict {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let stamps = buckets.entry(key.to_string()).or_default();
        stamps.retain(|stamp| now.duration_since(*stamp) < self.window);

        if stamps.len() < self.max_requests as usize {
            stamps.push(now);
            let oldest = stamps.first().copied().unwrap_or(now);
            let used = u32::try_from(stamps.len()).unwrap_or(u32::MAX);
            Verdict {
                allowed: true,
                limit: self.max_requests,
                remaining: self.max_requests.saturating_sub(used),
                reset_after: self.window.saturating_sub(now.duration_since(oldest)),
                retry_after: None,
            }
        } else {
            let oldest = stamps.first().copied().unwrap_or(now);
            let until_free = self.window.saturating_sub(now.duration_since(oldest));
            debug!(
                limiter = self.name,
                key, "rate limit exceeded, retry in {until_free:?}"
            );
            Verdict {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                reset_after: until_free,
                retry_after: Some(until_free),
            }
        }
    }

    /// Drop timestamps older than the window and empty buckets.
    ///
    /// Called by the background sweeper to bound memory; never needed for
    /// correctness since `check` prunes its own bucket.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        buckets.retain(|_, stamps| {
            stamps.retain(|stamp| now.duration_since(*stamp) < self.window);
            !stamps.is_empty()
        });
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The distinct logical limiters of the service. Each owns its own buckets,
/// so the same caller ip never shares quota across namespaces.
pub struct RateLimiters {
    pub login: SlidingWindowLimiter,
    pub refresh: SlidingWindowLimiter,
    pub global: SlidingWindowLimiter,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self {
            login: SlidingWindowLimiter::new("login", 10, Duration::from_secs(60)),
            refresh: SlidingWindowLimiter::new("refresh", 60, Duration::from_secs(60)),
            global: SlidingWindowLimiter::new("global", 300, Duration::from_secs(60)),
        }
    }
}

impl RateLimiters {
    fn sweep(&self) {
        self.login.sweep();
        self.refresh.sweep();
        self.global.sweep();
    }
}

/// Handle to the periodic sweep task, tied to process lifecycle so it can be
/// stopped cleanly on shutdown and in tests.
pub struct Sweeper {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.handle.await;
    }
}

/// Spawn the housekeeping task for a set of limiters.
#[must_use]
pub fn spawn_sweeper(limiters: std::sync::Arc<RateLimiters>, every: Duration) -> Sweeper {
    let (tx, mut rx) = mpsc::channel::<()>(1);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => limiters.sweep(),
                _ = rx.recv() => {
                    debug!("rate limit sweeper stopped");
                    break;
                }
            }
        }
    });
    Sweeper {
        shutdown: tx,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread::sleep;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = SlidingWindowLimiter::new("test", 3, Duration::from_secs(60));

        for expected_remaining in [2, 1, 0] {
            let verdict = limiter.check("1.2.3.4");
            assert!(verdict.allowed);
            assert_eq!(verdict.limit, 3);
            assert_eq!(verdict.remaining, expected_remaining);
            assert!(verdict.retry_after.is_none());
        }

        let verdict = limiter.check("1.2.3.4");
        assert!(!verdict.allowed);
        assert_eq!(verdict.remaining, 0);
        let retry_after = verdict.retry_after.expect("retry hint on rejection");
        assert!(retry_after <= Duration::from_secs(60));
        assert!(retry_after > Duration::ZERO);
    }

    #[test]
    fn window_elapse_frees_quota() {
        let limiter = SlidingWindowLimiter::new("test", 2, Duration::from_millis(40));
        assert!(limiter.check("key").allowed);
        assert!(limiter.check("key").allowed);
        assert!(!limiter.check("key").allowed);

        sleep(Duration::from_millis(50));
        assert!(limiter.check("key").allowed);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::new("test", 1, Duration::from_secs(60));
        assert!(limiter.check("1.1.1.1").allowed);
        assert!(!limiter.check("1.1.1.1").allowed);
        assert!(limiter.check("2.2.2.2").allowed);
    }

    #[test]
    fn namespaces_do_not_share_state() {
        let limiters = RateLimiters {
            login: SlidingWindowLimiter::new("login", 1, Duration::from_secs(60)),
            refresh: SlidingWindowLimiter::new("refresh", 1, Duration::from_secs(60)),
            global: SlidingWindowLimiter::new("global", 1, Duration::from_secs(60)),
        };
        assert!(limiters.login.check("9.9.9.9").allowed);
        assert!(!limiters.login.check("9.9.9.9").allowed);
        // Same ip, different namespace, fresh quota.
        assert!(limiters.refresh.check("9.9.9.9").allowed);
        assert!(limiters.global.check("9.9.9.9").allowed);
    }

    #[test]
    fn sweep_drops_stale_buckets() {
        let limiter = SlidingWindowLimiter::new("test", 5, Duration::from_millis(10));
        limiter.check("a");
        limiter.check("b");
        assert_eq!(limiter.bucket_count(), 2);

        sleep(Duration::from_millis(20));
        limiter.sweep();
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let limiters = Arc::new(RateLimiters::default());
        limiters.login.check("1.2.3.4");
        let sweeper = spawn_sweeper(limiters, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(10)).await;
        sweeper.shutdown().await;
    }
}
