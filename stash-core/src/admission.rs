//! Per-client admission bounds the HTTP shell applies in front of the
//! core: a token-bucket rate limiter and a counting semaphore capping
//! concurrent login attempts. Body-size and global-concurrency caps are
//! off-the-shelf `tower`/`tower-http` layers and live in `stash-server`
//! instead of here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};

/// Rate limiter configuration: requests per second and the burst size the
/// bucket can hold.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100.0,
            burst: 100,
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token-bucket rate limiter keyed by client identity (username, masked
/// token, or source IP for public requests).
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Consume one token for `identity`, refilling first based on elapsed
    /// time. Returns `false` if the bucket is empty.
    pub async fn check(&self, identity: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(identity.to_string()).or_insert_with(|| Bucket {
            tokens: self.config.burst as f64,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.requests_per_second)
            .min(self.config.burst as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets that haven't been touched in `idle_for`, so a rate
    /// limiter fronting a long-lived server doesn't grow unbounded with
    /// one-off identities.
    pub async fn sweep_idle(&self, idle_for: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < idle_for);
        before - buckets.len()
    }
}

/// Caps concurrent login-password-verification attempts, since Argon2 and
/// bcrypt are deliberately expensive to compute.
pub struct LoginAttemptBound {
    semaphore: Arc<Semaphore>,
}

impl LoginAttemptBound {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Try to reserve a verification slot. `None` means the bound is
    /// saturated; the caller should reject the request rather than queue
    /// it.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_requests_within_burst() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_second: 1.0,
            burst: 3,
        });
        assert!(limiter.check("alice").await);
        assert!(limiter.check("alice").await);
        assert!(limiter.check("alice").await);
        assert!(!limiter.check("alice").await);
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_second: 1000.0,
            burst: 1,
        });
        assert!(limiter.check("alice").await);
        assert!(!limiter.check("alice").await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(limiter.check("alice").await);
    }

    #[tokio::test]
    async fn tracks_identities_independently() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_second: 1.0,
            burst: 1,
        });
        assert!(limiter.check("alice").await);
        assert!(limiter.check("bob").await);
        assert!(!limiter.check("alice").await);
    }

    #[tokio::test]
    async fn sweep_idle_drops_untouched_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        limiter.check("alice").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let dropped = limiter.sweep_idle(Duration::from_millis(5)).await;
        assert_eq!(dropped, 1);
    }

    #[test]
    fn login_bound_rejects_once_saturated() {
        let bound = LoginAttemptBound::new(1);
        let first = bound.try_acquire();
        assert!(first.is_some());
        assert!(bound.try_acquire().is_none());
        drop(first);
        assert!(bound.try_acquire().is_some());
    }
}
