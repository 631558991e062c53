// src/core/tasks/rate_limit.rs

//! A token-bucket rate limiter used to bound queue polling per host and per shard.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// A token bucket refilled at `rps` tokens per second with a burst capacity.
/// Callers either probe with [`RateLimiter::allow`] or compute how long to
/// wait with [`RateLimiter::reserve_delay`].
#[derive(Debug)]
pub struct RateLimiter {
    rps: f64,
    burst: f64,
    inner: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(rps: f64, burst: usize) -> Self {
        let burst = (burst.max(1)) as f64;
        Self {
            rps: rps.max(f64::MIN_POSITIVE),
            burst,
            inner: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rps).min(self.burst);
        bucket.last_refill = now;
    }

    /// Takes one token if available. Returns `false` when the caller should
    /// throttle.
    pub fn allow(&self) -> bool {
        let mut bucket = self.inner.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Takes one token, going negative if necessary, and returns how long the
    /// caller must wait before the reservation is honored. `Duration::ZERO`
    /// means no waiting is needed.
    pub fn reserve_delay(&self) -> Duration {
        let mut bucket = self.inner.lock();
        self.refill(&mut bucket);
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.rps)
        }
    }

    /// Waits until a token is available.
    pub async fn acquire(&self) {
        let delay = self.reserve_delay();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_throttle() {
        let limiter = RateLimiter::new(1.0, 2);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn reserve_delay_grows_under_pressure() {
        let limiter = RateLimiter::new(10.0, 1);
        assert_eq!(limiter.reserve_delay(), Duration::ZERO);
        let first = limiter.reserve_delay();
        let second = limiter.reserve_delay();
        assert!(first > Duration::ZERO);
        assert!(second > first);
    }
}
