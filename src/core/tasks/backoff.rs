// src/core/tasks/backoff.rs

//! Exponential backoff retry policies with jitter.

use rand::Rng;
use std::time::Duration;

/// An exponential backoff policy. The delay before attempt `n` (zero-based)
/// is `initial_interval * coefficient^n`, capped at `max_interval`. A policy
/// stops yielding delays once the accumulated elapsed time would exceed
/// `expiration_interval` or the attempt count reaches `max_attempts`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial_interval: Duration,
    backoff_coefficient: f64,
    max_interval: Duration,
    /// Total time budget across all attempts. `None` means unbounded.
    expiration_interval: Option<Duration>,
    /// Maximum number of attempts. `None` means unbounded.
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn new(initial_interval: Duration) -> Self {
        Self {
            initial_interval,
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(60),
            expiration_interval: None,
            max_attempts: None,
        }
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn with_expiration_interval(mut self, expiration: Duration) -> Self {
        self.expiration_interval = Some(expiration);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Returns the delay to sleep before retrying after `attempt` failures,
    /// given the time already spent since the first attempt. `None` means the
    /// retry budget is exhausted.
    pub fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if let Some(max_attempts) = self.max_attempts
            && attempt >= max_attempts
        {
            return None;
        }
        let exp = self.backoff_coefficient.powi(attempt as i32);
        let raw = self.initial_interval.as_secs_f64() * exp;
        let delay = Duration::from_secs_f64(raw.min(self.max_interval.as_secs_f64()));
        if let Some(expiration) = self.expiration_interval
            && elapsed + delay > expiration
        {
            return None;
        }
        Some(delay)
    }
}

/// Applies a symmetric jitter of `coefficient` around `base`: the result is
/// uniformly drawn from `[base * (1 - coefficient), base * (1 + coefficient)]`.
pub fn jit_duration(base: Duration, coefficient: f64) -> Duration {
    if coefficient <= 0.0 {
        return base;
    }
    let base_secs = base.as_secs_f64();
    let spread = base_secs * coefficient;
    let jittered = rand::thread_rng().gen_range((base_secs - spread)..=(base_secs + spread));
    Duration::from_secs_f64(jittered.max(0.0))
}
