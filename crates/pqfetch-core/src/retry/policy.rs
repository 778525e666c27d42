use rand::Rng;
use std::time::Duration;

use super::error::FetchErrorKind;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Stop and surface the last error.
    GiveUp,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff with a cap: `retries + 1` attempts at most.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Upper bound on backoff delay, jitter included.
    pub max_delay: Duration,
    /// Add random jitter on top of the backoff delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed with `kind`.
    ///
    /// Pure: no jitter, no clock. `with_jitter` is applied by the caller.
    pub fn decide(&self, attempt: u32, kind: FetchErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts() || !kind.is_retryable() {
            return RetryDecision::GiveUp;
        }
        // base * 2^(attempt-1), capped.
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(exp);
        RetryDecision::RetryAfter(raw.min(self.max_delay))
    }

    /// Add uniform jitter of 0..=100% of `delay`, keeping the cap.
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        let jittered = Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor));
        jittered.min(self.max_delay)
    }
}
