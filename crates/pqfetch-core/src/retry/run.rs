//! Retry loop: run an attempt until success or the policy gives up.

use super::error::FetchError;
use super::policy::{RetryDecision, RetryPolicy};

/// Runs `attempt` until it succeeds or the retry policy says to stop.
/// The closure receives the 1-based attempt number. On a retryable failure the
/// loop sleeps for the (jittered) backoff and tries again; the last error is
/// returned when attempts run out.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, mut attempt: F) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Result<T, FetchError>,
{
    let mut n = 1u32;
    loop {
        match attempt(n) {
            Ok(v) => return Ok(v),
            Err(e) => match policy.decide(n, e.kind) {
                RetryDecision::GiveUp => return Err(e),
                RetryDecision::RetryAfter(d) => {
                    let d = policy.with_jitter(d);
                    tracing::debug!(attempt = n, delay_ms = d.as_millis() as u64, error = %e, "retrying fetch");
                    std::thread::sleep(d);
                    n += 1;
                }
            },
        }
    }
}
