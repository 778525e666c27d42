//! Retry and backoff policy.
//!
//! Classifies fetch failures (timeouts, throttling, connection failures, HTTP
//! status) and makes the exponential backoff decision in one place, so the
//! fetcher's retry loop stays a thin consumer of a pure policy.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify_curl_error, classify_http_status};
pub use error::{FetchError, FetchErrorKind};
pub use policy::{RetryDecision, RetryPolicy};
pub use run::run_with_retry;
