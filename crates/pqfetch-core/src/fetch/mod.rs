//! Single-URL fetch with timeout and bounded retry.
//!
//! `Transport` is one GET attempt; `Fetcher` validates the URL, runs the
//! attempt under the retry policy and rejects empty bodies. Fetching touches no
//! shared state, so one `Fetcher` is shared by all download workers.

mod http;

pub use http::CurlTransport;

use crate::retry::{run_with_retry, FetchError, FetchErrorKind, RetryPolicy};
use std::time::Duration;

/// One HTTP GET attempt with a timeout. Returns the body of a 2xx response.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

/// Fetches URLs through a `Transport` with retry and backoff.
pub struct Fetcher<T> {
    transport: T,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            transport,
            policy,
            timeout,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch `url`, making up to `retries + 1` attempts.
    ///
    /// Malformed URLs fail before any network call. A zero-byte body counts as
    /// a retryable `EmptyPayload` failure.
    pub fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        validate_url(url)?;
        let url = url.trim();
        run_with_retry(&self.policy, |_| {
            let body = self.transport.get(url, self.timeout)?;
            if body.is_empty() {
                return Err(FetchError::new(
                    FetchErrorKind::EmptyPayload,
                    "response body was empty",
                ));
            }
            Ok(body)
        })
    }
}

/// Parse `raw` and require an http(s) URL with a host.
pub fn validate_url(raw: &str) -> Result<url::Url, FetchError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FetchError::new(FetchErrorKind::MalformedUrl, "empty URL"));
    }
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| FetchError::new(FetchErrorKind::MalformedUrl, format!("{}: {}", e, trimmed)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(parsed),
        scheme => Err(FetchError::new(
            FetchErrorKind::MalformedUrl,
            format!("unsupported URL scheme '{}'", scheme),
        )),
    }
}
