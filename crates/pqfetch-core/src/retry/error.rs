//! Per-row fetch failure type.

use std::fmt;
use thiserror::Error;

/// Classification of a failed fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Connect or transfer exceeded the request timeout.
    Timeout,
    /// Network-level failure (reset, refused, DNS, closed mid-transfer).
    ConnectionReset,
    /// HTTP 5xx.
    ServerError(u16),
    /// HTTP 429.
    RateLimited,
    /// HTTP 4xx other than 429.
    ClientError(u16),
    /// 2xx response with an empty body.
    EmptyPayload,
    /// URL missing, unparsable, or not http/https.
    MalformedUrl,
    /// Anything else the transport reports (TLS, redirect loops, odd status).
    Other,
}

impl FetchErrorKind {
    /// Whether another attempt may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FetchErrorKind::Timeout
                | FetchErrorKind::ConnectionReset
                | FetchErrorKind::ServerError(_)
                | FetchErrorKind::RateLimited
                | FetchErrorKind::EmptyPayload
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FetchErrorKind::Timeout => "Timeout",
            FetchErrorKind::ConnectionReset => "ConnectionReset",
            FetchErrorKind::ServerError(_) => "ServerError",
            FetchErrorKind::RateLimited => "RateLimited",
            FetchErrorKind::ClientError(_) => "ClientError",
            FetchErrorKind::EmptyPayload => "EmptyPayload",
            FetchErrorKind::MalformedUrl => "MalformedUrl",
            FetchErrorKind::Other => "Other",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a fetch once retries are exhausted (or immediately for
/// non-retryable kinds). Its display form is what lands in the `error` column.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub detail: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn http(code: u16, kind: FetchErrorKind) -> Self {
        Self::new(kind, format!("HTTP {}", code))
    }
}
