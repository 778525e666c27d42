//! Classify HTTP status and curl errors into fetch error kinds.

use super::error::FetchErrorKind;

/// Classify an HTTP status code. `None` means success (2xx).
pub fn classify_http_status(code: u32) -> Option<FetchErrorKind> {
    let code16 = u16::try_from(code).unwrap_or(u16::MAX);
    match code {
        200..=299 => None,
        429 => Some(FetchErrorKind::RateLimited),
        400..=499 => Some(FetchErrorKind::ClientError(code16)),
        500..=599 => Some(FetchErrorKind::ServerError(code16)),
        _ => Some(FetchErrorKind::Other),
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> FetchErrorKind {
    if e.is_operation_timedout() {
        return FetchErrorKind::Timeout;
    }
    if e.is_url_malformed() || e.is_unsupported_protocol() {
        return FetchErrorKind::MalformedUrl;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return FetchErrorKind::ConnectionReset;
    }
    FetchErrorKind::Other
}
