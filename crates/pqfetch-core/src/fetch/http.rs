//! libcurl transport: one Easy handle per attempt.

use super::Transport;
use crate::retry::{classify_curl_error, classify_http_status, FetchError};
use std::time::Duration;

const MAX_REDIRECTS: u32 = 10;

/// Blocking GET via libcurl. Each call builds its own `Easy` handle, so the
/// transport is freely shared between worker threads.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    user_agent: String,
}

impl CurlTransport {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

fn curl_error(e: curl::Error) -> FetchError {
    FetchError::new(classify_curl_error(&e), e.to_string())
}

impl Transport for CurlTransport {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let mut body = Vec::new();

        let mut easy = curl::easy::Easy::new();
        easy.url(url).map_err(curl_error)?;
        easy.follow_location(true).map_err(curl_error)?;
        easy.max_redirections(MAX_REDIRECTS).map_err(curl_error)?;
        easy.useragent(&self.user_agent).map_err(curl_error)?;
        easy.connect_timeout(timeout).map_err(curl_error)?;
        easy.timeout(timeout).map_err(curl_error)?;

        {
            let mut transfer = easy.transfer();
            transfer
                .write_function(|data| {
                    body.extend_from_slice(data);
                    Ok(data.len())
                })
                .map_err(curl_error)?;
            transfer.perform().map_err(curl_error)?;
        }

        let code = easy.response_code().map_err(curl_error)?;
        if let Some(kind) = classify_http_status(code) {
            return Err(FetchError::http(code.min(u16::MAX as u32) as u16, kind));
        }
        Ok(body)
    }
}
