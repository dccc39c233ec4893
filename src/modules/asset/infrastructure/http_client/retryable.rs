//! Which asset API failures are worth another attempt

use std::time::Duration;

use reqwest::StatusCode;

/// `Retry-After` header in whole seconds
pub fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Whether a response status is worth retrying
pub fn is_retryable_status(status: StatusCode) -> bool {
    match status.as_u16() {
        429 => true,
        500..=599 => true,
        408 => true,
        _ => false,
    }
}

/// Determines if a transport error is retryable
pub fn is_retryable_error(error: &reqwest::Error) -> bool {
    if let Some(status) = error.status() {
        is_retryable_status(status)
    } else {
        error.is_timeout() || error.is_connect()
    }
}
