//! Shared HTTP error mapping for provider clients.

use council_abstraction::ProviderError;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Extracts a `Retry-After` hint in seconds, when present and numeric.
pub(crate) fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Maps a non-success HTTP status to a typed `ProviderError`.
///
/// The error body is kept out of user-visible messages downstream; here it
/// is retained only for operator logs.
pub(crate) fn map_error_status(
    provider: &str,
    status: u16,
    body: &str,
    retry_after: Option<u64>,
) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs: retry_after,
        },
        401 | 403 => ProviderError::Auth(format!("{provider} rejected credentials ({status})")),
        500..=599 => ProviderError::Server { status, message: truncate(body, 200) },
        _ => ProviderError::InvalidResponse(format!(
            "{provider} returned unexpected status {status}: {}",
            truncate(body, 200)
        )),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
