//! Small helpers shared by config, transports and timestamps.

use crate::error::{Error, Result};

/// Trim optional text, mapping blank values to `None`.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Validate an http(s) URL, trimming whitespace and trailing slashes.
///
/// `what` names the value in the error message.
pub fn require_http_url(raw: impl Into<String>, what: &str) -> Result<String> {
    let url = normalize_text_option(Some(raw.into()))
        .ok_or_else(|| Error::Validation(format!("{what} must not be empty")))?;
    if !is_http_url(&url) {
        return Err(Error::Validation(format!(
            "{what} must include http:// or https://"
        )));
    }
    Ok(url.trim_end_matches('/').to_string())
}

/// First 180 characters of trimmed text, for remote error bodies.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Wall clock in Unix milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
