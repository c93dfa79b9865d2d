//! Classification of GitHub API failures.
//!
//! - **Transient**: 5xx, 429, 403 caused by rate limiting, network trouble,
//!   and responses asking to try again
//! - **Permanent**: every other 4xx, and failures without a status that do
//!   not look like network errors

use crate::services::{ErrorKind, ServiceError};

/// Converts an octocrab error into a [`ServiceError`] for `operation`.
pub fn classify(err: octocrab::Error, operation: &'static str) -> ServiceError {
    let status = status_code(&err);
    let message = err.to_string();
    let kind = classify_parts(status, &message);
    let message = match status {
        Some(code) => format!("GitHub API error (HTTP {code}): {message}"),
        None => format!("GitHub API error: {message}"),
    };
    let service_error = match kind {
        ErrorKind::Transient => ServiceError::transient(operation, message),
        ErrorKind::Permanent => ServiceError::permanent(operation, message),
    };
    service_error.with_source(err)
}

fn classify_parts(status: Option<u16>, message: &str) -> ErrorKind {
    if is_transient_message(message) {
        return ErrorKind::Transient;
    }
    match status {
        Some(429) => ErrorKind::Transient,
        Some(403) if is_rate_limit_error(message) => ErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => ErrorKind::Transient,
        Some(_) => ErrorKind::Permanent,
        None if is_network_error(message) => ErrorKind::Transient,
        None => ErrorKind::Permanent,
    }
}

fn status_code(err: &octocrab::Error) -> Option<u16> {
    if let octocrab::Error::GitHub { source, .. } = err {
        return Some(source.status_code.as_u16());
    }
    status_from_message(&err.to_string())
}

/// Falls back to the status embedded in the rendered error, for variants
/// that carry no structured status.
fn status_from_message(text: &str) -> Option<u16> {
    if let Some(idx) = text.find("status: ") {
        let digits: String = text[idx + 8..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if let Ok(code) = digits.parse() {
            return Some(code);
        }
    }
    [404, 403, 401, 422, 429, 500, 502, 503]
        .into_iter()
        .find(|code| text.contains(&code.to_string()))
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("try again") || lower.contains("server error")
}

fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("abuse detection")
}

fn is_network_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("dns")
}
