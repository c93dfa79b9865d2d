//! Liveness probe.

use axum::http::StatusCode;

/// `GET /health`: 200 with body `OK` while the process accepts connections.
///
/// Says nothing about the actors; a repository whose actor has stopped still
/// reports healthy here and shows up as 503 on signal intake instead.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
