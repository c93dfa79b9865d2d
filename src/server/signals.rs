//! Signal intake.
//!
//! Signals arrive already normalized (see [`crate::types::Signal`] for the
//! wire shape); provider-specific webhook parsing happens upstream. The
//! handler only queues the signal, so a 202 means "accepted for handling",
//! not "handled".

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use super::AppState;
use crate::actor::DispatchError;
use crate::services::Services;
use crate::types::Signal;

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::UnknownRepository(_) => StatusCode::NOT_FOUND,
            DispatchError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Actor(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Signal handler.
///
/// # Response
///
/// - 202 Accepted: queued with the repository's actor
/// - 400/422: body is not a signal
/// - 404 Not Found: the signal's repository is not configured
/// - 503 Service Unavailable: shutting down
pub async fn signal_handler<S: Services>(
    State(app_state): State<AppState<S>>,
    Json(signal): Json<Signal>,
) -> Result<(StatusCode, &'static str), DispatchError> {
    debug!(signal = %signal.id, repo = %signal.repo(), kind = signal.kind(), "received signal");

    match app_state.dispatcher().dispatch(signal).await {
        Ok(()) => Ok((StatusCode::ACCEPTED, "Accepted")),
        Err(e) => {
            warn!(error = %e, "signal not accepted");
            Err(e)
        }
    }
}
