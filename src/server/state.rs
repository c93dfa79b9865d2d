//! State inspection endpoint.
//!
//! Read-only. Returns the actor's last checkpoint; events logged since then
//! are not included. Actors checkpoint on clean shutdown and whenever their
//! log passes the configured size.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::AppState;
use crate::actor::actor_dir;
use crate::persistence::{ActorSnapshot, StoreError, read_snapshot};
use crate::types::ActorId;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("not an actor id: {0}")]
    InvalidActorId(String),

    #[error("no state for actor {0}")]
    NotFound(ActorId),

    #[error("failed to read state: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for StateError {
    fn into_response(self) -> Response {
        let status = match &self {
            StateError::InvalidActorId(_) => StatusCode::BAD_REQUEST,
            StateError::NotFound(_) => StatusCode::NOT_FOUND,
            StateError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// State inspection handler.
///
/// # Example
///
/// ```ignore
/// GET /api/v1/actors/acme%2Fwidgets.branch.feature/state HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {"schema_version": 1, "actor": "acme/widgets.branch.feature", ...}
/// ```
pub async fn state_handler<S>(
    State(app_state): State<AppState<S>>,
    Path(actor_id): Path<String>,
) -> Result<Json<ActorSnapshot>, StateError> {
    let id = ActorId::parse(&actor_id).ok_or(StateError::InvalidActorId(actor_id))?;
    let dir = actor_dir(app_state.state_dir(), &id);

    let snapshot = tokio::task::spawn_blocking(move || read_snapshot(&dir))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;

    snapshot.map(Json).ok_or(StateError::NotFound(id))
}
