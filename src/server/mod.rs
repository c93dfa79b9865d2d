//! HTTP surface.
//!
//! # Endpoints
//!
//! - `POST /api/v1/signals` - Accepts one normalized signal and queues it
//!   with the dispatcher (202 Accepted)
//! - `GET /api/v1/actors/{actor_id}/state` - Last checkpointed state of an
//!   actor; `actor_id` is percent-encoded (`acme%2Fwidgets.branch.feature`)
//! - `GET /health` - Returns 200 if the server is running

use std::path::PathBuf;
use std::sync::Arc;

use tower_http::trace::TraceLayer;

use crate::actor::Dispatcher;

pub mod health;
pub mod signals;
pub mod state;

pub use health::health_handler;
pub use signals::signal_handler;
pub use state::state_handler;

/// Shared application state, handed to handlers through `State`.
pub struct AppState<S> {
    inner: Arc<AppStateInner<S>>,
}

struct AppStateInner<S> {
    dispatcher: Arc<Dispatcher<S>>,
    /// Root of the per-actor state directories.
    state_dir: PathBuf,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        AppState {
            inner: self.inner.clone(),
        }
    }
}

impl<S> AppState<S> {
    pub fn new(dispatcher: Arc<Dispatcher<S>>, state_dir: impl Into<PathBuf>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                dispatcher,
                state_dir: state_dir.into(),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.inner.dispatcher
    }

    pub fn state_dir(&self) -> &PathBuf {
        &self.inner.state_dir
    }
}

/// Builds the router with all endpoints.
pub fn build_router<S: crate::services::Services>(app_state: AppState<S>) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/api/v1/signals", post(signal_handler::<S>))
        .route("/api/v1/actors/{actor_id}/state", get(state_handler::<S>))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::actor::{RepoContext, actor_dir};
    use crate::config::RepoConfig;
    use crate::persistence::{ActorSnapshot, ActorStore, StoreOptions};
    use crate::services::RetryConfig;
    use crate::test_utils::{RecordingServices, eventually, push, repo_id};
    use crate::types::{ActorId, ActorState, BranchState};

    struct TestApp {
        dir: TempDir,
        state: AppState<RecordingServices>,
        services: Arc<RecordingServices>,
    }

    fn test_app() -> TestApp {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        let ctx = RepoContext {
            repo: Arc::new(RepoConfig::new("acme", "widgets")),
            state_dir: state_dir.clone(),
            workspace_root: dir.path().join("workspaces"),
            retry: RetryConfig::NONE,
            store: StoreOptions::default(),
        };
        let services = Arc::new(RecordingServices::new());
        let dispatcher = Arc::new(Dispatcher::new([ctx], services.clone()));
        TestApp {
            state: AppState::new(dispatcher, state_dir),
            dir,
            services,
        }
    }

    fn post_signal(body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/signals")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    // ─── Health ───

    #[tokio::test]
    async fn health_returns_200() {
        let app = test_app();
        let response = build_router(app.state).oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    // ─── Signals ───

    #[tokio::test]
    async fn signal_for_configured_repo_is_accepted() {
        let app = test_app();
        let signal = serde_json::to_value(push("d-1", "feature", "c1")).unwrap();

        let response = build_router(app.state.clone())
            .oneshot(post_signal(&signal))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        eventually(|| app.services.compared().len() == 1).await;
        app.state.dispatcher().shutdown_all().await;
    }

    #[tokio::test]
    async fn signal_for_unknown_repo_returns_404() {
        let app = test_app();
        let mut signal = serde_json::to_value(push("d-1", "feature", "c1")).unwrap();
        signal["payload"]["data"]["repo"] = serde_json::json!({"owner": "x", "repo": "y"});

        let response = build_router(app.state)
            .oneshot(post_signal(&signal))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_signal_is_rejected() {
        let app = test_app();
        let response = build_router(app.state)
            .oneshot(post_signal(&serde_json::json!({"id": "d-1"})))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    // ─── State ───

    #[tokio::test]
    async fn state_returns_snapshot_of_known_actor() {
        let app = test_app();
        let id = ActorId::branch(&repo_id(), "feature/x");
        let dir = actor_dir(&app.dir.path().join("state"), &id);
        let now = chrono::Utc::now();
        ActorStore::open(
            &dir,
            &id,
            || ActorState::Branch(BranchState::new("feature/x", now)),
            StoreOptions::default(),
        )
        .unwrap();

        let response = build_router(app.state)
            .oneshot(get("/api/v1/actors/acme%2Fwidgets.branch.feature%2Fx/state"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let snapshot: ActorSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshot.actor, id);
        assert_eq!(snapshot.state.branch(), "feature/x");
    }

    #[tokio::test]
    async fn state_returns_404_for_unknown_actor() {
        let app = test_app();
        let response = build_router(app.state)
            .oneshot(get("/api/v1/actors/acme%2Fwidgets.branch.nope/state"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn state_rejects_malformed_actor_id() {
        let app = test_app();
        let response = build_router(app.state)
            .oneshot(get("/api/v1/actors/not-an-actor/state"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
