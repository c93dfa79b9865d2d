//! Signal dispatch to per-repository actors.
//!
//! The dispatcher knows every configured repository up front. Each one gets
//! a [`RepositoryActor`] task on first use (or at [`Dispatcher::start_all`]),
//! which then owns routing within that repository. Repositories run
//! concurrently; within one repository the actor serializes routing.
//!
//! ```text
//! ┌─────────────┐     ┌──────────┐    ┌──► repo A actor ──► branch actors
//! │   axum      │ ──► │ dispatch │ ───┤
//! │  (accepts)  │     │ by repo  │    └──► repo B actor ──► branch actors
//! └─────────────┘     └──────────┘
//!       │ 202 Accepted
//!       ▼
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

use super::message::RepositoryMessage;
use super::repository::RepositoryActor;
use super::{ActorError, RepoContext};
use crate::services::Services;
use crate::types::{RepoId, Signal};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("repository {0} is not configured")]
    UnknownRepository(RepoId),

    #[error("repository actor is not running")]
    ChannelClosed,

    #[error("failed to start repository actor: {0}")]
    Actor(#[from] ActorError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

struct RepositoryHandle {
    tx: mpsc::UnboundedSender<RepositoryMessage>,
    task: JoinHandle<()>,
}

pub struct Dispatcher<S> {
    contexts: HashMap<RepoId, Arc<RepoContext>>,
    services: Arc<S>,
    actors: RwLock<HashMap<RepoId, RepositoryHandle>>,
    shutdown: CancellationToken,
}

impl<S: Services> Dispatcher<S> {
    pub fn new(contexts: impl IntoIterator<Item = RepoContext>, services: Arc<S>) -> Self {
        Self::with_shutdown(contexts, services, CancellationToken::new())
    }

    /// A dispatcher whose actors also stop when `shutdown` is cancelled.
    pub fn with_shutdown(
        contexts: impl IntoIterator<Item = RepoContext>,
        services: Arc<S>,
        shutdown: CancellationToken,
    ) -> Self {
        let contexts: HashMap<_, _> = contexts
            .into_iter()
            .map(|ctx| (ctx.repo.id(), Arc::new(ctx)))
            .collect();
        info!(repositories = contexts.len(), "creating dispatcher");
        Dispatcher {
            contexts,
            services,
            actors: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn services(&self) -> &Arc<S> {
        &self.services
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_configured(&self, repo: &RepoId) -> bool {
        self.contexts.contains_key(repo)
    }

    /// Starts a repository actor for every configured repository, recovering
    /// the branch actors that have state on disk.
    pub async fn start_all(&self) -> Result<()> {
        let repos: Vec<RepoId> = self.contexts.keys().cloned().collect();
        for repo in repos {
            self.get_or_spawn(&repo).await?;
        }
        Ok(())
    }

    /// Hands `signal` to its repository's actor.
    ///
    /// Returns once the signal is queued; handling happens asynchronously.
    #[instrument(skip_all, fields(repo = %signal.repo(), signal = %signal.id))]
    pub async fn dispatch(&self, signal: Signal) -> Result<()> {
        let repo = signal.repo().clone();
        let tx = self.get_or_spawn(&repo).await?;
        tx.send(RepositoryMessage::Signal(signal))
            .map_err(|_| DispatchError::ChannelClosed)?;
        trace!("queued");
        Ok(())
    }

    async fn get_or_spawn(
        &self,
        repo: &RepoId,
    ) -> Result<mpsc::UnboundedSender<RepositoryMessage>> {
        {
            let actors = self.actors.read().await;
            if let Some(handle) = actors.get(repo) {
                return Ok(handle.tx.clone());
            }
        }

        let ctx = self
            .contexts
            .get(repo)
            .ok_or_else(|| DispatchError::UnknownRepository(repo.clone()))?;
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::ChannelClosed);
        }

        let mut actors = self.actors.write().await;
        if let Some(handle) = actors.get(repo) {
            return Ok(handle.tx.clone());
        }

        debug!(repo = %repo, "spawning repository actor");
        let (tx, rx) = mpsc::unbounded_channel();
        let mut actor = RepositoryActor::new(
            ctx.clone(),
            self.services.clone(),
            tx.clone(),
            self.shutdown.child_token(),
        );
        actor.start()?;
        let task = tokio::spawn(actor.run(rx));

        actors.insert(
            repo.clone(),
            RepositoryHandle {
                tx: tx.clone(),
                task,
            },
        );
        Ok(tx)
    }

    pub async fn running_count(&self) -> usize {
        self.actors.read().await.len()
    }

    pub async fn is_running(&self, repo: &RepoId) -> bool {
        self.actors.read().await.contains_key(repo)
    }

    /// Stops every actor and waits for them to flush their logs.
    ///
    /// Handlers already in progress finish first; queued signals are
    /// dropped and will not be marked seen.
    pub async fn shutdown_all(&self) {
        info!("shutting down repository actors");
        self.shutdown.cancel();

        let handles: Vec<(RepoId, RepositoryHandle)> =
            self.actors.write().await.drain().collect();
        for (repo, handle) in handles {
            trace!(repo = %repo, "sending shutdown");
            let _ = handle.tx.send(RepositoryMessage::Shutdown);
            if let Err(e) = handle.task.await {
                error!(repo = %repo, error = %e, "repository actor task failed");
            }
        }
        info!("all actors stopped");
    }
}
