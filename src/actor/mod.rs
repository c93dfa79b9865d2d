//! Actors.
//!
//! One [`RepositoryActor`] per configured repository routes signals to one
//! [`BranchActor`] per branch, plus a trunk actor for the default branch.
//! Each actor is a tokio task draining an unbounded mailbox; it handles one
//! signal or timer at a time, so its state needs no locking.
//!
//! ```text
//! server ──► Dispatcher ──► RepositoryActor (per repo) ──► BranchActor (per branch)
//!                                  ▲                             │
//!                                  └──── rebase requests ◄── trunk actor
//! ```
//!
//! Actor state lives under `<state_dir>/actors/<actor dir name>/`, see
//! [`crate::persistence::store`].

pub mod branch;
pub mod dispatch;
pub mod message;
pub mod repository;
pub mod stale;


use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::config::RepoConfig;
use crate::persistence::{StoreError, StoreOptions};
use crate::services::{RetryConfig, ServiceError};
use crate::types::ActorId;

pub use branch::{BranchActor, Disposition, Role};
pub use dispatch::{DispatchError, Dispatcher};
pub use message::{BranchMessage, RepositoryMessage};
pub use repository::RepositoryActor;
pub use stale::StaleMonitor;

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("state store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("repository actor mailbox closed")]
    ChannelClosed,

    #[error("actor state was removed")]
    Retired,
}

pub type Result<T> = std::result::Result<T, ActorError>;

/// Everything the actors of one repository share. Read-only.
#[derive(Debug, Clone)]
pub struct RepoContext {
    pub repo: Arc<RepoConfig>,
    /// Root of all actor state directories.
    pub state_dir: PathBuf,
    /// Root under which git sessions create their workspaces.
    pub workspace_root: PathBuf,
    pub retry: RetryConfig,
    pub store: StoreOptions,
}

impl RepoContext {
    pub fn actor_dir(&self, id: &ActorId) -> PathBuf {
        actor_dir(&self.state_dir, id)
    }
}

pub fn actors_root(state_dir: &Path) -> PathBuf {
    state_dir.join("actors")
}

/// State directory of actor `id`.
pub fn actor_dir(state_dir: &Path, id: &ActorId) -> PathBuf {
    actors_root(state_dir).join(id.dir_name())
}
