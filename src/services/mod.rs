//! External collaborators.
//!
//! Actors never talk to the outside world directly. Every side effect goes
//! through one of the traits below, which keeps the actors testable against
//! the recording fake in `test_utils` and lets the binary wire in real
//! implementations through [`Platform`].
//!
//! # Traits
//!
//! - [`GitProvider`]: diff stats and branch listing from the hosting provider,
//!   plus the workspace-scoped clone/fetch/rebase/push operations
//! - [`UserDirectory`]: provider login to user record, best-effort
//! - [`Notifier`]: fire-and-forget notifications
//! - [`MergeQueue`]: hand-off of labeled pull requests
//! - [`EventStore`]: append-only record of every notification
//!
//! [`Services`] bundles all five; actors are generic over it.

pub mod defaults;
pub mod error;
pub mod notification;
pub mod platform;
pub mod retry;

use std::future::Future;
use std::path::Path;

use crate::config::RepoConfig;
use crate::git::{ClonedWorkspace, RebaseOutcome};
use crate::types::{DiffResult, LabelSignal, LinesExceeded, RepoId, User};

pub use defaults::{
    ChannelMergeQueue, JsonlEventStore, LoggingNotifier, MergeRequest, StaticUserDirectory,
};
pub use error::{ErrorKind, ServiceError};
pub use notification::{EventKind, EventRecord, MergeConflict, StaleInfo};
pub use platform::Platform;
pub use retry::{RetryConfig, retry_with_backoff};

pub type Result<T> = std::result::Result<T, ServiceError>;

/// The git hosting provider and the git operations run against it.
pub trait GitProvider: Send + Sync {
    /// Compares `target_branch` against `default_branch`. Read-only.
    fn detect_changes(
        &self,
        repo: &RepoId,
        default_branch: &str,
        target_branch: &str,
    ) -> impl Future<Output = Result<DiffResult>> + Send;

    /// Names of every branch in the repository. Read-only.
    fn get_all_branches(&self, repo: &RepoId) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Clones the workspace's branch into its path and checks out the pushed
    /// commit.
    fn clone_branch(&self, workspace: &ClonedWorkspace) -> impl Future<Output = Result<()>> + Send;

    /// Fetches the default branch into the workspace.
    fn fetch_branch(&self, workspace: &ClonedWorkspace) -> impl Future<Output = Result<()>> + Send;

    /// Rebases the checked-out branch onto the fetched default branch.
    ///
    /// A conflict is reported as `Ok(RebaseOutcome::Conflict)` with the
    /// rebase already aborted.
    fn rebase_at_commit(
        &self,
        workspace: &ClonedWorkspace,
    ) -> impl Future<Output = Result<RebaseOutcome>> + Send;

    fn push(
        &self,
        workspace: &ClonedWorkspace,
        force: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    fn remove_cloned_at_path(&self, path: &Path) -> impl Future<Output = Result<()>> + Send;
}

pub trait UserDirectory: Send + Sync {
    /// Looks up a user by hosting-provider login. `Ok(None)` if unknown.
    fn resolve_user_by_login(
        &self,
        login: &str,
    ) -> impl Future<Output = Result<Option<User>>> + Send;
}

/// Delivers notifications to people.
///
/// `repo` carries the message-provider binding; `event` is the persisted
/// record the notification belongs to.
pub trait Notifier: Send + Sync {
    fn notify_lines_exceeded(
        &self,
        repo: &RepoConfig,
        event: &EventRecord,
        change: &LinesExceeded,
    ) -> impl Future<Output = Result<()>> + Send;

    fn notify_stale_branch(
        &self,
        repo: &RepoConfig,
        event: &EventRecord,
        info: &StaleInfo,
    ) -> impl Future<Output = Result<()>> + Send;

    fn notify_merge_conflict(
        &self,
        repo: &RepoConfig,
        event: &EventRecord,
        conflict: &MergeConflict,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub trait MergeQueue: Send + Sync {
    /// Hands the labeled pull request to the merge queue.
    fn enqueue(
        &self,
        branch: &str,
        pr: &LabelSignal,
        priority: bool,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub trait EventStore: Send + Sync {
    /// Appends `event`. Called before the matching notification is sent.
    fn persist(&self, event: &EventRecord) -> impl Future<Output = Result<()>> + Send;
}

/// Everything an actor needs from the outside world.
pub trait Services:
    GitProvider + UserDirectory + Notifier + MergeQueue + EventStore + 'static
{
}

impl<T> Services for T where
    T: GitProvider + UserDirectory + Notifier + MergeQueue + EventStore + 'static
{
}
