//! The production [`Services`](super::Services) bundle.

use std::path::Path;

use super::defaults::{ChannelMergeQueue, JsonlEventStore, LoggingNotifier, StaticUserDirectory};
use super::notification::{EventRecord, MergeConflict, StaleInfo};
use super::{EventStore, GitProvider, MergeQueue, Notifier, Result, UserDirectory};
use crate::config::RepoConfig;
use crate::git::cli::remove_workspace;
use crate::git::{ClonedWorkspace, GitCli, GitError, GitResult, RebaseOutcome};
use crate::github::GitHubClient;
use crate::types::{DiffResult, LabelSignal, LinesExceeded, RepoId, User};

/// GitHub for queries, the `git` binary for workspaces, and the in-process
/// notifier, queue, and event store.
pub struct Platform {
    pub github: GitHubClient,
    pub git: GitCli,
    pub users: StaticUserDirectory,
    pub notifier: LoggingNotifier,
    pub queue: ChannelMergeQueue,
    pub events: JsonlEventStore,
}

/// Runs a blocking git operation off the async runtime.
async fn blocking_git<T, F>(operation: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> GitResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| e.into_service_error(operation)),
        Err(_) => Err(GitError::Join.into_service_error(operation)),
    }
}

impl GitProvider for Platform {
    async fn detect_changes(
        &self,
        repo: &RepoId,
        default_branch: &str,
        target_branch: &str,
    ) -> Result<DiffResult> {
        self.github.compare(repo, default_branch, target_branch).await
    }

    async fn get_all_branches(&self, repo: &RepoId) -> Result<Vec<String>> {
        self.github.list_branches(repo).await
    }

    async fn clone_branch(&self, workspace: &ClonedWorkspace) -> Result<()> {
        let (git, ws) = (self.git.clone(), workspace.clone());
        blocking_git("clone_branch", move || git.clone_branch(&ws)).await
    }

    async fn fetch_branch(&self, workspace: &ClonedWorkspace) -> Result<()> {
        let (git, ws) = (self.git.clone(), workspace.clone());
        blocking_git("fetch_branch", move || git.fetch_default_branch(&ws)).await
    }

    async fn rebase_at_commit(&self, workspace: &ClonedWorkspace) -> Result<RebaseOutcome> {
        let (git, ws) = (self.git.clone(), workspace.clone());
        blocking_git("rebase_at_commit", move || git.rebase(&ws)).await
    }

    async fn push(&self, workspace: &ClonedWorkspace, force: bool) -> Result<()> {
        let (git, ws) = (self.git.clone(), workspace.clone());
        blocking_git("push", move || git.push(&ws, force)).await
    }

    async fn remove_cloned_at_path(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        blocking_git("remove_cloned_at_path", move || remove_workspace(&path)).await
    }
}

impl UserDirectory for Platform {
    async fn resolve_user_by_login(&self, login: &str) -> Result<Option<User>> {
        self.users.resolve_user_by_login(login).await
    }
}

impl Notifier for Platform {
    async fn notify_lines_exceeded(
        &self,
        repo: &RepoConfig,
        event: &EventRecord,
        change: &LinesExceeded,
    ) -> Result<()> {
        self.notifier.notify_lines_exceeded(repo, event, change).await
    }

    async fn notify_stale_branch(
        &self,
        repo: &RepoConfig,
        event: &EventRecord,
        info: &StaleInfo,
    ) -> Result<()> {
        self.notifier.notify_stale_branch(repo, event, info).await
    }

    async fn notify_merge_conflict(
        &self,
        repo: &RepoConfig,
        event: &EventRecord,
        conflict: &MergeConflict,
    ) -> Result<()> {
        self.notifier.notify_merge_conflict(repo, event, conflict).await
    }
}

impl MergeQueue for Platform {
    async fn enqueue(&self, branch: &str, pr: &LabelSignal, priority: bool) -> Result<()> {
        self.queue.enqueue(branch, pr, priority).await
    }
}

impl EventStore for Platform {
    async fn persist(&self, event: &EventRecord) -> Result<()> {
        self.events.persist(event).await
    }
}
