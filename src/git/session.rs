//! Rebase sessions in throwaway clones.
//!
//! A [`GitSession`] owns one uniquely named workspace directory. Whatever
//! happens during the session, [`GitSession::close`] removes the directory
//! exactly once; a session dropped without being closed (a panic, a
//! cancelled task) removes it from `Drop` instead.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::RebaseOutcome;
use crate::config::RepoConfig;
use crate::services::{GitProvider, Result, RetryConfig, retry_with_backoff};
use crate::types::{PushSignal, RepoId};

/// A clone of one branch, at its own path.
#[derive(Debug, Clone)]
pub struct ClonedWorkspace {
    pub path: PathBuf,
    pub repo: RepoId,
    pub branch: String,
    pub default_branch: String,
    /// The push that caused this session.
    pub push: PushSignal,
    /// Remote URL overriding the hosting provider's, for mirrors and tests.
    pub remote: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Rebased and force-pushed.
    Pushed,
    /// The rebase conflicted; nothing was pushed.
    Conflict { files: Vec<String> },
}

pub struct GitSession<'a, G> {
    provider: &'a G,
    retry: RetryConfig,
    workspace: ClonedWorkspace,
    closed: bool,
}

impl<'a, G: GitProvider> GitSession<'a, G> {
    /// Reserves a fresh workspace path under `root`. Nothing is cloned yet.
    pub fn open(
        provider: &'a G,
        retry: RetryConfig,
        root: &Path,
        repo: &RepoConfig,
        branch: &str,
        push: &PushSignal,
    ) -> Self {
        let name = format!("{}-{}", slug(branch), Uuid::new_v4().simple());
        let workspace = ClonedWorkspace {
            path: root.join(name),
            repo: repo.id(),
            branch: branch.to_string(),
            default_branch: repo.default_branch.clone(),
            push: push.clone(),
            remote: repo.clone_url.clone(),
        };
        debug!(path = %workspace.path.display(), branch, "opened git session");
        GitSession {
            provider,
            retry,
            workspace,
            closed: false,
        }
    }

    pub fn workspace(&self) -> &ClonedWorkspace {
        &self.workspace
    }

    /// Clone, fetch the default branch, rebase, and force-push.
    ///
    /// Each step is retried on transient failures. A conflicting rebase
    /// ends the session before the push.
    pub async fn rebase_onto_default(&self) -> Result<SessionOutcome> {
        let provider = self.provider;
        let ws = &self.workspace;

        retry_with_backoff(self.retry, move || provider.clone_branch(ws)).await?;
        retry_with_backoff(self.retry, move || provider.fetch_branch(ws)).await?;

        let outcome = retry_with_backoff(self.retry, move || provider.rebase_at_commit(ws)).await?;
        match outcome {
            RebaseOutcome::Rebased { head } => {
                retry_with_backoff(self.retry, move || provider.push(ws, true)).await?;
                info!(
                    branch = %ws.branch,
                    head = %head.short(),
                    onto = %ws.default_branch,
                    "rebased and pushed"
                );
                Ok(SessionOutcome::Pushed)
            }
            RebaseOutcome::Conflict { files } => Ok(SessionOutcome::Conflict { files }),
        }
    }

    /// Removes the workspace directory.
    ///
    /// A failed removal is logged and left to [`sweep_workspaces`] at the next
    /// start; the session counts as closed either way.
    pub async fn close(mut self) {
        self.closed = true;
        let provider = self.provider;
        let path = self.workspace.path.as_path();
        if let Err(e) =
            retry_with_backoff(self.retry, move || provider.remove_cloned_at_path(path)).await
        {
            warn!(
                error = %e,
                path = %path.display(),
                cleanup = "startup sweep",
                "failed to remove workspace"
            );
        }
    }
}

impl<G> Drop for GitSession<'_, G> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(
            path = %self.workspace.path.display(),
            "git session dropped without close, removing workspace"
        );
        if let Err(e) = super::cli::remove_workspace(&self.workspace.path) {
            warn!(error = %e, path = %self.workspace.path.display(), "failed to remove workspace");
        }
    }
}

/// Workspace directory name component for `branch`.
fn slug(branch: &str) -> String {
    branch
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '-',
        })
        .take(48)
        .collect()
}

/// Removes every leftover workspace under `root`. Run once at startup,
/// before any session can exist.
pub fn sweep_workspaces(root: &Path) -> std::io::Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        removed += 1;
    }
    if removed > 0 {
        info!(removed, root = %root.display(), "swept leftover workspaces");
    }
    Ok(removed)
}
