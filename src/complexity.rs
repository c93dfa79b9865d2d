//! Diff-size evaluation of a branch against the default branch.

use tracing::debug;

use crate::config::RepoConfig;
use crate::services::{GitProvider, Result, RetryConfig, retry_with_backoff};
use crate::types::{DiffResult, LinesExceeded};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub diff: DiffResult,
    pub threshold: u64,
    /// `delta > threshold`. A shrinking branch (negative delta) never exceeds.
    pub exceeded: bool,
}

impl Evaluation {
    pub fn from_diff(diff: DiffResult, threshold: u64) -> Self {
        let exceeded = diff.delta > i64::try_from(threshold).unwrap_or(i64::MAX);
        Evaluation {
            diff,
            threshold,
            exceeded,
        }
    }

    pub fn lines_exceeded(&self) -> Option<LinesExceeded> {
        self.exceeded.then(|| LinesExceeded {
            added: self.diff.lines.added,
            removed: self.diff.lines.removed,
            delta: self.diff.delta,
            threshold: self.threshold,
            compare_url: self.diff.compare_url.clone(),
        })
    }
}

/// Compares `branch` with the repository's default branch and checks the
/// net line change against its threshold.
pub async fn evaluate<P: GitProvider>(
    provider: &P,
    retry: RetryConfig,
    repo: &RepoConfig,
    branch: &str,
) -> Result<Evaluation> {
    let id = repo.id();
    let id = &id;
    let default_branch = repo.default_branch.as_str();
    let diff = retry_with_backoff(retry, move || {
        provider.detect_changes(id, default_branch, branch)
    })
    .await?;

    let evaluation = Evaluation::from_diff(diff, repo.diff_threshold);
    debug!(
        repo = %id,
        branch,
        delta = evaluation.diff.delta,
        threshold = evaluation.threshold,
        exceeded = evaluation.exceeded,
        "evaluated diff size"
    );
    Ok(evaluation)
}
