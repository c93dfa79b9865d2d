//! Read-only GitHub queries: branch comparison and branch listing.

use octocrab::Octocrab;
use serde::Deserialize;
use tracing::debug;

use super::error::classify;
use crate::services::{Result, ServiceError};
use crate::types::{ChangeCounts, DiffResult, RepoId};

const PER_PAGE: u8 = 100;

#[derive(Clone)]
pub struct GitHubClient {
    client: Octocrab,
}

impl GitHubClient {
    pub fn new(client: Octocrab) -> Self {
        GitHubClient { client }
    }

    /// Builds a client, authenticated when a token is given.
    pub fn from_token(token: Option<String>) -> std::result::Result<Self, octocrab::Error> {
        let mut builder = Octocrab::builder();
        if let Some(token) = token {
            builder = builder.personal_token(token);
        }
        Ok(Self::new(builder.build()?))
    }

    /// Compares `head` against `base` and totals the per-file stats.
    pub async fn compare(&self, repo: &RepoId, base: &str, head: &str) -> Result<DiffResult> {
        let route = format!(
            "/repos/{}/{}/compare/{}...{}",
            repo.owner,
            repo.repo,
            urlencoding::encode(base),
            urlencoding::encode(head)
        );
        let response: CompareResponse = self
            .client
            .get(&route, None::<&()>)
            .await
            .map_err(|e| classify(e, "detect_changes"))?;
        let diff = response.into_diff();
        debug!(
            repo = %repo,
            head,
            added = diff.lines.added,
            removed = diff.lines.removed,
            "compared branch"
        );
        Ok(diff)
    }

    /// Every branch name in `repo`, across all pages.
    pub async fn list_branches(&self, repo: &RepoId) -> Result<Vec<String>> {
        let mut page = 1u32;
        let mut names = Vec::new();
        loop {
            let result = self
                .client
                .repos(&repo.owner, &repo.repo)
                .list_branches()
                .per_page(PER_PAGE)
                .page(page)
                .send()
                .await
                .map_err(|e| classify(e, "get_all_branches"))?;

            let count = result.items.len();
            names.extend(result.items.into_iter().map(|branch| branch.name));
            if count < usize::from(PER_PAGE) {
                break;
            }
            page = page.checked_add(1).ok_or_else(|| {
                ServiceError::permanent("get_all_branches", "branch listing did not terminate")
            })?;
        }
        Ok(names)
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient").finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    html_url: Option<String>,
    #[serde(default)]
    files: Vec<CompareFile>,
}

#[derive(Debug, Deserialize)]
struct CompareFile {
    status: String,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
}

impl CompareResponse {
    /// Lines: additions and deletions summed over files; a file with both
    /// counts `min(additions, deletions)` modified lines. Files: by status,
    /// with renames and copies counted as modified.
    fn into_diff(self) -> DiffResult {
        let mut lines = ChangeCounts::default();
        let mut files = ChangeCounts::default();
        for file in &self.files {
            lines.added += file.additions;
            lines.removed += file.deletions;
            lines.modified += file.additions.min(file.deletions);
            match file.status.as_str() {
                "added" => files.added += 1,
                "removed" => files.removed += 1,
                _ => files.modified += 1,
            }
        }
        DiffResult::new(lines, files, self.html_url.unwrap_or_default())
    }
}
