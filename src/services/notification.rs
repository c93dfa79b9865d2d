//! Records of things the steward tells people about.
//!
//! Each notification is first persisted as an [`EventRecord`] and only then
//! handed to the notifier, so the event store always has a superset of what
//! was announced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ActorId, Commit, LinesExceeded, PullRequest, RepoId, SignalId, User};

/// A branch has gone without pushes for a full stale interval (or several).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleInfo {
    pub last_activity: DateTime<Utc>,
    /// Whole seconds since `last_activity`.
    pub idle_secs: u64,
    /// How many stale warnings this one makes, starting at 1.
    pub warning: u32,
    pub last_commit: Option<Commit>,
    pub pull_request: Option<PullRequest>,
}

/// A rebase onto the default branch stopped on conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub head: String,
    pub base: String,
    pub commit: Option<Commit>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    LinesExceeded(LinesExceeded),
    StaleBranch(StaleInfo),
    MergeConflict(MergeConflict),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::LinesExceeded(_) => "lines_exceeded",
            EventKind::StaleBranch(_) => "stale_branch",
            EventKind::MergeConflict(_) => "merge_conflict",
        }
    }
}

/// One persisted, user-facing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub actor: ActorId,
    pub repo: RepoId,
    pub branch: String,
    pub occurred_at: DateTime<Utc>,
    /// Signal whose handling produced the event; `None` for timer events.
    pub signal: Option<SignalId>,
    /// Who the event is attributed to, when the user directory knew them.
    pub user: Option<User>,
    pub kind: EventKind,
}

impl EventRecord {
    pub fn new(
        actor: ActorId,
        repo: RepoId,
        branch: impl Into<String>,
        signal: Option<SignalId>,
        user: Option<User>,
        kind: EventKind,
    ) -> Self {
        EventRecord {
            id: Uuid::new_v4(),
            actor,
            repo,
            branch: branch.into(),
            occurred_at: Utc::now(),
            signal,
            user,
            kind,
        }
    }
}
