//! Per-actor state.
//!
//! Branch and trunk actors each own exactly one [`ActorState`]. It is only
//! changed by applying persisted state events (see `persistence::event`), so
//! replaying the same events always rebuilds the same state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signal::{Commit, PullRequest};

/// A user record from the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Login at the git hosting provider.
    pub login: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Handle in the message provider, used to mention the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_handle: Option<String>,
}

/// Where an actor is in its stale-check cycle.
///
/// `anchor` is the wall-clock time of the last activity (spawn or push);
/// `warnings` counts stale notifications emitted since then. Together they
/// let a restarted actor resume its timer instead of starting over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalePhase {
    pub anchor: DateTime<Utc>,
    pub warnings: u32,
}

impl StalePhase {
    pub fn starting_at(anchor: DateTime<Utc>) -> Self {
        StalePhase {
            anchor,
            warnings: 0,
        }
    }
}

/// State of a non-default branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchState {
    pub branch: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_commit: Option<Commit>,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
    /// Resolved author of the open pull request.
    #[serde(default)]
    pub author: Option<User>,
    pub stale: StalePhase,
}

impl BranchState {
    pub fn new(branch: impl Into<String>, now: DateTime<Utc>) -> Self {
        BranchState {
            branch: branch.into(),
            created_at: now,
            last_commit: None,
            pull_request: None,
            author: None,
            stale: StalePhase::starting_at(now),
        }
    }

    pub fn has_pr(&self) -> bool {
        self.pull_request.is_some()
    }
}

/// State of the default branch.
///
/// The trunk never gets pull requests of its own and is never checked for
/// staleness, so it only tracks what it has seen pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrunkState {
    pub branch: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_commit: Option<Commit>,
}

impl TrunkState {
    pub fn new(branch: impl Into<String>, now: DateTime<Utc>) -> Self {
        TrunkState {
            branch: branch.into(),
            created_at: now,
            last_commit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ActorState {
    Branch(BranchState),
    Trunk(TrunkState),
}

impl ActorState {
    pub fn branch(&self) -> &str {
        match self {
            ActorState::Branch(s) => &s.branch,
            ActorState::Trunk(s) => &s.branch,
        }
    }

    pub fn is_trunk(&self) -> bool {
        matches!(self, ActorState::Trunk(_))
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            ActorState::Branch(s) => s.created_at,
            ActorState::Trunk(s) => s.created_at,
        }
    }

    pub fn last_commit(&self) -> Option<&Commit> {
        match self {
            ActorState::Branch(s) => s.last_commit.as_ref(),
            ActorState::Trunk(s) => s.last_commit.as_ref(),
        }
    }

    pub fn pull_request(&self) -> Option<&PullRequest> {
        match self {
            ActorState::Branch(s) => s.pull_request.as_ref(),
            ActorState::Trunk(_) => None,
        }
    }

    pub fn stale_phase(&self) -> Option<StalePhase> {
        match self {
            ActorState::Branch(s) => Some(s.stale),
            ActorState::Trunk(_) => None,
        }
    }
}

/// Whether an actor still processes signals.
///
/// `Done` is terminal: reached when the branch is deleted, never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Active,
    Done,
}
