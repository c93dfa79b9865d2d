//! Events in an actor's log.
//!
//! Every change to an actor's state is first appended to its log as a
//! [`StateEvent`], then applied. Replaying the log over the last snapshot
//! therefore rebuilds the exact state the actor had before a crash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Commit, PrNumber, PullRequest, SignalId, User};

/// One entry of the log.
///
/// Serialized as a single JSON object with the payload flattened in:
///
/// ```json
/// {"seq":4,"ts":"2024-01-15T10:00:00Z","type":"pull_request_closed","number":17}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEvent {
    /// Monotonic within one log file.
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: StateEventPayload,
}

impl StateEvent {
    /// True if the event must be fsynced before the handler continues.
    pub fn is_critical(&self) -> bool {
        self.payload.is_critical()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEventPayload {
    // ─── Branch lifecycle ───
    /// A branch-create signal was handled.
    BranchCreated { at: DateTime<Utc> },

    /// A branch-delete signal was handled. Terminal.
    BranchDeleted { at: DateTime<Utc> },

    // ─── Commits and pull requests ───
    /// `commit` became the branch's latest known commit.
    CommitRecorded { commit: Commit },

    PullRequestOpened {
        pull_request: PullRequest,
        author: Option<User>,
    },

    PullRequestClosed { number: PrNumber },

    // ─── Staleness ───
    /// Activity on the branch restarted the stale interval at `at`.
    ActivityReset { at: DateTime<Utc> },

    /// A stale warning was emitted.
    StaleWarned { at: DateTime<Utc> },

    // ─── Bookkeeping ───
    /// Signal `id` was fully handled and must not be handled again.
    SignalSeen { id: SignalId, at: DateTime<Utc> },
}

impl StateEventPayload {
    /// Lifecycle, commit, and pull request changes are synced immediately.
    /// Staleness and dedupe bookkeeping are synced when the handler finishes.
    pub fn is_critical(&self) -> bool {
        match self {
            StateEventPayload::BranchCreated { .. }
            | StateEventPayload::BranchDeleted { .. }
            | StateEventPayload::CommitRecorded { .. }
            | StateEventPayload::PullRequestOpened { .. }
            | StateEventPayload::PullRequestClosed { .. } => true,

            StateEventPayload::ActivityReset { .. }
            | StateEventPayload::StaleWarned { .. }
            | StateEventPayload::SignalSeen { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_flattened_with_type_tag() {
        let event = StateEvent {
            seq: 4,
            ts: Utc::now(),
            payload: StateEventPayload::PullRequestClosed {
                number: PrNumber(17),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "pull_request_closed");
        assert_eq!(json["number"], 17);
        assert_eq!(json["seq"], 4);

        let back: StateEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn lifecycle_event_roundtrips_through_a_line() {
        let at = Utc::now();
        let event = StateEvent {
            seq: 0,
            ts: at,
            payload: StateEventPayload::BranchDeleted { at },
        };
        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains("\"type\":\"branch_deleted\""));
        let back: StateEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn bookkeeping_is_not_critical() {
        let now = Utc::now();
        assert!(StateEventPayload::BranchDeleted { at: now }.is_critical());
        assert!(!StateEventPayload::StaleWarned { at: now }.is_critical());
        assert!(
            !StateEventPayload::SignalSeen {
                id: SignalId::new("x"),
                at: now
            }
            .is_critical()
        );
    }
}
