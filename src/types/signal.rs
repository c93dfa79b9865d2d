//! Inbound signals.
//!
//! A [`Signal`] is one event from the git hosting provider (or one produced
//! internally, such as a rebase request fanned out from a trunk push). Every
//! signal carries a [`SignalId`] that actors use to drop redeliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PrNumber, RepoId, Sha, SignalId};

const BRANCH_REF_PREFIX: &str = "refs/heads/";
const TAG_REF_PREFIX: &str = "refs/tags/";

/// A commit as reported in a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: Sha,
    pub message: String,
    /// Provider login (or name) of the commit author.
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A push to a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSignal {
    pub repo: RepoId,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub before: Sha,
    pub after: Sha,
    /// Commits in the order the provider listed them (oldest first).
    #[serde(default)]
    pub commits: Vec<Commit>,
    /// Login of whoever pushed.
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<u64>,
}

impl PushSignal {
    /// Branch name if the push targets `refs/heads/*`.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref
            .strip_prefix(BRANCH_REF_PREFIX)
            .filter(|b| !b.is_empty())
    }

    pub fn is_tag(&self) -> bool {
        self.git_ref.starts_with(TAG_REF_PREFIX)
    }

    /// The most recent commit of the push, by timestamp.
    ///
    /// Ties go to the later entry, matching the provider's ordering.
    pub fn latest_commit(&self) -> Option<&Commit> {
        self.commits.iter().max_by_key(|c| c.timestamp)
    }
}

/// Request to rebase `branch` onto the default branch.
///
/// Carries the push that moved the default branch, so the rebase can be
/// attributed to it and checked against the branch head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseSignal {
    pub branch: String,
    #[serde(flatten)]
    pub push: PushSignal,
}

/// A pull request as seen by the steward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: PrNumber,
    /// Head branch name.
    pub head: String,
    /// Base branch name.
    pub base: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    #[serde(alias = "created")]
    Opened,
    Reopened,
    Closed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSignal {
    pub repo: RepoId,
    pub action: PullRequestAction,
    pub pull_request: PullRequest,
    /// Login of the PR author.
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelAction {
    Labeled,
    Unlabeled,
}

/// A label added to or removed from a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSignal {
    pub repo: RepoId,
    pub action: LabelAction,
    pub label: String,
    pub pull_request: PullRequest,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    Branch,
    Tag,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefAction {
    Created,
    Deleted,
}

/// Creation or deletion of a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrDeleteSignal {
    pub repo: RepoId,
    pub action: RefAction,
    pub ref_type: RefType,
    /// Short ref name (`feature-x`, not `refs/heads/feature-x`).
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SignalPayload {
    Push(PushSignal),
    Rebase(RebaseSignal),
    PullRequest(PullRequestSignal),
    Label(LabelSignal),
    CreateOrDelete(CreateOrDeleteSignal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub payload: SignalPayload,
}

impl Signal {
    pub fn new(id: SignalId, payload: SignalPayload) -> Self {
        Signal { id, payload }
    }

    pub fn repo(&self) -> &RepoId {
        match &self.payload {
            SignalPayload::Push(p) => &p.repo,
            SignalPayload::Rebase(r) => &r.push.repo,
            SignalPayload::PullRequest(p) => &p.repo,
            SignalPayload::Label(l) => &l.repo,
            SignalPayload::CreateOrDelete(c) => &c.repo,
        }
    }

    /// Short name of the payload kind, for logs.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            SignalPayload::Push(_) => "push",
            SignalPayload::Rebase(_) => "rebase",
            SignalPayload::PullRequest(_) => "pull_request",
            SignalPayload::Label(_) => "label",
            SignalPayload::CreateOrDelete(_) => "create_or_delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn commit(sha: &str, secs: i64) -> Commit {
        Commit {
            sha: Sha::from(sha),
            message: format!("commit {sha}"),
            author: "alice".to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            url: None,
        }
    }

    fn push(git_ref: &str, commits: Vec<Commit>) -> PushSignal {
        PushSignal {
            repo: RepoId::new("acme", "widgets"),
            git_ref: git_ref.to_string(),
            before: Sha::from("a"),
            after: Sha::from("b"),
            commits,
            sender: "alice".to_string(),
            installation_id: None,
        }
    }

    #[test]
    fn branch_from_ref() {
        assert_eq!(push("refs/heads/feature/x", vec![]).branch(), Some("feature/x"));
        assert_eq!(push("refs/tags/v1", vec![]).branch(), None);
        assert_eq!(push("refs/heads/", vec![]).branch(), None);
        assert!(push("refs/tags/v1", vec![]).is_tag());
    }

    #[test]
    fn latest_commit_by_timestamp() {
        let p = push(
            "refs/heads/f",
            vec![commit("c1", 10), commit("c3", 30), commit("c2", 20)],
        );
        assert_eq!(p.latest_commit().unwrap().sha, Sha::from("c3"));
        assert!(push("refs/heads/f", vec![]).latest_commit().is_none());
    }

    #[test]
    fn latest_commit_tie_prefers_later_entry() {
        let p = push("refs/heads/f", vec![commit("first", 10), commit("second", 10)]);
        assert_eq!(p.latest_commit().unwrap().sha, Sha::from("second"));
    }

    #[test]
    fn pull_request_action_accepts_created_and_unknown() {
        let created: PullRequestAction = serde_json::from_str("\"created\"").unwrap();
        let synced: PullRequestAction = serde_json::from_str("\"synchronize\"").unwrap();
        assert_eq!(created, PullRequestAction::Opened);
        assert_eq!(synced, PullRequestAction::Other);
    }

    #[test]
    fn signal_wire_shape() {
        let json = r#"{
            "id": "delivery-1",
            "payload": {
                "kind": "create_or_delete",
                "data": {
                    "repo": {"owner": "acme", "repo": "widgets"},
                    "action": "deleted",
                    "ref_type": "branch",
                    "ref": "feature-x",
                    "sender": "bob"
                }
            }
        }"#;
        let signal: Signal = serde_json::from_str(json).unwrap();
        assert_eq!(signal.kind(), "create_or_delete");
        assert_eq!(signal.repo(), &RepoId::new("acme", "widgets"));
        match signal.payload {
            SignalPayload::CreateOrDelete(c) => {
                assert_eq!(c.action, RefAction::Deleted);
                assert_eq!(c.ref_type, RefType::Branch);
                assert_eq!(c.git_ref, "feature-x");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unknown_ref_type_parses_as_other() {
        let rt: RefType = serde_json::from_str("\"repository\"").unwrap();
        assert_eq!(rt, RefType::Other);
    }
}
