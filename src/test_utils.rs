//! Shared test utilities: a recording fake for every collaborator and
//! builders for signals.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::RepoConfig;
use crate::git::{ClonedWorkspace, RebaseOutcome};
use crate::services::{
    EventRecord, EventStore, GitProvider, MergeConflict, MergeQueue, Notifier, Result,
    ServiceError, StaleInfo, UserDirectory,
};
use crate::types::{
    ChangeCounts, Commit, CreateOrDeleteSignal, DiffResult, LabelAction, LabelSignal,
    LinesExceeded, PrNumber, PullRequest, PullRequestAction, PullRequestSignal, PushSignal,
    RefAction, RefType, RepoId, Sha, Signal, SignalId, SignalPayload, User,
};

// ─── Recording fake ───────────────────────────────────────────────────────────

/// Implements every collaborator trait in memory and records each call.
///
/// Failures are queued per operation with [`RecordingServices::fail`]; each
/// call to that operation takes one queued failure, if any.
#[derive(Default)]
pub struct RecordingServices {
    inner: Mutex<Recorded>,
}

#[derive(Default)]
struct Recorded {
    diff: Option<DiffResult>,
    branches: Vec<String>,
    rebase_outcome: Option<RebaseOutcome>,
    users: HashMap<String, User>,
    failures: HashMap<&'static str, VecDeque<ServiceError>>,

    git_calls: Vec<String>,
    compared: Vec<(String, String)>,
    cloned: Vec<PathBuf>,
    removed: Vec<PathBuf>,
    persisted: Vec<EventRecord>,
    notified: Vec<EventRecord>,
    enqueued: Vec<(String, PrNumber, bool)>,
}

impl RecordingServices {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        f(&mut self.inner.lock().unwrap())
    }

    fn take_failure(&self, operation: &'static str) -> Result<()> {
        self.with(|r| {
            match r.failures.get_mut(operation).and_then(VecDeque::pop_front) {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    // ─── Setup ───

    pub fn set_diff(&self, diff: DiffResult) {
        self.with(|r| r.diff = Some(diff));
    }

    pub fn set_branches(&self, branches: &[&str]) {
        self.with(|r| r.branches = branches.iter().map(|b| b.to_string()).collect());
    }

    pub fn set_rebase_outcome(&self, outcome: RebaseOutcome) {
        self.with(|r| r.rebase_outcome = Some(outcome));
    }

    pub fn add_user(&self, user: User) {
        self.with(|r| r.users.insert(user.login.clone(), user));
    }

    /// Queues one failure for `operation`: one of `detect_changes`,
    /// `get_all_branches`, `clone`, `fetch`, `rebase`, `push`, `remove`,
    /// `resolve_user`, `notify`, `enqueue`, `persist`.
    pub fn fail(&self, operation: &'static str, err: ServiceError) {
        self.with(|r| r.failures.entry(operation).or_default().push_back(err));
    }

    // ─── Inspection ───

    pub fn git_calls(&self) -> Vec<String> {
        self.with(|r| r.git_calls.clone())
    }

    pub fn compared(&self) -> Vec<(String, String)> {
        self.with(|r| r.compared.clone())
    }

    pub fn persisted(&self) -> Vec<EventRecord> {
        self.with(|r| r.persisted.clone())
    }

    pub fn notified(&self) -> Vec<EventRecord> {
        self.with(|r| r.notified.clone())
    }

    pub fn enqueued(&self) -> Vec<(String, PrNumber, bool)> {
        self.with(|r| r.enqueued.clone())
    }

    /// Names of notified events, in order.
    pub fn notified_kinds(&self) -> Vec<&'static str> {
        self.with(|r| r.notified.iter().map(|e| e.kind.name()).collect())
    }

    /// Workspaces cloned and not yet removed.
    pub fn live_workspaces(&self) -> Vec<PathBuf> {
        self.with(|r| {
            r.cloned
                .iter()
                .filter(|p| !r.removed.contains(p))
                .cloned()
                .collect()
        })
    }

    pub fn removed_workspaces(&self) -> Vec<PathBuf> {
        self.with(|r| r.removed.clone())
    }
}

impl GitProvider for RecordingServices {
    async fn detect_changes(
        &self,
        _repo: &RepoId,
        default_branch: &str,
        target_branch: &str,
    ) -> Result<DiffResult> {
        self.with(|r| {
            r.compared
                .push((default_branch.to_string(), target_branch.to_string()))
        });
        self.take_failure("detect_changes")?;
        Ok(self.with(|r| r.diff.clone().unwrap_or_else(|| diff_with(0, 0))))
    }

    async fn get_all_branches(&self, _repo: &RepoId) -> Result<Vec<String>> {
        self.take_failure("get_all_branches")?;
        Ok(self.with(|r| r.branches.clone()))
    }

    async fn clone_branch(&self, workspace: &ClonedWorkspace) -> Result<()> {
        self.with(|r| {
            r.git_calls.push("clone".into());
            r.cloned.push(workspace.path.clone());
        });
        self.take_failure("clone")
    }

    async fn fetch_branch(&self, _workspace: &ClonedWorkspace) -> Result<()> {
        self.with(|r| r.git_calls.push("fetch".into()));
        self.take_failure("fetch")
    }

    async fn rebase_at_commit(&self, _workspace: &ClonedWorkspace) -> Result<RebaseOutcome> {
        self.with(|r| r.git_calls.push("rebase".into()));
        self.take_failure("rebase")?;
        Ok(self.with(|r| {
            r.rebase_outcome.clone().unwrap_or(RebaseOutcome::Rebased {
                head: Sha::new("rebased"),
            })
        }))
    }

    async fn push(&self, _workspace: &ClonedWorkspace, force: bool) -> Result<()> {
        let call = if force { "push --force" } else { "push" };
        self.with(|r| r.git_calls.push(call.into()));
        self.take_failure("push")
    }

    async fn remove_cloned_at_path(&self, path: &Path) -> Result<()> {
        self.with(|r| {
            r.git_calls.push("remove".into());
            r.removed.push(path.to_path_buf());
        });
        self.take_failure("remove")
    }
}

impl UserDirectory for RecordingServices {
    async fn resolve_user_by_login(&self, login: &str) -> Result<Option<User>> {
        self.take_failure("resolve_user")?;
        Ok(self.with(|r| r.users.get(login).cloned()))
    }
}

impl RecordingServices {
    fn record_notification(&self, event: &EventRecord) -> Result<()> {
        self.take_failure("notify")?;
        self.with(|r| r.notified.push(event.clone()));
        Ok(())
    }
}

impl Notifier for RecordingServices {
    async fn notify_lines_exceeded(
        &self,
        _repo: &RepoConfig,
        event: &EventRecord,
        _change: &LinesExceeded,
    ) -> Result<()> {
        self.record_notification(event)
    }

    async fn notify_stale_branch(
        &self,
        _repo: &RepoConfig,
        event: &EventRecord,
        _info: &StaleInfo,
    ) -> Result<()> {
        self.record_notification(event)
    }

    async fn notify_merge_conflict(
        &self,
        _repo: &RepoConfig,
        event: &EventRecord,
        _conflict: &MergeConflict,
    ) -> Result<()> {
        self.record_notification(event)
    }
}

impl MergeQueue for RecordingServices {
    async fn enqueue(&self, branch: &str, pr: &LabelSignal, priority: bool) -> Result<()> {
        self.take_failure("enqueue")?;
        self.with(|r| {
            r.enqueued
                .push((branch.to_string(), pr.pull_request.number, priority))
        });
        Ok(())
    }
}

impl EventStore for RecordingServices {
    async fn persist(&self, event: &EventRecord) -> Result<()> {
        self.take_failure("persist")?;
        self.with(|r| r.persisted.push(event.clone()));
        Ok(())
    }
}

/// Polls `condition` until it holds, yielding to other tasks in between.
/// Panics after a generous number of rounds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ─── Builders ─────────────────────────────────────────────────────────────────

pub fn repo_id() -> RepoId {
    RepoId::new("acme", "widgets")
}

pub fn diff_with(added: u64, removed: u64) -> DiffResult {
    DiffResult::new(
        ChangeCounts {
            added,
            removed,
            modified: 0,
        },
        ChangeCounts::default(),
        "https://github.com/acme/widgets/compare/main...feature",
    )
}

pub fn commit_at(sha: &str, timestamp: DateTime<Utc>) -> Commit {
    Commit {
        sha: Sha::new(sha),
        message: format!("commit {sha}"),
        author: "alice".into(),
        timestamp,
        url: None,
    }
}

pub fn push_at(branch: &str, sha: &str, timestamp: DateTime<Utc>) -> PushSignal {
    PushSignal {
        repo: repo_id(),
        git_ref: format!("refs/heads/{branch}"),
        before: Sha::new("0".repeat(40)),
        after: Sha::new(sha),
        commits: vec![commit_at(sha, timestamp)],
        sender: "alice".into(),
        installation_id: None,
    }
}

pub fn push_signal(branch: &str, sha: &str) -> PushSignal {
    push_at(branch, sha, Utc::now())
}

pub fn pull_request(number: u64, head: &str) -> PullRequest {
    PullRequest {
        number: PrNumber(number),
        head: head.to_string(),
        base: "main".into(),
        title: format!("PR {number}"),
        url: None,
    }
}

pub fn push(id: &str, branch: &str, sha: &str) -> Signal {
    Signal::new(SignalId::new(id), SignalPayload::Push(push_signal(branch, sha)))
}

pub fn pr_signal(id: &str, action: PullRequestAction, number: u64, head: &str) -> Signal {
    Signal::new(
        SignalId::new(id),
        SignalPayload::PullRequest(PullRequestSignal {
            repo: repo_id(),
            action,
            pull_request: pull_request(number, head),
            author: "alice".into(),
            installation_id: None,
        }),
    )
}

pub fn label_signal(id: &str, label: &str, number: u64, head: &str) -> Signal {
    Signal::new(
        SignalId::new(id),
        SignalPayload::Label(LabelSignal {
            repo: repo_id(),
            action: LabelAction::Labeled,
            label: label.to_string(),
            pull_request: pull_request(number, head),
            sender: "carol".into(),
            installation_id: None,
        }),
    )
}

pub fn ref_signal(id: &str, action: RefAction, ref_type: RefType, name: &str) -> Signal {
    Signal::new(
        SignalId::new(id),
        SignalPayload::CreateOrDelete(CreateOrDeleteSignal {
            repo: repo_id(),
            action,
            ref_type,
            git_ref: name.to_string(),
            sender: "alice".into(),
        }),
    )
}
