//! In-process collaborator implementations used by the binary.
//!
//! Chat delivery, the relational event store, and the merge queue itself
//! live outside this service. These implementations stand at those seams:
//! notifications become structured log lines, events are appended to a JSON
//! Lines file, and merge requests go out over a channel to whatever consumes
//! the queue.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use super::notification::{EventRecord, MergeConflict, StaleInfo};
use super::{EventStore, MergeQueue, Notifier, Result, ServiceError, UserDirectory};
use crate::config::RepoConfig;
use crate::persistence::fsync::fsync_file;
use crate::types::{LabelSignal, LinesExceeded, PullRequest, RepoId, User};

// ─── User directory ───────────────────────────────────────────────────────────

/// User directory backed by the `[[users]]` section of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    by_login: HashMap<String, User>,
}

impl StaticUserDirectory {
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        StaticUserDirectory {
            by_login: users
                .into_iter()
                .map(|u| (u.login.to_ascii_lowercase(), u))
                .collect(),
        }
    }
}

impl UserDirectory for StaticUserDirectory {
    async fn resolve_user_by_login(&self, login: &str) -> Result<Option<User>> {
        Ok(self.by_login.get(&login.to_ascii_lowercase()).cloned())
    }
}

// ─── Notifier ─────────────────────────────────────────────────────────────────

/// Emits each notification as an `info` log line on the `notification` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

fn mention(event: &EventRecord) -> String {
    match &event.user {
        Some(User {
            chat_handle: Some(handle),
            ..
        }) => handle.clone(),
        Some(user) => user.login.clone(),
        None => "unknown author".to_string(),
    }
}

impl Notifier for LoggingNotifier {
    async fn notify_lines_exceeded(
        &self,
        repo: &RepoConfig,
        event: &EventRecord,
        change: &LinesExceeded,
    ) -> Result<()> {
        info!(
            target: "notification",
            channel = repo.message_channel.as_deref().unwrap_or("-"),
            event_id = %event.id,
            branch = %event.branch,
            added = change.added,
            removed = change.removed,
            delta = change.delta,
            threshold = change.threshold,
            compare = %change.compare_url,
            "{}: branch {} changed {} lines (threshold {})",
            mention(event),
            event.branch,
            change.delta,
            change.threshold
        );
        Ok(())
    }

    async fn notify_stale_branch(
        &self,
        repo: &RepoConfig,
        event: &EventRecord,
        info: &StaleInfo,
    ) -> Result<()> {
        info!(
            target: "notification",
            channel = repo.message_channel.as_deref().unwrap_or("-"),
            event_id = %event.id,
            branch = %event.branch,
            idle_secs = info.idle_secs,
            warning = info.warning,
            "{}: branch {} has had no pushes for {}h",
            mention(event),
            event.branch,
            info.idle_secs / 3600
        );
        Ok(())
    }

    async fn notify_merge_conflict(
        &self,
        repo: &RepoConfig,
        event: &EventRecord,
        conflict: &MergeConflict,
    ) -> Result<()> {
        info!(
            target: "notification",
            channel = repo.message_channel.as_deref().unwrap_or("-"),
            event_id = %event.id,
            head = %conflict.head,
            base = %conflict.base,
            files = ?conflict.files,
            "{}: {} no longer rebases cleanly onto {}",
            mention(event),
            conflict.head,
            conflict.base
        );
        Ok(())
    }
}

// ─── Merge queue ──────────────────────────────────────────────────────────────

/// One pull request handed to the merge queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub repo: RepoId,
    pub branch: String,
    pub pull_request: PullRequest,
    pub label: String,
    pub requested_by: String,
    pub priority: bool,
}

/// Forwards merge requests to the queue consumer over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelMergeQueue {
    tx: mpsc::UnboundedSender<MergeRequest>,
}

impl ChannelMergeQueue {
    pub fn new(tx: mpsc::UnboundedSender<MergeRequest>) -> Self {
        ChannelMergeQueue { tx }
    }
}

impl MergeQueue for ChannelMergeQueue {
    async fn enqueue(&self, branch: &str, pr: &LabelSignal, priority: bool) -> Result<()> {
        let request = MergeRequest {
            repo: pr.repo.clone(),
            branch: branch.to_string(),
            pull_request: pr.pull_request.clone(),
            label: pr.label.clone(),
            requested_by: pr.sender.clone(),
            priority,
        };
        self.tx
            .send(request)
            .map_err(|_| ServiceError::permanent("enqueue", "merge queue consumer has shut down"))
    }
}

// ─── Event store ──────────────────────────────────────────────────────────────

/// Append-only JSON Lines event store.
///
/// Each record is written as one line and fsynced before `persist` returns.
#[derive(Debug)]
pub struct JsonlEventStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlEventStore {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(JsonlEventStore {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &EventRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("event store lock poisoned"))?;
        file.write_all(&line)?;
        fsync_file(&file)
    }
}

impl EventStore for JsonlEventStore {
    async fn persist(&self, event: &EventRecord) -> Result<()> {
        self.append(event).map_err(|e| {
            ServiceError::transient("persist", format!("appending to {}", self.path.display()))
                .with_source(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::EventKind;
    use crate::types::{ActorId, LabelAction, PrNumber};

    fn label_signal(label: &str) -> LabelSignal {
        LabelSignal {
            repo: RepoId::new("acme", "widgets"),
            action: LabelAction::Labeled,
            label: label.to_string(),
            pull_request: PullRequest {
                number: PrNumber(12),
                head: "feature".into(),
                base: "main".into(),
                title: "Add feature".into(),
                url: None,
            },
            sender: "carol".into(),
            installation_id: None,
        }
    }

    #[tokio::test]
    async fn user_lookup_ignores_case() {
        let dir = StaticUserDirectory::new([User {
            login: "Alice".into(),
            name: None,
            email: None,
            chat_handle: Some("@alice".into()),
        }]);
        let found = dir.resolve_user_by_login("alice").await.unwrap();
        assert_eq!(found.unwrap().chat_handle.as_deref(), Some("@alice"));
        assert!(dir.resolve_user_by_login("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn merge_queue_forwards_request() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = ChannelMergeQueue::new(tx);

        queue.enqueue("feature", &label_signal("merge"), true).await.unwrap();

        let request = rx.recv().await.unwrap();
        assert_eq!(request.branch, "feature");
        assert_eq!(request.pull_request.number, PrNumber(12));
        assert!(request.priority);
        assert_eq!(request.requested_by, "carol");
    }

    #[tokio::test]
    async fn merge_queue_without_consumer_is_permanent_failure() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let err = ChannelMergeQueue::new(tx)
            .enqueue("feature", &label_signal("merge"), false)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn event_store_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlEventStore::open(dir.path().join("events.jsonl")).unwrap();
        let repo = RepoId::new("acme", "widgets");

        for warning in 1..=2 {
            let event = EventRecord::new(
                ActorId::branch(&repo, "feature"),
                repo.clone(),
                "feature",
                None,
                None,
                EventKind::StaleBranch(StaleInfo {
                    last_activity: chrono::Utc::now(),
                    idle_secs: 3600,
                    warning,
                    last_commit: None,
                    pull_request: None,
                }),
            );
            store.persist(&event).await.unwrap();
        }

        let text = std::fs::read_to_string(store.path()).unwrap();
        let records: Vec<EventRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].kind.name(), "stale_branch");
    }
}
