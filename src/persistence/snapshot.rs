//! Actor snapshots.
//!
//! A snapshot is the full state of one actor at a log position. Recovery
//! loads the snapshot of the current generation and replays the log from
//! `log_position`; see `checkpoint` for how generations advance.
//!
//! Snapshots are written with write-temp, fsync, rename, fsync-dir, so a
//! reader sees either the previous snapshot or the new one.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::event::{StateEvent, StateEventPayload};
use super::fsync::{fsync_dir, fsync_file};
use crate::types::{ActorId, ActorState, Lifecycle, SignalId, StalePhase};

/// Bump on incompatible changes to the snapshot layout.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Everything an actor needs to resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub schema_version: u32,
    pub snapshot_at: DateTime<Utc>,

    /// Generation of the log this snapshot pairs with.
    pub log_generation: u64,
    /// Byte offset in that log up to which events are already applied.
    pub log_position: u64,
    /// Sequence number for the next appended event. Carried across
    /// generations so sequence numbers never repeat.
    pub next_seq: u64,

    pub actor: ActorId,
    pub lifecycle: Lifecycle,
    pub state: ActorState,

    /// Handled signal ids and when they were handled.
    #[serde(default)]
    pub seen_signals: HashMap<SignalId, DateTime<Utc>>,
}

impl ActorSnapshot {
    pub fn new(actor: ActorId, state: ActorState) -> Self {
        ActorSnapshot {
            schema_version: SCHEMA_VERSION,
            snapshot_at: Utc::now(),
            log_generation: 0,
            log_position: 0,
            next_seq: 0,
            actor,
            lifecycle: Lifecycle::Active,
            state,
            seen_signals: HashMap::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.lifecycle == Lifecycle::Done
    }

    pub fn has_seen(&self, id: &SignalId) -> bool {
        self.seen_signals.contains_key(id)
    }

    /// Applies one logged event.
    ///
    /// Events that do not concern the actor's role (a pull request reaching
    /// the trunk, say) leave the state untouched.
    pub fn apply(&mut self, event: &StateEvent) {
        self.next_seq = self.next_seq.max(event.seq + 1);

        match (&event.payload, &mut self.state) {
            (StateEventPayload::BranchCreated { at }, ActorState::Branch(s)) => s.created_at = *at,
            (StateEventPayload::BranchCreated { at }, ActorState::Trunk(s)) => s.created_at = *at,

            (StateEventPayload::BranchDeleted { .. }, _) => self.lifecycle = Lifecycle::Done,

            (StateEventPayload::CommitRecorded { commit }, ActorState::Branch(s)) => {
                s.last_commit = Some(commit.clone())
            }
            (StateEventPayload::CommitRecorded { commit }, ActorState::Trunk(s)) => {
                s.last_commit = Some(commit.clone())
            }

            (
                StateEventPayload::PullRequestOpened {
                    pull_request,
                    author,
                },
                ActorState::Branch(s),
            ) => {
                s.pull_request = Some(pull_request.clone());
                s.author = author.clone();
            }
            (StateEventPayload::PullRequestClosed { .. }, ActorState::Branch(s)) => {
                s.pull_request = None;
                s.author = None;
            }

            (StateEventPayload::ActivityReset { at }, ActorState::Branch(s)) => {
                s.stale = StalePhase::starting_at(*at)
            }
            (StateEventPayload::StaleWarned { .. }, ActorState::Branch(s)) => {
                s.stale.warnings += 1
            }

            (StateEventPayload::SignalSeen { id, at }, _) => {
                self.seen_signals.insert(id.clone(), *at);
            }

            (
                StateEventPayload::PullRequestOpened { .. }
                | StateEventPayload::PullRequestClosed { .. }
                | StateEventPayload::ActivityReset { .. }
                | StateEventPayload::StaleWarned { .. },
                ActorState::Trunk(_),
            ) => {}
        }
    }
}

/// Writes `snapshot` to `path` atomically.
pub fn save_snapshot_atomic(path: &Path, snapshot: &ActorSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;
    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<ActorSnapshot> {
    let bytes = std::fs::read(path)?;
    let snapshot: ActorSnapshot = serde_json::from_slice(&bytes)?;
    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(SnapshotError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: snapshot.schema_version,
        });
    }
    Ok(snapshot)
}

/// Like [`load_snapshot`], but a missing file is `Ok(None)`.
pub fn try_load_snapshot(path: &Path) -> Result<Option<ActorSnapshot>> {
    match load_snapshot(path) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
