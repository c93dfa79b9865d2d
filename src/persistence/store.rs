//! The durable home of one actor.
//!
//! An [`ActorStore`] owns an actor's state directory: it recovers the actor's
//! snapshot on open, appends state events, checkpoints once the log grows
//! past a threshold, and removes the directory when the actor is done.
//!
//! # Layout
//!
//! ```text
//! <state_dir>/<actor dir name>/
//!   generation        # current generation N
//!   snapshot.N.json   # state as of the start of events.N.log
//!   events.N.log      # JSON Lines state events
//! ```

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use super::checkpoint::{CompactionError, checkpoint, settle_generations};
use super::event::{StateEvent, StateEventPayload};
use super::fsync::fsync_dir;
use super::generation::{GenerationError, events_path, read_generation, snapshot_path};
use super::log::{EventLog, EventLogError};
use super::pruning::{PruneConfig, prune_seen_signals};
use super::snapshot::{ActorSnapshot, SnapshotError, save_snapshot_atomic, try_load_snapshot};
use crate::types::{ActorId, ActorState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("event log: {0}")]
    Log(#[from] EventLogError),

    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("generation: {0}")]
    Generation(#[from] GenerationError),

    #[error("checkpoint: {0}")]
    Compaction(#[from] CompactionError),

    #[error("state directory belongs to {found}, not {expected}")]
    ActorMismatch { expected: ActorId, found: ActorId },
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Log size in bytes at which [`ActorStore::checkpoint_if_due`] checkpoints.
    pub checkpoint_bytes: u64,
    pub prune: PruneConfig,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            checkpoint_bytes: 64 * 1024,
            prune: PruneConfig::default(),
        }
    }
}

pub struct ActorStore {
    dir: PathBuf,
    log: EventLog,
    options: StoreOptions,
}

impl ActorStore {
    /// Opens the actor's directory, recovering its state.
    ///
    /// A directory without a snapshot gets one built from `initial`, written
    /// before anything else, so `created_at` and the stale anchor survive a
    /// restart even if no event is ever logged.
    pub fn open(
        dir: &Path,
        actor: &ActorId,
        initial: impl FnOnce() -> ActorState,
        options: StoreOptions,
    ) -> Result<(Self, ActorSnapshot)> {
        std::fs::create_dir_all(dir)?;
        let generation = settle_generations(dir)?;

        let mut snapshot = match try_load_snapshot(&snapshot_path(dir, generation))? {
            Some(snapshot) => snapshot,
            None => {
                let mut snapshot = ActorSnapshot::new(actor.clone(), initial());
                snapshot.log_generation = generation;
                save_snapshot_atomic(&snapshot_path(dir, generation), &snapshot)?;
                info!(actor = %actor, "initialized actor state");
                snapshot
            }
        };
        if &snapshot.actor != actor {
            return Err(StoreError::ActorMismatch {
                expected: actor.clone(),
                found: snapshot.actor,
            });
        }

        let log_path = events_path(dir, generation);
        let replayed = EventLog::replay_from(&log_path, snapshot.log_position)?;
        for event in &replayed.events {
            snapshot.apply(event);
        }
        snapshot.next_seq = snapshot
            .next_seq
            .max(replayed.next_seq.unwrap_or_default());
        debug!(
            actor = %actor,
            generation,
            replayed = replayed.events.len(),
            next_seq = snapshot.next_seq,
            "recovered actor state"
        );

        let log = EventLog::open(&log_path, snapshot.next_seq)?;
        Ok((
            ActorStore {
                dir: dir.to_path_buf(),
                log,
                options,
            },
            snapshot,
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends `payload` and applies it to `snapshot`.
    pub fn record(
        &mut self,
        snapshot: &mut ActorSnapshot,
        payload: StateEventPayload,
    ) -> Result<StateEvent> {
        let event = self.log.append(payload)?;
        snapshot.apply(&event);
        Ok(event)
    }

    pub fn sync(&self) -> Result<()> {
        self.log.sync()?;
        Ok(())
    }

    /// Checkpoints if the log has reached the configured size.
    pub fn checkpoint_if_due(&mut self, snapshot: &mut ActorSnapshot) -> Result<bool> {
        if self.log.position()? < self.options.checkpoint_bytes {
            return Ok(false);
        }
        self.checkpoint(snapshot)?;
        Ok(true)
    }

    /// Writes `snapshot` as a new generation and continues on an empty log.
    pub fn checkpoint(&mut self, snapshot: &mut ActorSnapshot) -> Result<()> {
        self.log.sync()?;
        prune_seen_signals(snapshot, &self.options.prune, Utc::now());
        checkpoint(&self.dir, snapshot)?;
        self.log = EventLog::open(
            events_path(&self.dir, snapshot.log_generation),
            snapshot.next_seq,
        )?;
        Ok(())
    }

    /// Removes the state directory. Used once the actor is done for good.
    pub fn destroy(self) -> Result<()> {
        let ActorStore { dir, log, .. } = self;
        drop(log);
        std::fs::remove_dir_all(&dir)?;
        if let Some(parent) = dir.parent() {
            fsync_dir(parent)?;
        }
        Ok(())
    }
}

/// Reads the latest checkpointed snapshot of the actor in `dir` without
/// touching the directory. Events logged since that checkpoint are not
/// included.
///
/// Does not coordinate with the owning actor. A checkpoint that lands between
/// reading the generation and the snapshot deletes the snapshot just looked
/// up, so a miss is retried once against the new generation.
pub fn read_snapshot(dir: &Path) -> Result<Option<ActorSnapshot>> {
    read_snapshot_with(dir, |dir| Ok(read_generation(dir)?))
}

fn read_snapshot_with(
    dir: &Path,
    mut generation: impl FnMut(&Path) -> Result<u64>,
) -> Result<Option<ActorSnapshot>> {
    for _ in 0..2 {
        if !dir.is_dir() {
            return Ok(None);
        }
        let current = generation(dir)?;
        if let Some(snapshot) = try_load_snapshot(&snapshot_path(dir, current))? {
            return Ok(Some(snapshot));
        }
    }
    Ok(None)
}
