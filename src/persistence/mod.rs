//! Crash-safe persistence of actor state.
//!
//! Each actor is event-sourced: state changes are appended to a JSON Lines
//! log and applied in memory; a snapshot of a given generation plus that
//! generation's log is the full state. Checkpoints start a new generation so
//! replay stays short.
//!
//! # Recovery
//!
//! 1. Settle the directory on one generation N (the newest complete snapshot)
//! 2. Load `snapshot.N.json`
//! 3. Replay `events.N.log` from the snapshot's `log_position`, truncating a
//!    torn final line
//!
//! # Crash safety
//!
//! - Logs: partial lines are detected and cut off on replay
//! - Snapshots and the generation file: temp file, fsync, rename, fsync dir
//! - Checkpoints: the generation file switch is the single commit point

pub mod checkpoint;
pub mod event;
pub mod fsync;
pub mod generation;
pub mod log;
pub mod pruning;
pub mod snapshot;
pub mod store;

pub use checkpoint::{CompactionError, checkpoint, settle_generations};
pub use event::{StateEvent, StateEventPayload};
pub use log::{EventLog, EventLogError};
pub use pruning::{PruneConfig, prune_seen_signals};
pub use snapshot::{ActorSnapshot, SCHEMA_VERSION, SnapshotError};
pub use store::{ActorStore, StoreError, StoreOptions, read_snapshot};
