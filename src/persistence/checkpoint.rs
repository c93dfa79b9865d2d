//! Checkpointing: bounding how much history an actor replays.
//!
//! A checkpoint writes the actor's current state as the snapshot of a new
//! generation whose log starts empty:
//!
//! 1. write `snapshot.{N+1}.json` (log position 0) atomically
//! 2. point the `generation` file at `N+1`; this is the commit point
//! 3. delete generation `N`
//!
//! A crash before step 2 leaves generation `N` intact. A crash between 2 and 3
//! leaves an extra old generation, which [`settle_generations`] removes on the
//! next start. Snapshots are only ever written whole, so the highest snapshot
//! on disk is always usable even if the `generation` file lags behind it.

use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use super::generation::{
    GenerationError, read_generation, remove_generation, scan_generations, snapshot_path,
    write_generation,
};
use super::snapshot::{ActorSnapshot, SnapshotError, save_snapshot_atomic};

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

pub type Result<T> = std::result::Result<T, CompactionError>;

/// Moves the actor in `dir` to a new generation holding `snapshot`.
///
/// `snapshot` is only updated (new generation, position 0) once everything
/// is on disk; on error it still describes the old generation.
pub fn checkpoint(dir: &Path, snapshot: &mut ActorSnapshot) -> Result<()> {
    let old_generation = read_generation(dir)?;
    let new_generation = old_generation + 1;

    let mut staged = snapshot.clone();
    staged.log_generation = new_generation;
    staged.log_position = 0;
    staged.snapshot_at = chrono::Utc::now();

    save_snapshot_atomic(&snapshot_path(dir, new_generation), &staged)?;
    write_generation(dir, new_generation)?;
    remove_generation(dir, old_generation)?;

    debug!(
        actor = %staged.actor,
        generation = new_generation,
        next_seq = staged.next_seq,
        "checkpointed"
    );
    *snapshot = staged;
    Ok(())
}

/// Makes `dir` hold exactly one generation and returns it.
///
/// The highest generation with a snapshot wins (the `generation` file is
/// rewritten if it disagrees). Without any snapshot, the `generation` file is
/// trusted. Files of every other generation and leftover `.tmp` files are
/// removed.
pub fn settle_generations(dir: &Path) -> Result<u64> {
    let recorded = read_generation(dir)?;
    let found = scan_generations(dir)?;

    let newest_snapshot = found
        .iter()
        .filter(|(_, files)| files.snapshot)
        .map(|(generation, _)| *generation)
        .max();

    let current = match newest_snapshot {
        Some(generation) => {
            if generation != recorded {
                write_generation(dir, generation)?;
            }
            generation
        }
        None => recorded,
    };

    for generation in found.keys().copied().filter(|g| *g != current) {
        remove_generation(dir, generation)?;
    }
    remove_temp_files(dir)?;
    Ok(current)
}

fn remove_temp_files(dir: &Path) -> io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_name().to_string_lossy().ends_with(".tmp") {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
