//! Generation numbering of an actor's state directory.
//!
//! Each checkpoint moves the actor to a new generation `N`, with its own
//! `snapshot.N.json` and `events.N.log`. The `generation` file names the
//! current one; it is replaced atomically and is the commit point of a
//! checkpoint.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::fsync::{fsync_dir, fsync_file};

const GENERATION_FILE: &str = "generation";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid generation number: {0:?}")]
    InvalidNumber(String),
}

pub type Result<T> = std::result::Result<T, GenerationError>;

/// Current generation; 0 when the file is missing or empty.
pub fn read_generation(dir: &Path) -> Result<u64> {
    let text = match std::fs::read_to_string(dir.join(GENERATION_FILE)) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let line = text.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(0);
    }
    line.parse()
        .map_err(|_| GenerationError::InvalidNumber(line.to_string()))
}

/// Atomically replaces the generation file.
pub fn write_generation(dir: &Path, generation: u64) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!("{GENERATION_FILE}.tmp"));
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        writeln!(file, "{generation}")?;
        fsync_file(&file)?;
    }
    std::fs::rename(&tmp, dir.join(GENERATION_FILE))?;
    fsync_dir(dir)?;
    Ok(())
}

pub fn snapshot_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("snapshot.{generation}.json"))
}

pub fn events_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("events.{generation}.log"))
}

/// Deletes the snapshot and log of `generation`, if present.
pub fn remove_generation(dir: &Path, generation: u64) -> Result<()> {
    for path in [snapshot_path(dir, generation), events_path(dir, generation)] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    match fsync_dir(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Which files exist for one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationFiles {
    pub snapshot: bool,
    pub events: bool,
}

/// Every generation that has at least one file in `dir`.
pub fn scan_generations(dir: &Path) -> io::Result<BTreeMap<u64, GenerationFiles>> {
    let mut found: BTreeMap<u64, GenerationFiles> = BTreeMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let name = entry?.file_name();
        let name = name.to_string_lossy();

        if let Some(generation) = name
            .strip_prefix("snapshot.")
            .and_then(|s| s.strip_suffix(".json"))
            .and_then(|s| s.parse().ok())
        {
            found.entry(generation).or_default().snapshot = true;
        } else if let Some(generation) = name
            .strip_prefix("events.")
            .and_then(|s| s.strip_suffix(".log"))
            .and_then(|s| s.parse().ok())
        {
            found.entry(generation).or_default().events = true;
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn missing_or_empty_file_is_generation_zero() {
        let dir = tempdir().unwrap();
        assert_eq!(read_generation(dir.path()).unwrap(), 0);
        File::create(dir.path().join(GENERATION_FILE)).unwrap();
        assert_eq!(read_generation(dir.path()).unwrap(), 0);
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(GENERATION_FILE), "seven\n").unwrap();
        assert!(matches!(
            read_generation(dir.path()),
            Err(GenerationError::InvalidNumber(_))
        ));
    }

    #[test]
    fn scan_ignores_unrelated_files() {
        let dir = tempdir().unwrap();
        File::create(snapshot_path(dir.path(), 2)).unwrap();
        File::create(events_path(dir.path(), 2)).unwrap();
        File::create(events_path(dir.path(), 3)).unwrap();
        File::create(dir.path().join("snapshot.x.json")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();

        let found = scan_generations(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(
            found[&2],
            GenerationFiles {
                snapshot: true,
                events: true
            }
        );
        assert!(!found[&3].snapshot);
    }

    #[test]
    fn remove_generation_tolerates_missing_files() {
        let dir = tempdir().unwrap();
        File::create(events_path(dir.path(), 1)).unwrap();
        remove_generation(dir.path(), 1).unwrap();
        remove_generation(dir.path(), 1).unwrap();
        assert!(scan_generations(dir.path()).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn write_then_read(generation in 0u64..1_000_000) {
            let dir = tempdir().unwrap();
            write_generation(dir.path(), generation).unwrap();
            prop_assert_eq!(read_generation(dir.path()).unwrap(), generation);
            prop_assert!(!dir.path().join("generation.tmp").exists());
        }
    }
}
