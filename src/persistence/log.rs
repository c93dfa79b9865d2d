//! Append-only JSON Lines event log.
//!
//! One [`StateEvent`] per line. A crash can only ever leave a partial last
//! line behind; [`EventLog::replay_from`] drops it (and anything after a
//! sequence number going backwards) and truncates the file to the valid
//! prefix, so the next append starts on a clean line.
//!
//! # fsync
//!
//! Critical events are synced as soon as they are written. Everything else is
//! left to [`EventLog::sync`], which actors call once per handled signal.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

use super::event::{StateEvent, StateEventPayload};
use super::fsync::fsync_file;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EventLogError>;

/// Events recovered by [`EventLog::replay_from`].
#[derive(Debug, Default)]
pub struct Replayed {
    pub events: Vec<StateEvent>,
    /// One past the highest sequence number seen, if any event was read.
    pub next_seq: Option<u64>,
}

/// An open log, positioned for appending.
pub struct EventLog {
    file: File,
    path: PathBuf,
    next_seq: u64,
}

impl EventLog {
    /// Opens (creating if needed) the log at `path`. New events are numbered
    /// from `next_seq`.
    pub fn open(path: impl AsRef<Path>, next_seq: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        Ok(EventLog {
            file,
            path,
            next_seq,
        })
    }

    /// Writes `payload` as the next event, syncing at once if it is critical.
    pub fn append(&mut self, payload: StateEventPayload) -> Result<StateEvent> {
        let event = StateEvent {
            seq: self.next_seq,
            ts: Utc::now(),
            payload,
        };

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        if event.is_critical() {
            fsync_file(&self.file)?;
        }

        self.next_seq += 1;
        Ok(event)
    }

    pub fn sync(&self) -> io::Result<()> {
        fsync_file(&self.file)
    }

    /// Current end of the log in bytes.
    pub fn position(&mut self) -> io::Result<u64> {
        self.file.seek(SeekFrom::End(0))
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every complete event at or after byte `offset`.
    ///
    /// A missing file, or an offset at or past the end, yields no events.
    /// The first unparseable line, or the first event whose `seq` does not
    /// increase, ends the valid prefix; the file is truncated there.
    pub fn replay_from(path: impl AsRef<Path>, offset: u64) -> Result<Replayed> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replayed::default()),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        if offset >= file_len {
            return Ok(Replayed::default());
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;

        let mut replayed = Replayed::default();
        let mut valid_end = offset;
        let mut line = String::new();

        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            // A line without its newline was cut short mid-write.
            if !line.ends_with('\n') {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                valid_end += n as u64;
                continue;
            }

            let Ok(event) = serde_json::from_str::<StateEvent>(trimmed) else {
                break;
            };
            if replayed.next_seq.is_some_and(|next| event.seq < next) {
                break;
            }
            replayed.next_seq = Some(event.seq + 1);
            replayed.events.push(event);
            valid_end += n as u64;
        }

        if valid_end < file_len {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_end)?;
            fsync_file(&file)?;
        }

        Ok(replayed)
    }
}
