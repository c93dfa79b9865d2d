//! fsync helpers.
//!
//! Creating, renaming, or deleting a file changes its directory entry, which
//! is only durable once the directory itself has been synced. Every
//! persistence step that creates or renames files therefore syncs both.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs the directory entry table of `dir`.
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir)?.sync_all()
}
