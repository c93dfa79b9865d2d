//! Diff size between a branch and the default branch.

use serde::{Deserialize, Serialize};

/// Line or file counts, split by kind of change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub added: u64,
    pub removed: u64,
    pub modified: u64,
}

/// Result of comparing a branch against the default branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub lines: ChangeCounts,
    pub files: ChangeCounts,
    /// Net line change: added minus removed.
    pub delta: i64,
    pub compare_url: String,
}

impl DiffResult {
    /// Builds a result, deriving `delta` from the line counts.
    pub fn new(lines: ChangeCounts, files: ChangeCounts, compare_url: impl Into<String>) -> Self {
        let delta = lines.added as i64 - lines.removed as i64;
        DiffResult {
            lines,
            files,
            delta,
            compare_url: compare_url.into(),
        }
    }
}

/// A diff that crossed the configured threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesExceeded {
    pub added: u64,
    pub removed: u64,
    pub delta: i64,
    pub threshold: u64,
    pub compare_url: String,
}
