//! Branch Steward - keeps the branches of a repository in shape.
//!
//! For every configured repository the steward runs one actor per branch.
//! Branch actors warn when a branch's diff against the default branch grows
//! past a threshold, warn when a branch goes stale, rebase onto the default
//! branch whenever it moves (reporting conflicts), and hand pull requests
//! labeled for merging to a merge queue.

pub mod actor;
pub mod complexity;
pub mod config;
pub mod git;
pub mod github;
pub mod persistence;
pub mod server;
pub mod services;
pub mod types;

#[cfg(test)]
pub mod test_utils;
