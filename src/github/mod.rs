//! GitHub as the hosting provider.
//!
//! Only read-only queries go through the API: comparing a branch with the
//! default branch and listing branches. Rebases and pushes go through
//! `git` in a workspace clone.

mod client;
mod error;

pub use client::GitHubClient;
pub use error::classify;
