//! Newtype wrappers for domain identifiers.
//!
//! Keeping these distinct stops a branch name from being passed where an actor
//! identity is expected, and gives each identifier one place to define its
//! textual form.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Longest state directory name, well under the usual 255-byte limit.
pub const MAX_DIR_NAME: usize = 200;

/// Hex digits of the identity hash appended to shortened directory names.
const DIR_HASH_LEN: usize = 16;

/// A pull request number within a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrNumber(pub u64);

impl fmt::Display for PrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A git commit SHA.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

impl Sha {
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }

    /// True for the all-zero SHA the provider reports for a ref that did not
    /// exist before (or no longer exists after) a push.
    pub fn is_null(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b == b'0')
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Sha {
    fn from(s: &str) -> Self {
        Sha(s.to_string())
    }
}

/// A repository identifier (owner/repo format).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        RepoId {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Identifier attached to every inbound signal, used for at-most-once handling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(pub String);

impl SignalId {
    pub fn new(s: impl Into<String>) -> Self {
        SignalId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id for a signal produced internally on behalf of `parent`.
    ///
    /// Deterministic so that a redelivered parent yields the same children,
    /// which the receiving actors then drop as duplicates.
    pub fn derived(parent: &SignalId, purpose: &str, target: &str) -> Self {
        SignalId(format!("{}:{}:{}", parent.0, purpose, target))
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a branch or trunk actor.
///
/// Branch actors are `{owner}/{repo}.branch.{name}`; the trunk actor of a
/// repository is `{owner}/{repo}.trunk`. The identity is also the key of the
/// actor's state directory, see [`ActorId::dir_name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn branch(repo: &RepoId, branch: &str) -> Self {
        ActorId(format!("{}{}", Self::branch_prefix(repo), branch))
    }

    pub fn trunk(repo: &RepoId) -> Self {
        ActorId(format!("{}.trunk", repo))
    }

    /// Prefix shared by every branch actor of `repo`.
    pub fn branch_prefix(repo: &RepoId) -> String {
        format!("{}.branch.", repo)
    }

    /// Parses an identity as received over the wire.
    pub fn parse(s: &str) -> Option<Self> {
        let (repo, rest) = s.split_once('/')?;
        if repo.is_empty() || !(rest.contains(".branch.") || rest.ends_with(".trunk")) {
            return None;
        }
        Some(ActorId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe name of the actor's state directory.
    ///
    /// Branch names may contain `/`, which must not create nested directories,
    /// so the identity is percent-encoded. Encodings longer than
    /// [`MAX_DIR_NAME`] are cut and suffixed with a hash of the full identity.
    /// Long names are therefore not reversible; the full identity lives in the
    /// actor's snapshot.
    pub fn dir_name(&self) -> String {
        let encoded = urlencoding::encode(&self.0);
        if encoded.len() <= MAX_DIR_NAME {
            return encoded.into_owned();
        }
        let digest = format!("{:x}", Sha256::digest(self.0.as_bytes()));
        // Percent-encoded text is ASCII, so any byte index is a char boundary.
        let keep = MAX_DIR_NAME - DIR_HASH_LEN - 1;
        format!("{}~{}", &encoded[..keep], &digest[..DIR_HASH_LEN])
    }

    /// Branch name if this is a branch actor of `repo`.
    pub fn branch_name(&self, repo: &RepoId) -> Option<&str> {
        let prefix = Self::branch_prefix(repo);
        self.0.strip_prefix(prefix.as_str()).filter(|b| !b.is_empty())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
