//! Process and per-repository configuration.
//!
//! # Process settings
//!
//! [`Settings`] is read once at startup by layering `BRANCH_STEWARD_*`
//! environment variables over compiled defaults with `figment`.
//!
//! # Repository configuration
//!
//! Monitored repositories (and the user directory) come from a TOML file:
//!
//! ```toml
//! [[repos]]
//! owner = "acme"
//! repo = "widgets"
//! default_branch = "main"
//! diff_threshold = 500
//! stale_after_secs = 259200
//! message_channel = "#widgets"
//!
//! [[users]]
//! login = "alice"
//! chat_handle = "@alice"
//! ```
//!
//! Repository configuration is read-only after load and shared behind `Arc`.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Serialized};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::RetryConfig;
use crate::types::{RepoId, User};

const ENV_PREFIX: &str = "BRANCH_STEWARD_";

const DEFAULT_STATE_DIR: &str = "./state";
const DEFAULT_WORKSPACE_DIR: &str = "./workspaces";
const DEFAULT_CONFIG_FILE: &str = "./repos.toml";

/// Log size (bytes) past which an actor checkpoints.
const DEFAULT_CHECKPOINT_BYTES: u64 = 64 * 1024;

const DEFAULT_DIFF_THRESHOLD: u64 = 500;

/// 72 hours.
const DEFAULT_STALE_AFTER_SECS: u64 = 72 * 60 * 60;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Load(#[source] Box<figment::Error>),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("repository {0} is configured more than once")]
    DuplicateRepo(RepoId),

    #[error("repository {repo}: {reason}")]
    InvalidRepo { repo: RepoId, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    /// Root of the per-actor state directories.
    pub state_dir: PathBuf,
    /// Root under which git sessions create their scratch clones.
    pub workspace_dir: PathBuf,
    pub config_file: PathBuf,
    pub checkpoint_bytes: u64,
    /// Token for the hosting provider API and for authenticated clones.
    pub github_token: Option<String>,
    /// Retries after the first attempt of a collaborator call.
    pub retry_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            workspace_dir: PathBuf::from(DEFAULT_WORKSPACE_DIR),
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            checkpoint_bytes: DEFAULT_CHECKPOINT_BYTES,
            github_token: None,
            retry_attempts: RetryConfig::DEFAULT.max_retries,
        }
    }
}

impl Settings {
    /// Reads settings from the environment over the compiled defaults.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `BRANCH_STEWARD_LISTEN_ADDR` | `0.0.0.0:3000` |
    /// | `BRANCH_STEWARD_STATE_DIR` | `./state` |
    /// | `BRANCH_STEWARD_WORKSPACE_DIR` | `./workspaces` |
    /// | `BRANCH_STEWARD_CONFIG` | `./repos.toml` |
    /// | `BRANCH_STEWARD_CHECKPOINT_BYTES` | 65536 |
    /// | `BRANCH_STEWARD_RETRY_ATTEMPTS` | 3 |
    /// | `GITHUB_TOKEN` | unset |
    pub fn from_env() -> Result<Self> {
        Self::extract(Self::figment())
    }

    /// Defaults, then `BRANCH_STEWARD_*`, then `GITHUB_TOKEN`.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                if key.as_str().eq_ignore_ascii_case("config") {
                    "config_file".into()
                } else {
                    key.into()
                }
            }))
            .merge(
                Env::raw()
                    .only(&["GITHUB_TOKEN"])
                    .map(|_| "github_token".into()),
            )
    }

    fn extract(figment: Figment) -> Result<Self> {
        let mut settings: Settings = figment
            .extract()
            .map_err(|e| SettingsError::Load(Box::new(e)))?;
        settings.github_token = settings.github_token.filter(|t| !t.is_empty());
        Ok(settings)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry_attempts,
            ..RetryConfig::DEFAULT
        }
    }
}

/// Configuration of one monitored repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Net line change above which a push triggers a warning.
    #[serde(default = "default_diff_threshold")]
    pub diff_threshold: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Message-provider channel notifications for this repo go to.
    #[serde(default)]
    pub message_channel: Option<String>,
    #[serde(default = "default_merge_label")]
    pub merge_label: String,
    #[serde(default = "default_priority_merge_label")]
    pub priority_merge_label: String,
    /// Branches whose names start with one of these are created by the
    /// steward itself and never rebased by trunk fan-out.
    #[serde(default = "default_internal_prefixes")]
    pub internal_branch_prefixes: Vec<String>,
    /// Remote to clone from instead of the hosting provider's URL.
    #[serde(default)]
    pub clone_url: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_diff_threshold() -> u64 {
    DEFAULT_DIFF_THRESHOLD
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_STALE_AFTER_SECS
}

fn default_merge_label() -> String {
    "merge".to_string()
}

fn default_priority_merge_label() -> String {
    "priority merge".to_string()
}

fn default_internal_prefixes() -> Vec<String> {
    vec!["steward/".to_string()]
}

impl RepoConfig {
    /// A config with all defaults for `owner/repo`.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        RepoConfig {
            owner: owner.into(),
            repo: repo.into(),
            default_branch: default_branch(),
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            message_channel: None,
            merge_label: default_merge_label(),
            priority_merge_label: default_priority_merge_label(),
            internal_branch_prefixes: default_internal_prefixes(),
            clone_url: None,
        }
    }

    pub fn id(&self) -> RepoId {
        RepoId::new(&self.owner, &self.repo)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn is_internal_branch(&self, branch: &str) -> bool {
        self.internal_branch_prefixes
            .iter()
            .any(|p| !p.is_empty() && branch.starts_with(p.as_str()))
    }

    /// True if the trunk should ask `branch` to rebase after a trunk push.
    pub fn wants_rebase(&self, branch: &str) -> bool {
        branch != self.default_branch && !self.is_internal_branch(branch)
    }

    fn validate(&self) -> Result<()> {
        let reason = if self.owner.is_empty() || self.repo.is_empty() {
            Some("owner and repo must be non-empty")
        } else if self.default_branch.is_empty() {
            Some("default_branch must be non-empty")
        } else if self.stale_after_secs == 0 {
            Some("stale_after_secs must be positive")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(SettingsError::InvalidRepo {
                repo: self.id(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
    #[serde(default)]
    pub users: Vec<User>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let config: FileConfig = toml::from_str(text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut seen = HashSet::new();
        for repo in &config.repos {
            repo.validate()?;
            if !seen.insert(repo.id()) {
                return Err(SettingsError::DuplicateRepo(repo.id()));
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Figment {
        Figment::new().merge(Serialized::defaults(Settings::default()))
    }

    #[test]
    fn settings_defaults_when_unset() {
        let settings = Settings::extract(defaults()).unwrap();
        assert_eq!(settings.listen_addr.port(), 3000);
        assert_eq!(settings.checkpoint_bytes, DEFAULT_CHECKPOINT_BYTES);
        assert_eq!(settings.retry(), RetryConfig::default());
        assert!(settings.github_token.is_none());
    }

    #[test]
    fn settings_read_overrides() {
        let settings = Settings::extract(
            defaults()
                .merge(("listen_addr", "127.0.0.1:8080"))
                .merge(("state_dir", "/var/lib/steward"))
                .merge(("checkpoint_bytes", 1024))
                .merge(("retry_attempts", 5))
                .merge(("github_token", "t0k")),
        )
        .unwrap();
        assert_eq!(settings.listen_addr.port(), 8080);
        assert_eq!(settings.state_dir, PathBuf::from("/var/lib/steward"));
        assert_eq!(settings.checkpoint_bytes, 1024);
        assert_eq!(settings.retry().max_retries, 5);
        assert_eq!(settings.github_token.as_deref(), Some("t0k"));
    }

    #[test]
    fn empty_token_is_treated_as_unset() {
        let settings = Settings::extract(defaults().merge(("github_token", ""))).unwrap();
        assert!(settings.github_token.is_none());
    }

    #[test]
    fn settings_reject_garbage() {
        let err = Settings::extract(defaults().merge(("checkpoint_bytes", "lots")))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Load(_)));
    }

    #[test]
    fn repo_config_defaults() {
        let config = FileConfig::parse(
            "[[repos]]\nowner = \"acme\"\nrepo = \"widgets\"\n",
            Path::new("repos.toml"),
        )
        .unwrap();
        let repo = &config.repos[0];
        assert_eq!(repo, &RepoConfig::new("acme", "widgets"));
        assert_eq!(repo.stale_after(), Duration::from_secs(72 * 3600));
        assert_eq!(repo.diff_threshold, 500);
    }

    #[test]
    fn duplicate_repos_rejected() {
        let text = "[[repos]]\nowner = \"a\"\nrepo = \"b\"\n".repeat(2);
        let err = FileConfig::parse(&text, Path::new("repos.toml")).unwrap_err();
        assert!(matches!(err, SettingsError::DuplicateRepo(_)));
    }

    #[test]
    fn zero_stale_interval_rejected() {
        let text = "[[repos]]\nowner = \"a\"\nrepo = \"b\"\nstale_after_secs = 0\n";
        let err = FileConfig::parse(text, Path::new("repos.toml")).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidRepo { .. }));
    }

    #[test]
    fn users_section_parses() {
        let text = "[[users]]\nlogin = \"alice\"\nchat_handle = \"@alice\"\n";
        let config = FileConfig::parse(text, Path::new("repos.toml")).unwrap();
        assert_eq!(config.users[0].chat_handle.as_deref(), Some("@alice"));
    }

    #[test]
    fn rebase_eligibility() {
        let repo = RepoConfig::new("acme", "widgets");
        assert!(repo.wants_rebase("feature"));
        assert!(!repo.wants_rebase("main"));
        assert!(!repo.wants_rebase("steward/tmp-123"));
    }
}
