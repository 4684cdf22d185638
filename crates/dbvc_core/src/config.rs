//! Repository configuration (`config.toml`).

use crate::error::{DbvcError, Result};
use crate::types::Author;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Name of the branch created by `initialize`.
pub const DEFAULT_BRANCH: &str = "main";

/// Persistent repository configuration.
///
/// Every section is optional in the file; missing sections take their
/// defaults so older or hand-written configs keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Name of the checked-out branch.
    #[serde(default = "default_head")]
    pub head: String,

    /// Core behaviour switches.
    #[serde(default)]
    pub core: CoreConfig,

    /// Default identity for operations that don't name an author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserConfig>,

    /// Merge defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeConfig>,

    /// Log defaults.
    #[serde(default)]
    pub log: LogConfig,
}

fn default_head() -> String {
    DEFAULT_BRANCH.to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            head: default_head(),
            core: CoreConfig::default(),
            user: None,
            merge: None,
            log: LogConfig::default(),
        }
    }
}

impl RepositoryConfig {
    /// Loads `config.toml` from a repository directory, or defaults if absent.
    pub fn load(repo_dir: &Path) -> Result<Self> {
        let path = repo_dir.join("config.toml");
        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| DbvcError::ConfigError(format!("failed to read config: {}", e)))?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Writes `config.toml` atomically.
    pub fn save(&self, repo_dir: &Path) -> Result<()> {
        let path = repo_dir.join("config.toml");
        let tmp_path = path.with_extension("toml.tmp");
        let content = self.to_toml()?;
        {
            let mut file = File::create(&tmp_path)
                .map_err(|e| DbvcError::ConfigError(format!("failed to write config: {}", e)))?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Parses TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DbvcError::ConfigError(format!("failed to parse config: {}", e)))
    }

    /// Renders TOML text.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DbvcError::ConfigError(format!("failed to serialize config: {}", e)))
    }

    /// Configured author, if a user section is present.
    pub fn author(&self) -> Option<Author> {
        self.user
            .as_ref()
            .map(|u| Author::new(u.name.clone(), u.email.clone()))
    }
}

/// Core behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Run a non-aggressive gc after branch deletion (default: false).
    #[serde(default)]
    pub auto_gc: bool,

    /// Record ref movements in the reflog (default: true).
    #[serde(default = "default_true")]
    pub log_all_ref_updates: bool,

    /// Unreachable objects younger than this survive gc (default: 7).
    #[serde(default = "default_grace_days")]
    pub gc_grace_period_days: u32,
}

fn default_true() -> bool {
    true
}

fn default_grace_days() -> u32 {
    7
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            auto_gc: false,
            log_all_ref_updates: true,
            gc_grace_period_days: 7,
        }
    }
}

/// Default identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Name.
    pub name: String,
    /// Email.
    pub email: String,
}

/// Merge defaults used when `MergeOptions` leaves a field unset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Default strategy.
    #[serde(default)]
    pub strategy: crate::merge::MergeStrategy,
    /// Always create a merge commit.
    #[serde(default)]
    pub no_fast_forward: bool,
}

/// Log defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Cap applied when `LogOptions::max_count` is unset (default: 100).
    #[serde(default = "default_max_count")]
    pub max_count: usize,
}

fn default_max_count() -> usize {
    100
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { max_count: 100 }
    }
}
