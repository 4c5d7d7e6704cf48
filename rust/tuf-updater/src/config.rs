//! Configuration file parsing for repositories, mirrors and fetch limits.
//!
//! ```toml
//! [limits]
//! max_root_length = 512000
//! max_timestamp_length = 16384
//! fetch_timeout_secs = 30
//!
//! [repositories.main]
//! storage_dir = "/var/lib/updater/main"
//!
//! [[repositories.main.mirrors]]
//! url_prefix = "https://mirror.example.com"
//! metadata_path = "metadata"
//! targets_path = "targets"
//! confined_target_dirs = [""]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot read '{path}': {message}")]
    Read { path: String, message: String },
    #[error("invalid toml: {0}")]
    Parse(String),
    #[error("unknown repository '{0}'")]
    UnknownRepository(String),
    #[error("repository '{0}' has no mirrors")]
    NoMirrors(String),
    #[error("repository '{0}' has no storage_dir and no user data directory is available")]
    NoStorageDir(String),
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct UpdaterConfig {
    #[serde(default)]
    pub limits: FetchLimits,
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

/// Upper bounds on what a mirror may make the client download or wait for.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct FetchLimits {
    pub max_root_length: u64,
    pub max_timestamp_length: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_root_length: 512_000,
            max_timestamp_length: 16_384,
            fetch_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct RepositoryConfig {
    /// Where durable metadata lives. Defaults to the user data directory.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    #[serde(default)]
    pub mirrors: Vec<Mirror>,
}

/// A mirror serving repository metadata and targets.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub url_prefix: String,
    #[serde(default = "default_metadata_path")]
    pub metadata_path: String,
    #[serde(default = "default_targets_path")]
    pub targets_path: String,
    #[serde(default)]
    pub confined_target_dirs: Vec<String>,
}

fn default_metadata_path() -> String {
    "metadata".to_string()
}

fn default_targets_path() -> String {
    "targets".to_string()
}

impl Mirror {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            metadata_path: default_metadata_path(),
            targets_path: default_targets_path(),
            confined_target_dirs: vec![String::new()],
        }
    }

    /// URL of a metadata file on this mirror.
    pub fn metadata_url(&self, filename: &str) -> String {
        join_url(&[&self.url_prefix, &self.metadata_path, filename])
    }

}

fn join_url(parts: &[&str]) -> String {
    let mut url = String::new();
    for part in parts {
        let trimmed = part.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        if url.is_empty() {
            url.push_str(part.trim_end_matches('/'));
        } else {
            url.push('/');
            url.push_str(trimmed);
        }
    }
    url
}

impl UpdaterConfig {
    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse a TOML string directly.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn repository(&self, name: &str) -> Result<&RepositoryConfig, ConfigError> {
        let repo = self
            .repositories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownRepository(name.to_string()))?;
        if repo.mirrors.is_empty() {
            return Err(ConfigError::NoMirrors(name.to_string()));
        }
        Ok(repo)
    }
}

impl RepositoryConfig {
    /// The configured storage directory, or `<data dir>/tuf-updater/<name>`.
    ///
    /// Never falls back to a shared temp directory: the trust anchor must
    /// not live where other users can write.
    pub fn storage_dir_for(&self, name: &str) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.storage_dir {
            return Ok(dir.clone());
        }
        Self::default_storage_dir(dirs::data_dir(), name)
    }

    fn default_storage_dir(data_dir: Option<PathBuf>, name: &str) -> Result<PathBuf, ConfigError> {
        data_dir
            .map(|dir| dir.join("tuf-updater").join(name))
            .ok_or_else(|| ConfigError::NoStorageDir(name.to_string()))
    }
}
