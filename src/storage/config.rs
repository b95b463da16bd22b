//! Configuration handling for arbor repositories
//!
//! Repository configuration is stored in `.arbor/config.toml` inside a
//! repository home. Per-user CLI defaults live in the global
//! `config.toml` under the platform config directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::caching::{CacheSettings, DEFAULT_MAX_ENTRIES, DEFAULT_POPULATION_TIMEOUT};
use crate::path::{DEFAULT_HANDLE_CAPACITY, DEFAULT_INTERN_CAPACITY};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Registry key: "memory", "fs" or "sqlite"
    pub kind: String,

    /// Backend location, relative to the repository home
    pub root: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "memory".to_string(),
            root: None,
        }
    }
}

/// Caching decorator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Wrap the backend in the caching decorator
    pub enabled: bool,

    /// Entries per cache region before LRU eviction
    pub max_entries: usize,

    /// How long a waiter blocks on another caller's population
    pub population_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            population_timeout_ms: DEFAULT_POPULATION_TIMEOUT.as_millis() as u64,
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            max_entries: self.max_entries,
            population_timeout: Duration::from_millis(self.population_timeout_ms),
        }
    }
}

/// Path interning and handle table sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub intern_capacity: usize,
    pub handle_capacity: usize,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            intern_capacity: DEFAULT_INTERN_CAPACITY,
            handle_capacity: DEFAULT_HANDLE_CAPACITY,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. "arbor_store=debug")
    pub filter: Option<String>,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

/// Repository-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub provider: ProviderConfig,

    /// Workspaces created when the repository is opened
    pub workspaces: Vec<String>,

    /// Workspace used when a login names none
    pub default_workspace: String,

    pub cache: CacheConfig,
    pub paths: PathsConfig,

    /// Extra prefix -> URI mappings on top of the built-ins
    pub namespaces: std::collections::BTreeMap<String, String>,

    pub logging: LoggingConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            workspaces: vec!["default".to_string()],
            default_workspace: "default".to_string(),
            cache: CacheConfig::default(),
            paths: PathsConfig::default(),
            namespaces: Default::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RepositoryConfig {
    /// Loads a repository config file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read repository config: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse repository config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_workspace.is_empty() {
            return Err(ConfigError::Invalid("default_workspace must not be empty".into()).into());
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be positive".into()).into());
        }
        if self.cache.population_timeout_ms == 0 {
            return Err(
                ConfigError::Invalid("cache.population_timeout_ms must be positive".into()).into(),
            );
        }
        if self.paths.intern_capacity == 0 || self.paths.handle_capacity == 0 {
            return Err(ConfigError::Invalid("path capacities must be positive".into()).into());
        }
        Ok(())
    }

    /// Every workspace to create at startup, default first
    pub fn all_workspaces(&self) -> Vec<String> {
        let mut all = vec![self.default_workspace.clone()];
        for ws in &self.workspaces {
            if !all.contains(ws) {
                all.push(ws.clone());
            }
        }
        all
    }

    /// Backend location resolved against the repository home
    pub fn provider_root(&self, home: &Path) -> PathBuf {
        match &self.provider.root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => home.join(root),
            None => home.join(".arbor").join("data"),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize repository config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write repository config: {}", path.display()))
    }
}

/// Output format for commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Global user configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GlobalConfig {
    /// Default output format (text or json)
    pub default_format: OutputFormat,

    /// Workspace used by the CLI when `--workspace` is absent
    pub default_workspace: Option<String>,
}

impl GlobalConfig {
    /// Returns the global config directory
    pub fn dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "arbor", "arbor").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Loads global configuration; absent files yield defaults
    pub fn load() -> Result<Self> {
        let config_dir = match Self::dir() {
            Some(dir) => dir,
            None => return Ok(Self::default()),
        };

        let config_path = config_dir.join("config.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read global config: {}", config_path.display()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse global config")
    }
}
