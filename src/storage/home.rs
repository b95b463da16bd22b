//! Repository home management
//!
//! A repository home is any directory containing `.arbor/config.toml`.
//! Handles initialization and discovery.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use super::config::RepositoryConfig;

#[derive(Debug, Error)]
pub enum HomeError {
    #[error("Not in an arbor repository. Run 'arbor init' first.")]
    NotInRepository,
}

const HOME_DIR: &str = ".arbor";

const DEFAULT_CONFIG: &str = r#"# arbor repository configuration

# Workspaces created on open, in addition to default_workspace
workspaces = ["default"]
default_workspace = "default"

[provider]
# One of: memory, fs, sqlite
kind = "fs"
# Relative to the repository home (default: .arbor/data)
# root = "data"

[cache]
enabled = true
max_entries = 10000
population_timeout_ms = 5000

[paths]
intern_capacity = 4096
handle_capacity = 1024

# Extra namespace prefixes
[namespaces]
# ex = "http://example.com/ns"

[logging]
# filter = "arbor_store=info"
json = false
"#;

/// An arbor repository home
#[derive(Debug, Clone)]
pub struct RepositoryHome {
    root: PathBuf,
    config: RepositoryConfig,
}

impl RepositoryHome {
    /// Opens an existing home at the given path
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.join(HOME_DIR).is_dir() {
            return Err(HomeError::NotInRepository.into());
        }

        let config = RepositoryConfig::load(&root.join(HOME_DIR).join("config.toml"))?;
        Ok(Self { root, config })
    }

    /// Opens the home at the current directory or a parent
    pub fn open_current() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        let root = Self::find(&cwd).ok_or(HomeError::NotInRepository)?;
        Self::open(root)
    }

    /// Initializes a new home at the given path; existing files are kept
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let home_dir = root.join(HOME_DIR);

        fs::create_dir_all(&home_dir).with_context(|| {
            format!("Failed to create {} directory: {}", HOME_DIR, home_dir.display())
        })?;

        let config_path = home_dir.join("config.toml");
        if !config_path.exists() {
            fs::write(&config_path, DEFAULT_CONFIG)
                .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        }

        let gitignore_path = home_dir.join(".gitignore");
        if !gitignore_path.exists() {
            fs::write(&gitignore_path, "# Store contents\ndata/\n").with_context(|| {
                format!("Failed to write .gitignore: {}", gitignore_path.display())
            })?;
        }

        Self::open(root)
    }

    /// Finds the home by walking up from `start`, looking for `.arbor/`
    pub fn find(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();

        loop {
            if current.join(HOME_DIR).is_dir() {
                return Some(current);
            }

            if !current.pop() {
                return None;
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the .arbor directory path
    pub fn home_dir(&self) -> PathBuf {
        self.root.join(HOME_DIR)
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }
}
