//! Static provider registry
//!
//! Maps the `provider.kind` configuration key to a constructor. The set of
//! backends is fixed at compile time.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use super::config::{ConfigError, RepositoryConfig};
use super::{CachingProvider, FileSystemProvider, MemoryProvider, SqliteProvider, StorageProvider};

/// Builds a backend from the repository config and home directory
pub type ProviderFactory = fn(&RepositoryConfig, &Path) -> Result<Arc<dyn StorageProvider>>;

const PROVIDERS: &[(&str, ProviderFactory)] = &[
    ("memory", memory),
    ("fs", filesystem),
    ("sqlite", sqlite),
];

fn memory(_: &RepositoryConfig, _: &Path) -> Result<Arc<dyn StorageProvider>> {
    Ok(Arc::new(MemoryProvider::new()))
}

fn filesystem(config: &RepositoryConfig, home: &Path) -> Result<Arc<dyn StorageProvider>> {
    let root = config.provider_root(home);
    let provider = FileSystemProvider::open(&root)
        .with_context(|| format!("Failed to open filesystem store: {}", root.display()))?;
    Ok(Arc::new(provider))
}

fn sqlite(config: &RepositoryConfig, home: &Path) -> Result<Arc<dyn StorageProvider>> {
    let mut db = config.provider_root(home);
    if db.extension().is_none() {
        db = db.join("store.db");
    }
    let provider = SqliteProvider::open(&db)
        .with_context(|| format!("Failed to open SQLite store: {}", db.display()))?;
    Ok(Arc::new(provider))
}

/// Registered provider kinds
pub fn kinds() -> impl Iterator<Item = &'static str> {
    PROVIDERS.iter().map(|(kind, _)| *kind)
}

pub fn factory(kind: &str) -> Option<ProviderFactory> {
    PROVIDERS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, factory)| *factory)
}

/// Opens the configured backend, wrapped in the caching decorator when enabled
pub fn open_provider(config: &RepositoryConfig, home: &Path) -> Result<Arc<dyn StorageProvider>> {
    let factory = factory(&config.provider.kind).ok_or_else(|| {
        ConfigError::Invalid(format!(
            "unknown provider kind '{}' (expected one of: {})",
            config.provider.kind,
            kinds().collect::<Vec<_>>().join(", ")
        ))
    })?;
    let provider = factory(config, home)?;
    if !config.cache.enabled {
        return Ok(provider);
    }
    Ok(Arc::new(CachingProvider::with_settings(
        provider,
        config.cache.settings(),
    )))
}
