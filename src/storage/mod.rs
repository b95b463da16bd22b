//! # Storage Layer
//!
//! The persistence contract and its implementations.
//!
//! ## Backends
//!
//! | Kind | Type | Layout |
//! |------|------|--------|
//! | `memory` | [`MemoryProvider`] | process-local maps |
//! | `fs` | [`FileSystemProvider`] | one directory per node, `.node` marker, property file pairs |
//! | `sqlite` | [`SqliteProvider`] | `nodes` + `properties` tables |
//!
//! ## Concurrency Safety
//!
//! - Providers are `Send + Sync` and shared by every session of a repository
//! - [`CachingProvider`] populates each cache key single-flight
//! - [`FileSystemProvider`] serialises writers with `fs2` file locks and
//!   writes atomically (temp file + rename)
//!
//! ## Repository Home
//!
//! ```text
//! .arbor/
//! ├── config.toml           # Repository configuration
//! ├── data/                 # Default backend location
//! └── .gitignore
//! ```
//!
//! ## Key Types
//!
//! - [`StorageProvider`] - Backend SPI
//! - [`CachingProvider`] - Coherent caching decorator over any provider
//! - [`RepositoryConfig`] - Repository configuration
//! - [`RepositoryHome`] - Entry point for an on-disk repository

mod caching;
mod config;
mod fs;
mod home;
mod memory;
mod provider;
pub mod registry;
mod sqlite;

pub use caching::{
    CacheSettings, CacheStats, CachingProvider, DEFAULT_MAX_ENTRIES, DEFAULT_POPULATION_TIMEOUT,
};
pub use config::{
    CacheConfig, ConfigError, GlobalConfig, LoggingConfig, OutputFormat, PathsConfig,
    ProviderConfig, RepositoryConfig,
};
pub use fs::FileSystemProvider;
pub use home::{HomeError, RepositoryHome};
pub use memory::MemoryProvider;
pub use provider::StorageProvider;
pub(crate) use provider::check_transfer;
pub use sqlite::SqliteProvider;
