//! arbor-store - An embeddable hierarchical content store
//!
//! Content is a tree of named nodes carrying typed properties, addressed by
//! namespace-qualified paths and kept in named workspaces. Applications log
//! into a workspace to get a [`Session`], mutate a private view of the tree
//! and publish it with [`Session::save`].
//!
//! Storage is pluggable through [`StorageProvider`]; [`CachingProvider`]
//! wraps any backend with a read cache shared by all sessions.

pub mod cli;
pub mod error;
pub mod item;
pub mod logging;
mod lru;
pub mod path;
pub mod session;
pub mod storage;

pub use error::{Result, StoreError};
pub use item::{ItemId, ItemState, NodeId, PropertyId, PropertyRecord, PropertyType, Value};
pub use path::{NamespaceRegistry, Path, PathFactory, PathHandle, QualifiedName};
pub use session::{ChangeKind, Repository, Session};
pub use storage::{
    CachingProvider, FileSystemProvider, MemoryProvider, RepositoryConfig, SqliteProvider,
    StorageProvider,
};
