//! # Sessions
//!
//! The externally visible unit of work.
//!
//! ## Key Types
//!
//! - [`Repository`] - Shared provider, schema, namespaces and path caches
//! - [`Session`] - Resident graph plus pending changes for one workspace
//! - [`ChangeTracker`] - Append-only log of pending mutations
//!
//! ```
//! use arbor_store::{PropertyRecord, Repository, Value};
//!
//! let repo = Repository::in_memory()?;
//! let mut session = repo.login(None)?;
//! session.add_node("/a", None)?;
//! session.set_property("/a/title", PropertyRecord::single(Value::from("hello")))?;
//! session.save()?;
//!
//! let mut fresh = repo.login(None)?;
//! assert!(fresh.item_exists("/a/title")?);
//! # Ok::<(), arbor_store::StoreError>(())
//! ```

mod changes;
mod repository;
#[allow(clippy::module_inception)]
mod session;

pub use changes::{Change, ChangeKind, ChangeTracker};
pub use repository::{Repository, DEFAULT_WORKSPACE};
pub use session::Session;
