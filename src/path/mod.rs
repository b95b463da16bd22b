//! # Path Model
//!
//! Canonical, namespace-qualified hierarchical addresses.
//!
//! ## Syntax
//!
//! | Form | Example | Meaning |
//! |------|---------|---------|
//! | Absolute | `/a/b[2]/c` | From the root; `[n]` is the same-name-sibling index |
//! | Relative | `b/../c` | `.` is a no-op, `..` pops one component |
//! | Prefixed name | `jcr:content` | Prefix resolved through the [`NamespaceMapper`] |
//! | Expanded name | `{urn:x}item` | Namespace URI inline; slashes inside braces do not split |
//!
//! Index 1 is the default and is never rendered.
//!
//! ## Key Types
//!
//! - [`Path`] - Immutable, cheaply cloned address with a cached parent
//! - [`PathFactory`] - Parsing, resolution, formatting and interning
//! - [`HandleTable`] - Stable handles that survive explicit moves

mod component;
mod factory;
mod handles;
mod name;
mod parser;
mod repo_path;

pub use component::Component;
pub use factory::{PathFactory, DEFAULT_INTERN_CAPACITY};
pub use handles::{HandleTable, PathHandle, DEFAULT_HANDLE_CAPACITY};
pub use name::{
    ExpandedNames, NamespaceMapper, NamespaceRegistry, QualifiedName, JCR_URI, MIX_URI, NT_URI,
};
pub use repo_path::Path;
