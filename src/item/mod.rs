//! # Item Graph
//!
//! The resident node/property set of a session.
//!
//! ## Key Types
//!
//! - [`ItemGraph`] - Arena of resident items keyed by canonical path
//! - [`Item`] - One struct for nodes and properties, tagged by [`ItemKind`]
//! - [`Value`] / [`PropertyRecord`] - Typed property values
//! - [`SchemaResolver`] - Node-type definitions, supplied from outside
//!
//! Items reference each other through [`ItemId`]s, so parent/child links
//! never form ownership cycles. An id outlives its item only as a stale
//! handle: lookups through it fail with PathNotFound.

mod graph;
mod resident;
mod schema;
mod value;

pub use graph::{Assignment, ItemGraph};
pub(crate) use graph::{generate_reference_key, shift_after_removal};
pub use resident::{
    Item, ItemCore, ItemId, ItemKind, ItemState, NodeData, NodeId, PropertyData, PropertyId,
};
pub use schema::{
    ChildNodeDefinition, NodeTypeDefinition, PermissiveSchema, PropertyDefinition,
    SchemaResolver, StaticSchema,
};
pub use value::{PropertyRecord, PropertyType, Value};
