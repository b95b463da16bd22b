//! Schema resolver seam
//!
//! Node-type definitions are owned by an external resolver. The graph asks
//! it for the definitions of a primary type when populating nodes, adding
//! children and assigning properties. Rejections surface verbatim as
//! ConstraintViolation.

use std::collections::HashMap;
use std::sync::Arc;

use super::value::{PropertyRecord, PropertyType, Value};
use crate::error::{Result, StoreError};
use crate::path::QualifiedName;

#[derive(Debug, Clone)]
pub struct PropertyDefinition {
    /// Exact name, or the `*` wildcard
    pub name: QualifiedName,
    /// Required type; `Undefined` accepts any
    pub kind: PropertyType,
    pub multiple: bool,
    /// Materialised when a node of this type is added
    pub auto_created: bool,
    pub default_values: Vec<Value>,
}

impl PropertyDefinition {
    pub fn residual(multiple: bool) -> Self {
        Self {
            name: QualifiedName::wildcard(),
            kind: PropertyType::Undefined,
            multiple,
            auto_created: false,
            default_values: Vec::new(),
        }
    }

    pub fn named(name: QualifiedName, kind: PropertyType) -> Self {
        Self {
            name,
            kind,
            multiple: false,
            auto_created: false,
            default_values: Vec::new(),
        }
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn auto_created(mut self, defaults: Vec<Value>) -> Self {
        self.auto_created = true;
        self.default_values = defaults;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChildNodeDefinition {
    /// Exact name, or the `*` wildcard
    pub name: QualifiedName,
    pub default_primary_type: Option<QualifiedName>,
    pub same_name_siblings: bool,
}

impl ChildNodeDefinition {
    pub fn residual() -> Self {
        Self {
            name: QualifiedName::wildcard(),
            default_primary_type: Some(QualifiedName::unstructured()),
            same_name_siblings: true,
        }
    }

    pub fn named(name: QualifiedName) -> Self {
        Self {
            name,
            default_primary_type: None,
            same_name_siblings: false,
        }
    }

    pub fn with_default_type(mut self, primary_type: QualifiedName) -> Self {
        self.default_primary_type = Some(primary_type);
        self
    }

    pub fn allow_same_name_siblings(mut self) -> Self {
        self.same_name_siblings = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct NodeTypeDefinition {
    pub name: QualifiedName,
    pub properties: Vec<PropertyDefinition>,
    pub children: Vec<ChildNodeDefinition>,
}

impl NodeTypeDefinition {
    pub fn new(name: QualifiedName) -> Self {
        Self {
            name,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    /// A type allowing any property and any child
    pub fn unstructured(name: QualifiedName) -> Self {
        Self::new(name)
            .with_property(PropertyDefinition::residual(false))
            .with_property(PropertyDefinition::residual(true))
            .with_child(ChildNodeDefinition::residual())
    }

    pub fn with_property(mut self, def: PropertyDefinition) -> Self {
        self.properties.push(def);
        self
    }

    pub fn with_child(mut self, def: ChildNodeDefinition) -> Self {
        self.children.push(def);
        self
    }

    /// Validates a property assignment. `jcr:primaryType` is always allowed.
    pub fn check_property(&self, name: &QualifiedName, record: &PropertyRecord) -> Result<()> {
        if name == &QualifiedName::primary_type() {
            return Ok(());
        }

        let exact: Vec<_> = self.properties.iter().filter(|d| &d.name == name).collect();
        let candidates = if exact.is_empty() {
            self.properties
                .iter()
                .filter(|d| d.name.is_wildcard())
                .collect()
        } else {
            exact
        };
        if candidates.is_empty() {
            return Err(StoreError::ConstraintViolation(format!(
                "{} does not allow property {}",
                self.name, name
            )));
        }

        let def = candidates
            .iter()
            .find(|d| d.multiple == record.multiple)
            .ok_or_else(|| {
                StoreError::ConstraintViolation(format!(
                    "property {} on {} must be {}",
                    name,
                    self.name,
                    if record.multiple { "single-valued" } else { "multi-valued" }
                ))
            })?;

        if def.kind != PropertyType::Undefined && def.kind != record.kind {
            return Err(StoreError::ConstraintViolation(format!(
                "property {} on {} requires type {}, got {}",
                name, self.name, def.kind, record.kind
            )));
        }
        Ok(())
    }

    /// Validates adding a child named `name` and returns the primary type it
    /// gets when the caller did not choose one
    pub fn check_child(
        &self,
        name: &QualifiedName,
        sibling_exists: bool,
    ) -> Result<Option<QualifiedName>> {
        let def = self
            .children
            .iter()
            .find(|d| &d.name == name)
            .or_else(|| self.children.iter().find(|d| d.name.is_wildcard()))
            .ok_or_else(|| {
                StoreError::ConstraintViolation(format!(
                    "{} does not allow child node {}",
                    self.name, name
                ))
            })?;

        if sibling_exists && !def.same_name_siblings {
            return Err(StoreError::ItemExists(format!(
                "{} already has a child named {}",
                self.name, name
            )));
        }
        Ok(def.default_primary_type.clone())
    }

    /// Property definitions materialised on add
    pub fn auto_created(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties
            .iter()
            .filter(|d| d.auto_created && !d.name.is_wildcard())
    }
}

/// Supplies node-type definitions by primary type name
pub trait SchemaResolver: Send + Sync {
    fn definitions_for(&self, primary_type: &QualifiedName) -> Result<Arc<NodeTypeDefinition>>;
}

/// Every type allows every property and child
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveSchema;

impl SchemaResolver for PermissiveSchema {
    fn definitions_for(&self, primary_type: &QualifiedName) -> Result<Arc<NodeTypeDefinition>> {
        Ok(Arc::new(NodeTypeDefinition::unstructured(primary_type.clone())))
    }
}

/// A fixed set of registered types. Unknown types are rejected.
#[derive(Debug, Default, Clone)]
pub struct StaticSchema {
    types: HashMap<QualifiedName, Arc<NodeTypeDefinition>>,
}

impl StaticSchema {
    /// Starts with `nt:unstructured` registered
    pub fn new() -> Self {
        Self::default().with_type(NodeTypeDefinition::unstructured(
            QualifiedName::unstructured(),
        ))
    }

    pub fn with_type(mut self, def: NodeTypeDefinition) -> Self {
        self.types.insert(def.name.clone(), Arc::new(def));
        self
    }
}

impl SchemaResolver for StaticSchema {
    fn definitions_for(&self, primary_type: &QualifiedName) -> Result<Arc<NodeTypeDefinition>> {
        self.types.get(primary_type).cloned().ok_or_else(|| {
            StoreError::ConstraintViolation(format!("unknown node type {}", primary_type))
        })
    }
}
