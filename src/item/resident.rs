//! Resident items
//!
//! Nodes and properties share one [`Item`] struct. The shared fields live in
//! [`ItemCore`]; the [`ItemKind`] tag carries what differs. Items refer to
//! each other by arena index, never by owning reference.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::schema::NodeTypeDefinition;
use super::value::PropertyRecord;
use crate::path::{Path, QualifiedName};

/// Arena address of a resident item. The generation tells apart a slot's
/// successive occupants, so an id held across a removal goes stale instead
/// of aliasing a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) ItemId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyId(pub(crate) ItemId);

impl NodeId {
    pub fn item(self) -> ItemId {
        self.0
    }
}

impl PropertyId {
    pub fn item(self) -> ItemId {
        self.0
    }
}

impl From<NodeId> for ItemId {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl From<PropertyId> for ItemId {
    fn from(id: PropertyId) -> Self {
        id.0
    }
}

/// Lifecycle of a resident item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Created in this session and not yet saved
    New,
    /// Mirrors persisted state
    Exists,
    /// Removed; terminal
    Removed,
}

#[derive(Debug, Clone)]
pub struct ItemCore {
    pub(crate) path: Path,
    pub(crate) parent: Option<NodeId>,
    pub(crate) state: ItemState,
    pub(crate) dirty: bool,
    /// Where the provider holds this item, if it was ever persisted. Differs
    /// from `path` while an earlier same-name sibling's removal is pending.
    pub(crate) stored_path: Option<Path>,
}

/// One slot in a node's ordered child list
#[derive(Debug, Clone)]
pub(crate) struct ChildEntry {
    pub(crate) name: QualifiedName,
    /// None until the child is populated
    pub(crate) item: Option<NodeId>,
    /// The index the provider knows this child under; None for new children
    pub(crate) stored_index: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct NodeData {
    pub(crate) primary_type: QualifiedName,
    pub(crate) definition: Arc<NodeTypeDefinition>,
    pub(crate) children: Vec<ChildEntry>,
    pub(crate) properties: BTreeMap<QualifiedName, PropertyId>,
}

impl NodeData {
    pub fn primary_type(&self) -> &QualifiedName {
        &self.primary_type
    }

    pub fn definition(&self) -> &NodeTypeDefinition {
        &self.definition
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn property_names(&self) -> impl Iterator<Item = &QualifiedName> {
        self.properties.keys()
    }

    /// 1-based ordinal of `position` among children sharing its name
    pub(crate) fn sibling_index(&self, position: usize) -> u32 {
        let name = &self.children[position].name;
        let preceding = self.children[..position]
            .iter()
            .filter(|e| &e.name == name)
            .count();
        preceding as u32 + 1
    }

    /// Position of the `index`th child named `name`
    pub(crate) fn position_of(&self, name: &QualifiedName, index: u32) -> Option<usize> {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, e)| &e.name == name)
            .nth(index.checked_sub(1)? as usize)
            .map(|(i, _)| i)
    }

    pub(crate) fn position_of_item(&self, id: NodeId) -> Option<usize> {
        self.children.iter().position(|e| e.item == Some(id))
    }

    pub(crate) fn has_child_named(&self, name: &QualifiedName) -> bool {
        self.children.iter().any(|e| &e.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct PropertyData {
    pub(crate) record: PropertyRecord,
}

impl PropertyData {
    pub fn record(&self) -> &PropertyRecord {
        &self.record
    }
}

#[derive(Debug, Clone)]
pub enum ItemKind {
    Node(NodeData),
    Property(PropertyData),
}

/// A resident node or property
#[derive(Debug, Clone)]
pub struct Item {
    pub(crate) core: ItemCore,
    pub(crate) kind: ItemKind,
}

impl Item {
    pub fn path(&self) -> &Path {
        &self.core.path
    }

    pub fn name(&self) -> Option<&QualifiedName> {
        self.core.path.name()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.core.parent
    }

    pub fn state(&self) -> ItemState {
        self.core.state
    }

    pub fn is_new(&self) -> bool {
        self.core.state == ItemState::New
    }

    pub fn is_dirty(&self) -> bool {
        self.core.dirty
    }

    pub fn is_node(&self) -> bool {
        matches!(self.kind, ItemKind::Node(_))
    }

    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    pub fn as_node(&self) -> Option<&NodeData> {
        match &self.kind {
            ItemKind::Node(n) => Some(n),
            ItemKind::Property(_) => None,
        }
    }

    pub fn as_property(&self) -> Option<&PropertyData> {
        match &self.kind {
            ItemKind::Property(p) => Some(p),
            ItemKind::Node(_) => None,
        }
    }

    pub(crate) fn node_mut(&mut self) -> Option<&mut NodeData> {
        match &mut self.kind {
            ItemKind::Node(n) => Some(n),
            ItemKind::Property(_) => None,
        }
    }

    pub(crate) fn property_mut(&mut self) -> Option<&mut PropertyData> {
        match &mut self.kind {
            ItemKind::Property(p) => Some(p),
            ItemKind::Node(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with(names: &[&str]) -> NodeData {
        NodeData {
            primary_type: QualifiedName::unstructured(),
            definition: Arc::new(NodeTypeDefinition::unstructured(QualifiedName::unstructured())),
            children: names
                .iter()
                .map(|n| ChildEntry {
                    name: QualifiedName::local(*n).unwrap(),
                    item: None,
                    stored_index: None,
                })
                .collect(),
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn sibling_index_counts_preceding_same_names() {
        let node = node_with(&["a", "b", "a", "a"]);

        assert_eq!(node.sibling_index(0), 1);
        assert_eq!(node.sibling_index(1), 1);
        assert_eq!(node.sibling_index(2), 2);
        assert_eq!(node.sibling_index(3), 3);
    }

    #[test]
    fn position_of_finds_nth_same_name() {
        let node = node_with(&["a", "b", "a"]);
        let a = QualifiedName::local("a").unwrap();

        assert_eq!(node.position_of(&a, 1), Some(0));
        assert_eq!(node.position_of(&a, 2), Some(2));
        assert_eq!(node.position_of(&a, 3), None);
        assert_eq!(node.position_of(&a, 0), None);
    }
}
