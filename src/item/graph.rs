//! Per-session resident item set
//!
//! [`ItemGraph`] is the single authority for which nodes and properties a
//! session holds in memory. Items live in a generation-tagged arena; the
//! path index maps each canonical path to exactly one resident item.
//!
//! ## Population
//!
//! A miss on a path below a resident node loads that node from the provider
//! in a fixed order:
//!
//! 1. `jcr:primaryType`, attached first
//! 2. the type's definitions, from the schema resolver
//! 3. the remaining properties
//! 4. the child list, enumerated but not loaded
//!
//! ## Sibling indices
//!
//! A node's same-name-sibling index is its ordinal among same-named entries
//! of its parent's child list, recomputed on every lookup. Removing a
//! sibling re-keys the resident subtrees of the later ones. The index the
//! provider knows a child under is tracked separately until save.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, trace};

use super::resident::{
    ChildEntry, Item, ItemCore, ItemId, ItemKind, ItemState, NodeData, NodeId, PropertyData,
    PropertyId,
};
use super::schema::SchemaResolver;
use super::value::{PropertyRecord, Value};
use crate::error::{Result, StoreError};
use crate::path::{Component, Path, QualifiedName};
use crate::storage::StorageProvider;

struct Slot {
    generation: u32,
    item: Option<Item>,
}

/// Outcome of assigning a property
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Created,
    /// Carries the value the property held before
    Modified(PropertyRecord),
}

pub struct ItemGraph {
    provider: Arc<dyn StorageProvider>,
    schema: Arc<dyn SchemaResolver>,
    workspace: String,
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_path: HashMap<Path, ItemId>,
    root: NodeId,
}

impl ItemGraph {
    /// Creates the graph and loads the workspace root
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        schema: Arc<dyn SchemaResolver>,
        workspace: impl Into<String>,
    ) -> Result<Self> {
        let mut graph = Self {
            provider,
            schema,
            workspace: workspace.into(),
            slots: Vec::new(),
            free: Vec::new(),
            by_path: HashMap::new(),
            root: NodeId(ItemId {
                index: 0,
                generation: 0,
            }),
        };
        graph.root = graph.populate_node(Path::root(), Path::root(), None)?;
        Ok(graph)
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of resident items
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    // --- arena ---

    fn alloc(&mut self, item: Item) -> ItemId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.item = Some(item);
                ItemId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 1,
                    item: Some(item),
                });
                ItemId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 1,
                }
            }
        }
    }

    /// Takes the item out of its slot and retires the id
    fn release(&mut self, id: ItemId) -> Option<Item> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let mut item = slot.item.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        if self.by_path.get(&item.core.path) == Some(&id) {
            self.by_path.remove(&item.core.path);
        }
        item.core.state = ItemState::Removed;
        Some(item)
    }

    pub fn item(&self, id: impl Into<ItemId>) -> Result<&Item> {
        let id = id.into();
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.item.as_ref())
            .ok_or_else(|| StoreError::PathNotFound(format!("item {} is no longer resident", id)))
    }

    fn item_mut(&mut self, id: impl Into<ItemId>) -> Result<&mut Item> {
        let id = id.into();
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.item.as_mut())
            .ok_or_else(|| StoreError::PathNotFound(format!("item {} is no longer resident", id)))
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeData> {
        let item = self.item(id)?;
        item.as_node()
            .ok_or_else(|| StoreError::PathNotFound(format!("{} is not a node", item.path())))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        let item = self.item_mut(id)?;
        let path = item.core.path.clone();
        item.node_mut()
            .ok_or_else(|| StoreError::PathNotFound(format!("{} is not a node", path)))
    }

    pub fn property(&self, id: PropertyId) -> Result<&PropertyRecord> {
        let item = self.item(id)?;
        item.as_property()
            .map(PropertyData::record)
            .ok_or_else(|| StoreError::PathNotFound(format!("{} is not a property", item.path())))
    }

    /// The resident item at `path`, without loading
    pub fn find(&self, path: &Path) -> Option<ItemId> {
        self.by_path.get(path).copied()
    }

    // --- population ---

    fn populate_node(&mut self, stored: Path, path: Path, parent: Option<NodeId>) -> Result<NodeId> {
        let provider = Arc::clone(&self.provider);
        let ws = self.workspace.as_str();
        let type_name = QualifiedName::primary_type();

        let primary = match provider.get_property(ws, &stored.child_named(type_name.clone())) {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => {
                if !provider.node_exists(ws, &stored)? {
                    return Err(StoreError::PathNotFound(path.to_string()));
                }
                None
            }
            Err(e) => return Err(e),
        };
        let primary_type = match &primary {
            Some(record) => record.value().and_then(Value::as_name).cloned().ok_or_else(|| {
                StoreError::provider(ws, &stored, "jcr:primaryType does not hold a name")
            })?,
            None => QualifiedName::unstructured(),
        };

        let definition = self.schema.definitions_for(&primary_type)?;

        let mut records: Vec<(QualifiedName, PropertyRecord)> = Vec::new();
        if let Some(record) = primary {
            records.push((type_name.clone(), record));
        }
        for name in provider.list_properties(ws, &stored)? {
            if name == type_name {
                continue;
            }
            let record = provider.get_property(ws, &stored.child_named(name.clone()))?;
            records.push((name, record));
        }

        let children = provider
            .list_children(ws, &stored)?
            .into_iter()
            .filter_map(|child| {
                let component = child.last()?;
                Some(ChildEntry {
                    name: component.name().clone(),
                    item: None,
                    stored_index: Some(component.index()),
                })
            })
            .collect();

        debug!(
            workspace = %self.workspace,
            path = %path,
            primary_type = %primary_type,
            properties = records.len(),
            "populated node"
        );

        let node = NodeId(self.alloc(Item {
            core: ItemCore {
                path: path.clone(),
                parent,
                state: ItemState::Exists,
                dirty: false,
                stored_path: Some(stored.clone()),
            },
            kind: ItemKind::Node(NodeData {
                primary_type,
                definition,
                children,
                properties: BTreeMap::new(),
            }),
        }));
        self.by_path.insert(path, node.0);

        for (name, record) in records {
            self.attach_property(node, name, record, ItemState::Exists)?;
        }
        Ok(node)
    }

    fn attach_property(
        &mut self,
        node: NodeId,
        name: QualifiedName,
        record: PropertyRecord,
        state: ItemState,
    ) -> Result<PropertyId> {
        let owner = self.item(node)?;
        let path = owner.core.path.child_named(name.clone());
        let stored_path = match state {
            ItemState::Exists => owner
                .core
                .stored_path
                .as_ref()
                .map(|s| s.child_named(name.clone())),
            _ => None,
        };

        let id = PropertyId(self.alloc(Item {
            core: ItemCore {
                path: path.clone(),
                parent: Some(node),
                state,
                dirty: state == ItemState::New,
                stored_path,
            },
            kind: ItemKind::Property(PropertyData { record }),
        }));
        self.by_path.insert(path, id.0);
        self.node_mut(node)?.properties.insert(name, id);
        Ok(id)
    }

    // --- lookup ---

    /// Returns the node at `path`, loading it and any missing ancestors
    pub fn get_node(&mut self, path: &Path) -> Result<NodeId> {
        if !path.is_absolute() {
            return Err(StoreError::invalid_path(path.to_string(), "expected an absolute path"));
        }
        if let Some(id) = self.find(path) {
            return match self.item(id)?.is_node() {
                true => Ok(NodeId(id)),
                false => Err(StoreError::PathNotFound(path.to_string())),
            };
        }
        let (Some(parent_path), Some(last)) = (path.parent(), path.last()) else {
            return Ok(self.root);
        };
        let parent = self.get_node(&parent_path)?;
        self.child(parent, last.name(), last.index())
    }

    /// The `index`th child named `name`, loading it on first access
    pub fn child(&mut self, parent: NodeId, name: &QualifiedName, index: u32) -> Result<NodeId> {
        let position = match self.node(parent)?.position_of(name, index) {
            Some(p) => Some(p),
            None => {
                self.sync_children(parent)?;
                self.node(parent)?.position_of(name, index)
            }
        };
        let position = position.ok_or_else(|| {
            let parent_path = self.item(parent).map(|i| i.path().to_string()).unwrap_or_default();
            let missing = Component::new(name.clone(), index)
                .map(|c| c.to_string())
                .unwrap_or_else(|_| name.to_string());
            StoreError::PathNotFound(format!("{}/{}", parent_path.trim_end_matches('/'), missing))
        })?;

        let entry = self.node(parent)?.children[position].clone();
        if let Some(id) = entry.item {
            return Ok(id);
        }

        let owner = self.item(parent)?;
        let stored_index = entry.stored_index.ok_or_else(|| {
            StoreError::PathNotFound(format!("{} has no persisted child {}", owner.path(), name))
        })?;
        let parent_stored = owner.core.stored_path.clone().ok_or_else(|| {
            StoreError::PathNotFound(format!("{} is not persisted", owner.path()))
        })?;
        let path = owner.core.path.child(Component::new(name.clone(), index)?);
        let stored = parent_stored.child(Component::new(name.clone(), stored_index)?);

        let id = self.populate_node(stored, path, Some(parent))?;
        self.node_mut(parent)?.children[position].item = Some(id);
        Ok(id)
    }

    pub fn get_property(&mut self, path: &Path) -> Result<PropertyId> {
        if let Some(id) = self.find(path) {
            return match self.item(id)?.is_node() {
                false => Ok(PropertyId(id)),
                true => Err(StoreError::PathNotFound(path.to_string())),
            };
        }
        let (Some(node_path), Some(last)) = (path.parent(), path.last()) else {
            return Err(StoreError::PathNotFound(path.to_string()));
        };
        if last.index() != 1 {
            return Err(StoreError::PathNotFound(path.to_string()));
        }
        let node = self.get_node(&node_path)?;
        if let Some(id) = self.node(node)?.properties.get(last.name()) {
            return Ok(*id);
        }
        self.sync_properties(node)?;
        self.node(node)?
            .properties
            .get(last.name())
            .copied()
            .ok_or_else(|| StoreError::PathNotFound(path.to_string()))
    }

    /// A node if one exists at `path`, otherwise a property
    pub fn get_item(&mut self, path: &Path) -> Result<ItemId> {
        match self.get_node(path) {
            Ok(id) => Ok(id.0),
            Err(e) if e.is_not_found() => self.get_property(path).map(|id| id.0),
            Err(e) => Err(e),
        }
    }

    /// Loads every child of `node`, in order
    pub fn children(&mut self, node: NodeId) -> Result<Vec<NodeId>> {
        self.sync_children(node)?;
        let count = self.node(node)?.children.len();
        let mut out = Vec::with_capacity(count);
        for position in 0..count {
            let data = self.node(node)?;
            let name = data.children[position].name.clone();
            let index = data.sibling_index(position);
            out.push(self.child(node, &name, index)?);
        }
        Ok(out)
    }

    /// Current child paths, without loading the children
    pub fn child_paths(&mut self, node: NodeId) -> Result<Vec<Path>> {
        self.sync_children(node)?;
        let item = self.item(node)?;
        let data = self.node(node)?;
        (0..data.children.len())
            .map(|position| {
                let component =
                    Component::new(data.children[position].name.clone(), data.sibling_index(position))?;
                Ok(item.path().child(component))
            })
            .collect()
    }

    pub fn properties(&self, node: NodeId) -> Result<Vec<PropertyId>> {
        Ok(self.node(node)?.properties.values().copied().collect())
    }

    /// Properties of `node`, including any persisted by other sessions
    /// since it was loaded
    pub fn load_properties(&mut self, node: NodeId) -> Result<Vec<PropertyId>> {
        self.sync_properties(node)?;
        self.properties(node)
    }

    /// Children loaded so far, in order
    pub fn loaded_children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .node(node)?
            .children
            .iter()
            .filter_map(|e| e.item)
            .collect())
    }

    /// Picks up children another session persisted since `node` was loaded.
    /// Only clean, persisted nodes are synced; their entries mirror the
    /// provider one-to-one, so new siblings can only trail the known ones.
    fn sync_children(&mut self, node: NodeId) -> Result<()> {
        let Some(stored) = self.clean_stored_path(node)? else {
            return Ok(());
        };
        let fresh = self.provider.list_children(&self.workspace, &stored)?;
        let data = self.node_mut(node)?;
        for child in fresh {
            let Some(component) = child.last() else {
                continue;
            };
            let known = data
                .children
                .iter()
                .any(|e| &e.name == component.name() && e.stored_index == Some(component.index()));
            if !known {
                trace!(path = %child, "picked up persisted child");
                data.children.push(ChildEntry {
                    name: component.name().clone(),
                    item: None,
                    stored_index: Some(component.index()),
                });
            }
        }
        Ok(())
    }

    /// Picks up properties another session persisted since `node` was loaded
    fn sync_properties(&mut self, node: NodeId) -> Result<()> {
        let Some(stored) = self.clean_stored_path(node)? else {
            return Ok(());
        };
        let provider = Arc::clone(&self.provider);
        for name in provider.list_properties(&self.workspace, &stored)? {
            if self.node(node)?.properties.contains_key(&name) {
                continue;
            }
            let record = provider.get_property(&self.workspace, &stored.child_named(name.clone()))?;
            self.attach_property(node, name, record, ItemState::Exists)?;
        }
        Ok(())
    }

    fn clean_stored_path(&self, node: NodeId) -> Result<Option<Path>> {
        let item = self.item(node)?;
        if item.core.dirty || item.core.state != ItemState::Exists {
            return Ok(None);
        }
        Ok(item.core.stored_path.clone())
    }

    /// Re-reads a clean persisted property so reads observe saves made by
    /// other sessions. Pending local values are left alone.
    pub fn refresh_property(&mut self, id: PropertyId) -> Result<&PropertyRecord> {
        let item = self.item(id)?;
        if !item.core.dirty && item.core.state == ItemState::Exists {
            if let Some(stored) = item.core.stored_path.clone() {
                match self.provider.get_property(&self.workspace, &stored) {
                    Ok(record) => {
                        if let Some(data) = self.item_mut(id)?.property_mut() {
                            data.record = record;
                        }
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        self.property(id)
    }

    // --- mutation ---

    /// Adds a new child node. Without an explicit type, the parent's child
    /// definition supplies the default.
    pub fn add_node(
        &mut self,
        parent: NodeId,
        name: QualifiedName,
        primary_type: Option<QualifiedName>,
    ) -> Result<NodeId> {
        self.sync_children(parent)?;
        let owner = self.item(parent)?;
        let parent_path = owner.core.path.clone();
        let data = self.node(parent)?;

        let default_type = data
            .definition
            .check_child(&name, data.has_child_named(&name))?;
        let primary_type = primary_type.or(default_type).ok_or_else(|| {
            StoreError::ConstraintViolation(format!(
                "no primary type given for {} and {} declares no default",
                name, data.primary_type
            ))
        })?;
        let definition = self.schema.definitions_for(&primary_type)?;

        let index = data.children.iter().filter(|e| e.name == name).count() as u32 + 1;
        let path = parent_path.child(Component::new(name.clone(), index)?);
        if self.by_path.contains_key(&path) {
            return Err(StoreError::ItemExists(path.to_string()));
        }

        let id = NodeId(self.alloc(Item {
            core: ItemCore {
                path: path.clone(),
                parent: Some(parent),
                state: ItemState::New,
                dirty: true,
                stored_path: None,
            },
            kind: ItemKind::Node(NodeData {
                primary_type: primary_type.clone(),
                definition: Arc::clone(&definition),
                children: Vec::new(),
                properties: BTreeMap::new(),
            }),
        }));
        self.by_path.insert(path.clone(), id.0);
        self.node_mut(parent)?.children.push(ChildEntry {
            name,
            item: Some(id),
            stored_index: None,
        });
        self.item_mut(parent)?.core.dirty = true;

        self.attach_property(
            id,
            QualifiedName::primary_type(),
            PropertyRecord::single(Value::Name(primary_type)),
            ItemState::New,
        )?;
        for def in definition.auto_created() {
            let record = if def.name == QualifiedName::uuid() {
                PropertyRecord::single(Value::String(generate_reference_key(&path)))
            } else if def.default_values.is_empty() {
                continue;
            } else if def.multiple {
                PropertyRecord::multiple(def.kind, def.default_values.clone())?
            } else {
                PropertyRecord::single(def.default_values[0].clone())
            };
            self.attach_property(id, def.name.clone(), record, ItemState::New)?;
        }

        trace!(path = %path, "added node");
        Ok(id)
    }

    /// Assigns a property on `node`, creating it if needed. Multiplicity is
    /// fixed once the property exists.
    pub fn set_property(
        &mut self,
        node: NodeId,
        name: QualifiedName,
        record: PropertyRecord,
    ) -> Result<(PropertyId, Assignment)> {
        record.validate()?;
        if name == QualifiedName::primary_type() {
            return Err(StoreError::ConstraintViolation(
                "jcr:primaryType is assigned when the node is added".to_string(),
            ));
        }
        self.node(node)?.definition.check_property(&name, &record)?;

        let existing = self.node(node)?.properties.get(&name).copied();
        let outcome = match existing {
            Some(id) => {
                let item = self.item_mut(id)?;
                let path = item.core.path.clone();
                let data = item.property_mut().ok_or_else(|| {
                    StoreError::PathNotFound(format!("{} is not a property", path))
                })?;
                if data.record.multiple != record.multiple {
                    return Err(StoreError::ConstraintViolation(format!(
                        "{} is {}; multiplicity is fixed at creation",
                        path,
                        if data.record.multiple { "multi-valued" } else { "single-valued" }
                    )));
                }
                let previous = std::mem::replace(&mut data.record, record);
                item.core.dirty = true;
                (id, Assignment::Modified(previous))
            }
            None => {
                self.sync_children(node)?;
                if self.node(node)?.has_child_named(&name) {
                    let path = self.item(node)?.core.path.child_named(name);
                    return Err(StoreError::ItemExists(format!(
                        "{} is already a child node",
                        path
                    )));
                }
                let id = self.attach_property(node, name, record, ItemState::New)?;
                (id, Assignment::Created)
            }
        };
        self.item_mut(node)?.core.dirty = true;
        Ok(outcome)
    }

    /// Removes an item. Nodes go with their whole resident subtree, children
    /// before parents. Returns the removed item in its terminal state.
    pub fn remove(&mut self, id: ItemId) -> Result<Item> {
        if id == self.root.0 {
            return Err(StoreError::ConstraintViolation(
                "the root node cannot be removed".to_string(),
            ));
        }
        let item = self.item(id)?;
        let parent = item.core.parent.ok_or_else(|| {
            StoreError::ConstraintViolation(format!("{} has no parent", item.path()))
        })?;
        let name = item.name().cloned().ok_or_else(|| {
            StoreError::ConstraintViolation("the root node cannot be removed".to_string())
        })?;

        let removed = if item.is_node() {
            let node = NodeId(id);
            let position = self.node(parent)?.position_of_item(node).ok_or_else(|| {
                StoreError::PathNotFound(format!("{} is not linked to its parent", name))
            })?;
            let removed = self.drop_subtree(node)?;
            self.node_mut(parent)?.children.remove(position);
            self.renumber_siblings(parent, &name, position)?;
            removed
        } else {
            self.node_mut(parent)?.properties.remove(&name);
            self.release(id)
                .ok_or_else(|| StoreError::PathNotFound(format!("item {} vanished", id)))?
        };

        self.item_mut(parent)?.core.dirty = true;
        debug!(workspace = %self.workspace, path = %removed.path(), "removed item");
        Ok(removed)
    }

    fn drop_subtree(&mut self, node: NodeId) -> Result<Item> {
        let children = self.loaded_children(node)?;
        let properties = self.properties(node)?;
        for child in children {
            self.drop_subtree(child)?;
        }
        for property in properties {
            self.release(property.0);
        }
        self.release(node.0)
            .ok_or_else(|| StoreError::PathNotFound(format!("item {} vanished", node.0)))
    }

    /// Re-keys loaded same-name siblings at or after `from` whose index
    /// shifted down
    fn renumber_siblings(&mut self, parent: NodeId, name: &QualifiedName, from: usize) -> Result<()> {
        let parent_path = self.item(parent)?.core.path.clone();
        let count = self.node(parent)?.children.len();
        for position in from..count {
            let data = self.node(parent)?;
            let entry = &data.children[position];
            if &entry.name != name {
                continue;
            }
            let Some(id) = entry.item else {
                continue;
            };
            let index = data.sibling_index(position);
            let path = parent_path.child(Component::new(name.clone(), index)?);
            self.rekey_subtree(id, path)?;
        }
        Ok(())
    }

    fn rekey_subtree(&mut self, node: NodeId, path: Path) -> Result<()> {
        if self.item(node)?.core.path == path {
            return Ok(());
        }
        self.rekey(node.0, path.clone())?;

        for (name, property) in self.node(node)?.properties.clone() {
            self.rekey(property.0, path.child_named(name))?;
        }
        let data = self.node(node)?;
        let loaded: Vec<(NodeId, Component)> = data
            .children
            .iter()
            .enumerate()
            .filter_map(|(position, e)| {
                let component = Component::new(e.name.clone(), data.sibling_index(position)).ok()?;
                Some((e.item?, component))
            })
            .collect();
        for (child, component) in loaded {
            self.rekey_subtree(child, path.child(component))?;
        }
        Ok(())
    }

    fn rekey(&mut self, id: ItemId, path: Path) -> Result<()> {
        let old = std::mem::replace(&mut self.item_mut(id)?.core.path, path.clone());
        if self.by_path.get(&old) == Some(&id) {
            self.by_path.remove(&old);
        }
        trace!(from = %old, to = %path, "re-keyed item");
        self.by_path.insert(path, id);
        Ok(())
    }

    /// Drops everything and reloads the root
    pub fn reset(&mut self) -> Result<()> {
        let live: Vec<ItemId> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.item.is_some())
            .map(|(index, slot)| ItemId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect();
        for id in live {
            self.release(id);
        }
        self.by_path.clear();
        self.root = self.populate_node(Path::root(), Path::root(), None)?;
        debug!(workspace = %self.workspace, "reset resident items");
        Ok(())
    }

    // --- save support ---

    /// True if the node or any direct child (node or property) is dirty
    pub fn is_modified(&self, node: NodeId) -> Result<bool> {
        if self.item(node)?.core.dirty {
            return Ok(true);
        }
        let data = self.node(node)?;
        let children = data.children.iter().filter_map(|e| e.item.map(|n| n.0));
        let properties = data.properties.values().map(|p| p.0);
        for id in children.chain(properties) {
            if self.item(id)?.core.dirty {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Dirty nodes in pre-order, so parents precede children and siblings
    /// keep their order
    pub fn dirty_nodes(&self) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut pending = vec![self.root];
        while let Some(node) = pending.pop() {
            if self.item(node)?.core.dirty {
                out.push(node);
            }
            let mut children = self.loaded_children(node)?;
            children.reverse();
            pending.extend(children);
        }
        Ok(out)
    }

    /// Marks a node and its properties as persisted at their current paths
    pub fn mark_saved(&mut self, node: NodeId) -> Result<()> {
        for id in std::iter::once(node.0).chain(self.properties(node)?.into_iter().map(|p| p.0)) {
            let item = self.item_mut(id)?;
            item.core.state = ItemState::Exists;
            item.core.dirty = false;
            item.core.stored_path = Some(item.core.path.clone());
        }
        if let Some(parent) = self.item(node)?.core.parent {
            let data = self.node_mut(parent)?;
            if let Some(position) = data.position_of_item(node) {
                let index = data.sibling_index(position);
                data.children[position].stored_index = Some(index);
            }
        }
        Ok(())
    }

    /// Follows a provider-side compaction: later same-name siblings of
    /// `removed` moved down one index
    pub fn compact_stored(&mut self, removed: &Path) -> Result<()> {
        let parent_stored = removed.parent();
        for slot in &mut self.slots {
            let Some(item) = slot.item.as_mut() else {
                continue;
            };
            if let Some(stored) = item.core.stored_path.as_ref() {
                if let Some(shifted) = shift_after_removal(stored, removed) {
                    item.core.stored_path = Some(shifted);
                }
            }
            if item.core.stored_path.is_some() && item.core.stored_path == parent_stored {
                if let (Some(data), Some(name)) = (item.node_mut(), removed.name()) {
                    for entry in data.children.iter_mut().filter(|e| &e.name == name) {
                        if let Some(index) = entry.stored_index.filter(|i| *i > removed.index()) {
                            entry.stored_index = Some(index - 1);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Where `path` lives after the provider removed `removed` and moved its
/// later same-name siblings down one index. None if `path` is unaffected.
pub(crate) fn shift_after_removal(path: &Path, removed: &Path) -> Option<Path> {
    let parent = removed.parent()?;
    let depth = removed.depth();
    if path.depth() < depth || !parent.is_ancestor_of(path) {
        return None;
    }
    let component = &path.components()[depth - 1];
    if Some(component.name()) != removed.name() || component.index() <= removed.index() {
        return None;
    }
    let from = parent.child(component.clone());
    let to = parent.child(component.with_index(component.index() - 1).ok()?);
    path.rebase(&from, &to)
}

static KEY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a reference key for a new referenceable node
pub(crate) fn generate_reference_key(path: &Path) -> String {
    let input = format!(
        "{}{}{}",
        path,
        Utc::now().timestamp_nanos_opt().unwrap_or(0),
        KEY_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let hash = blake3::hash(input.as_bytes());
    hash.to_hex()[..32].to_string()
}
