//! Unit of work over one workspace
//!
//! A [`Session`] owns an [`ItemGraph`] and a [`ChangeTracker`]. Mutations
//! change the graph and append to the log; nothing reaches the provider
//! until [`Session::save`] or [`Session::save_node`].
//!
//! Save is not atomic across nodes. Each node is written and marked clean
//! in turn; if the provider fails part way, earlier nodes stay written and
//! clean while the rest stay dirty.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use super::changes::{Change, ChangeKind, ChangeTracker};
use crate::error::{Result, StoreError};
use crate::item::{
    generate_reference_key, shift_after_removal, Assignment, ItemGraph, ItemId, ItemState, NodeId,
    PropertyId, PropertyRecord, SchemaResolver, Value,
};
use crate::path::{Component, HandleTable, Path, PathFactory, PathHandle, QualifiedName};
use crate::storage::{check_transfer, StorageProvider};

pub struct Session {
    workspace: String,
    provider: Arc<dyn StorageProvider>,
    factory: Arc<PathFactory>,
    handles: Arc<HandleTable>,
    graph: ItemGraph,
    changes: ChangeTracker,
}

impl Session {
    pub(crate) fn open(
        workspace: &str,
        provider: Arc<dyn StorageProvider>,
        schema: Arc<dyn SchemaResolver>,
        factory: Arc<PathFactory>,
        handles: Arc<HandleTable>,
    ) -> Result<Self> {
        let graph = ItemGraph::new(Arc::clone(&provider), schema, workspace)?;
        debug!(workspace, provider = provider.name(), "opened session");
        Ok(Self {
            workspace: workspace.to_string(),
            provider,
            factory,
            handles,
            graph,
            changes: ChangeTracker::new(),
        })
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn factory(&self) -> &PathFactory {
        &self.factory
    }

    /// Read-only access for traversal by query and export tooling
    pub fn graph(&self) -> &ItemGraph {
        &self.graph
    }

    pub fn changes(&self) -> &ChangeTracker {
        &self.changes
    }

    // --- paths ---

    /// Parses a path; relative input resolves against the root
    pub fn parse_path(&self, input: &str) -> Result<Path> {
        self.factory.resolve(&Path::root(), input)
    }

    /// The prefixed string form of `path`
    pub fn format(&self, path: &Path) -> String {
        self.factory.format(path).to_string()
    }

    // --- reads ---

    pub fn root_node(&self) -> NodeId {
        self.graph.root()
    }

    pub fn node(&mut self, path: &str) -> Result<NodeId> {
        let path = self.parse_path(path)?;
        self.graph.get_node(&path)
    }

    pub fn node_at(&mut self, path: &Path) -> Result<NodeId> {
        self.graph.get_node(path)
    }

    pub fn property(&mut self, path: &str) -> Result<PropertyId> {
        let path = self.parse_path(path)?;
        self.graph.get_property(&path)
    }

    pub fn item(&mut self, path: &str) -> Result<ItemId> {
        let path = self.parse_path(path)?;
        self.graph.get_item(&path)
    }

    pub fn item_exists(&mut self, path: &str) -> Result<bool> {
        match self.item(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Current path of a resident item
    pub fn path_of(&self, id: impl Into<ItemId>) -> Result<Path> {
        Ok(self.graph.item(id)?.path().clone())
    }

    pub fn parent_of(&self, id: impl Into<ItemId>) -> Result<Option<NodeId>> {
        Ok(self.graph.item(id)?.parent())
    }

    pub fn primary_type(&self, node: NodeId) -> Result<QualifiedName> {
        Ok(self.graph.node(node)?.primary_type().clone())
    }

    pub fn children(&mut self, node: NodeId) -> Result<Vec<NodeId>> {
        self.graph.children(node)
    }

    pub fn child_paths(&mut self, node: NodeId) -> Result<Vec<Path>> {
        self.graph.child_paths(node)
    }

    pub fn properties(&mut self, node: NodeId) -> Result<Vec<PropertyId>> {
        self.graph.load_properties(node)
    }

    /// The property's value, re-read if clean so other sessions' saves show
    pub fn value(&mut self, property: PropertyId) -> Result<PropertyRecord> {
        self.graph.refresh_property(property).cloned()
    }

    // --- writes ---

    /// Adds a node at `path`. The parent must exist; the last component
    /// carries no index, since siblings are numbered by position.
    pub fn add_node(&mut self, path: &str, primary_type: Option<&str>) -> Result<NodeId> {
        let path = self.parse_path(path)?;
        let (Some(parent_path), Some(last)) = (path.parent(), path.last()) else {
            return Err(StoreError::ItemExists(path.to_string()));
        };
        if last.index() != 1 {
            return Err(StoreError::invalid_path(
                path.to_string(),
                "a new node cannot be given a sibling index",
            ));
        }
        let primary_type = primary_type
            .map(|t| self.factory.parse_name(t))
            .transpose()?;
        let parent = self.graph.get_node(&parent_path)?;
        self.add_child(parent, last.name().clone(), primary_type)
    }

    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: QualifiedName,
        primary_type: Option<QualifiedName>,
    ) -> Result<NodeId> {
        let node = self.graph.add_node(parent, name, primary_type)?;
        let path = self.path_of(node)?;
        self.changes.record(Change {
            kind: ChangeKind::Added,
            path,
            item: node.item(),
            stored_path: None,
            snapshot: None,
            node: true,
        })?;
        Ok(node)
    }

    /// Sets the property at `path` on an existing node
    pub fn set_property(&mut self, path: &str, record: PropertyRecord) -> Result<PropertyId> {
        let path = self.parse_path(path)?;
        let (Some(node_path), Some(last)) = (path.parent(), path.last()) else {
            return Err(StoreError::invalid_path(path.to_string(), "not a property path"));
        };
        if last.index() != 1 {
            return Err(StoreError::invalid_path(
                path.to_string(),
                "properties have no sibling index",
            ));
        }
        let node = self.graph.get_node(&node_path)?;
        self.set_property_on(node, last.name().clone(), record)
    }

    pub fn set_property_on(
        &mut self,
        node: NodeId,
        name: QualifiedName,
        record: PropertyRecord,
    ) -> Result<PropertyId> {
        let (id, assignment) = self.graph.set_property(node, name, record.clone())?;
        let item = self.graph.item(id)?;
        let kind = match assignment {
            Assignment::Created => ChangeKind::Added,
            Assignment::Modified(_) => ChangeKind::Modified,
        };
        self.changes.record(Change {
            kind,
            path: item.path().clone(),
            item: id.item(),
            stored_path: item.core.stored_path.clone(),
            snapshot: Some(record),
            node: false,
        })?;
        Ok(id)
    }

    /// Removes the item at `path`
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let id = self.item(path)?;
        self.remove_item(id)
    }

    /// Removes a resident item. Handles beneath it are released; handles of
    /// later same-name siblings follow their renumbered paths.
    pub fn remove_item(&mut self, id: impl Into<ItemId>) -> Result<()> {
        let id = id.into();
        let item = self.graph.item(id)?;
        let path = item.path().clone();
        let is_node = item.is_node();
        let stored_path = item.core.stored_path.clone();
        let snapshot = item.as_property().map(|p| p.record().clone());
        let parent = item.parent();

        let later = match (is_node, parent) {
            (true, Some(parent)) => self
                .graph
                .child_paths(parent)?
                .into_iter()
                .filter(|p| p.name() == path.name() && p.index() > path.index())
                .collect(),
            _ => Vec::new(),
        };

        self.graph.remove(id)?;
        self.changes.record(Change {
            kind: ChangeKind::Removed,
            path: path.clone(),
            item: id,
            stored_path,
            snapshot,
            node: is_node,
        })?;

        self.handles.release_subtree(&path)?;
        if is_node {
            self.changes.follow_removal(&path)?;
            for sibling in later {
                if let Some(shifted) = shift_after_removal(&sibling, &path) {
                    self.handles.rebind_subtree(&sibling, &shifted)?;
                }
            }
        }
        Ok(())
    }

    // --- save ---

    pub fn has_pending_changes(&self) -> Result<bool> {
        self.changes.is_dirty()
    }

    /// True if the node or one of its direct children is dirty
    pub fn is_modified(&self, node: NodeId) -> Result<bool> {
        self.graph.is_modified(node)
    }

    /// Flushes every pending change, then forgets all resident state so
    /// the next access reloads from the provider
    pub fn save(&mut self) -> Result<()> {
        let removals = self.pending_removals(|_| true)?;
        let removed = removals.len();
        self.apply_removals(removals)?;

        let dirty = self.graph.dirty_nodes()?;
        for node in &dirty {
            self.persist_node(*node)?;
        }

        self.changes.clear()?;
        self.graph.reset()?;
        info!(
            workspace = %self.workspace,
            nodes = dirty.len(),
            removals = removed,
            "saved session"
        );
        Ok(())
    }

    /// Persists `node` and its direct dirty children only. Removals of
    /// direct children are flushed too, as are removals of same-name
    /// siblings of the node or its ancestors, so that the provider
    /// numbers the node the way the session does. The resident graph is
    /// kept.
    pub fn save_node(&mut self, node: NodeId) -> Result<()> {
        let path = self.graph.item(node)?.path().clone();
        let own = self.graph.item(node)?.core.stored_path.clone();
        let siblings = self.sibling_scopes(node)?;
        let removals = self.pending_removals(|removed| {
            let parent = removed.parent();
            (own.is_some() && parent == own)
                || siblings
                    .iter()
                    .any(|(scope, name)| parent.as_ref() == Some(scope) && removed.name() == Some(name))
        })?;
        self.apply_removals(removals)?;

        if self.graph.item(node)?.is_dirty() {
            self.persist_node(node)?;
        }
        for child in self.graph.loaded_children(node)? {
            if self.graph.item(child)?.is_dirty() {
                self.persist_node(child)?;
            }
        }
        debug!(workspace = %self.workspace, path = %path, "saved node");
        Ok(())
    }

    /// Discards pending changes and reloads from the provider
    pub fn refresh(&mut self) -> Result<()> {
        self.changes.clear()?;
        self.graph.reset()
    }

    /// (stored parent path, name) for the node and each of its ancestors.
    /// A pending removal in one of these scopes can shift the provider
    /// index of the node or of an ancestor.
    fn sibling_scopes(&self, node: NodeId) -> Result<Vec<(Path, QualifiedName)>> {
        let mut scopes = Vec::new();
        let mut current = node;
        while let Some(parent) = self.graph.item(current)?.parent() {
            let name = self.graph.item(current)?.name().cloned();
            let stored = self.graph.item(parent)?.core.stored_path.clone();
            if let (Some(stored), Some(name)) = (stored, name) {
                scopes.push((stored, name));
            }
            current = parent;
        }
        Ok(scopes)
    }

    /// Persisted removals selected by `filter` on their stored path, minus
    /// those inside another selected removal. Deepest first, then highest
    /// index first.
    fn pending_removals(&self, filter: impl Fn(&Path) -> bool) -> Result<Vec<Change>> {
        let mut selected: Vec<Change> = Vec::new();
        let mut candidates = self.changes.removals()?;
        candidates.retain(|c| c.stored_path.as_ref().is_some_and(|p| filter(p)));
        candidates.sort_by_key(|c| c.stored_path.as_ref().map(Path::depth));

        for change in candidates {
            let Some(stored) = change.stored_path.as_ref() else {
                continue;
            };
            let covered = selected
                .iter()
                .filter_map(|s| s.stored_path.as_ref())
                .any(|outer| outer.contains(stored));
            if !covered {
                selected.push(change);
            }
        }

        selected.sort_by(|a, b| {
            let key = |c: &Change| c.stored_path.as_ref().map(|p| (p.depth(), p.index()));
            key(b).cmp(&key(a))
        });
        Ok(selected)
    }

    fn apply_removals(&mut self, removals: Vec<Change>) -> Result<()> {
        let mut pending: VecDeque<Change> = removals.into();
        while let Some(change) = pending.pop_front() {
            let Some(stored) = change.stored_path.clone() else {
                continue;
            };
            match self.provider.remove(&self.workspace, &stored) {
                Ok(()) => {
                    if change.node {
                        self.compact_siblings(&stored)?;
                        for other in pending.iter_mut() {
                            let shifted = other
                                .stored_path
                                .as_ref()
                                .and_then(|p| shift_after_removal(p, &stored));
                            if shifted.is_some() {
                                other.stored_path = shifted;
                            }
                        }
                    }
                }
                Err(e) if e.is_not_found() => {
                    debug!(path = %stored, "already removed from provider");
                }
                Err(e) => return Err(e),
            }
            self.changes
                .forget(|c| c.kind == ChangeKind::Removed && c.item == change.item)?;
        }
        Ok(())
    }

    /// Moves later same-name siblings of `removed` down one index in the
    /// provider. Returns the (from, to) pairs in the order applied.
    fn compact_siblings(&mut self, removed: &Path) -> Result<Vec<(Path, Path)>> {
        let (Some(parent), Some(name)) = (removed.parent(), removed.name()) else {
            return Ok(Vec::new());
        };
        let mut later: Vec<Path> = self
            .provider
            .list_children(&self.workspace, &parent)?
            .into_iter()
            .filter(|c| c.name() == Some(name) && c.index() > removed.index())
            .collect();
        later.sort_by_key(Path::index);

        let mut moves = Vec::with_capacity(later.len());
        for sibling in later {
            let Some(target) = shift_after_removal(&sibling, removed) else {
                continue;
            };
            self.provider.move_path(&self.workspace, &sibling, &target)?;
            moves.push((sibling, target));
        }
        if !moves.is_empty() {
            debug!(path = %removed, moved = moves.len(), "compacted siblings");
        }

        self.graph.compact_stored(removed)?;
        self.changes.compact_stored(removed)?;
        Ok(moves)
    }

    /// Writes one node: its existence marker if new, then its new or
    /// modified properties
    fn persist_node(&mut self, node: NodeId) -> Result<()> {
        let item = self.graph.item(node)?;
        let path = item.path().clone();
        if item.state() == ItemState::New {
            self.provider.add_node(&self.workspace, &path)?;
        }

        let properties = self.graph.properties(node)?;
        for property in &properties {
            let item = self.graph.item(*property)?;
            if !item.is_dirty() {
                continue;
            }
            let target = item.path().clone();
            let record = self.graph.property(*property)?;
            self.provider.put_property(&self.workspace, &target, record)?;
        }

        self.graph.mark_saved(node)?;
        let saved: Vec<ItemId> = std::iter::once(node.item())
            .chain(properties.iter().map(|p| p.item()))
            .collect();
        self.changes
            .forget(|c| c.kind != ChangeKind::Removed && saved.contains(&c.item))?;
        debug!(workspace = %self.workspace, path = %path, "persisted node");
        Ok(())
    }

    // --- workspace operations ---

    fn require_clean(&self, operation: &str) -> Result<()> {
        if self.changes.is_dirty()? {
            return Err(StoreError::ConstraintViolation(format!(
                "{} requires a session without pending changes",
                operation
            )));
        }
        Ok(())
    }

    /// Resolves a transfer destination to the path the node will get: the
    /// next free sibling index under the destination parent
    fn transfer_target(&mut self, source: &Path, destination: &str) -> Result<Path> {
        let destination = self.parse_path(destination)?;
        let (Some(parent_path), Some(last)) = (destination.parent(), destination.last()) else {
            return Err(StoreError::ConstraintViolation(
                "the root node cannot be a destination".to_string(),
            ));
        };
        if last.index() != 1 {
            return Err(StoreError::invalid_path(
                destination.to_string(),
                "a destination cannot be given a sibling index",
            ));
        }

        let parent = self.graph.get_node(&parent_path)?;
        let taken = self
            .graph
            .child_paths(parent)?
            .iter()
            .filter(|p| p.name() == Some(last.name()))
            .count() as u32;
        let target = parent_path.child(Component::new(last.name().clone(), taken + 1)?);
        check_transfer(source, &target)?;
        Ok(target)
    }

    /// Moves a persisted subtree immediately, bypassing pending changes.
    /// Returns the node's new path.
    pub fn move_node(&mut self, from: &str, to: &str) -> Result<Path> {
        self.require_clean("move")?;
        let node = self.node(from)?;
        let source = self.path_of(node)?;
        let target = self.transfer_target(&source, to)?;

        self.provider.move_path(&self.workspace, &source, &target)?;
        self.handles.rebind_subtree(&source, &target)?;
        for (sibling, shifted) in self.compact_siblings(&source)? {
            self.handles.rebind_subtree(&sibling, &shifted)?;
        }
        self.graph.reset()?;

        // The moved node itself may have been renumbered by the compaction
        let landed = shift_after_removal(&target, &source).unwrap_or(target);
        info!(workspace = %self.workspace, from = %source, to = %landed, "moved node");
        Ok(landed)
    }

    /// Copies a persisted subtree immediately. Copied nodes get fresh
    /// reference keys. Returns the copy's path.
    pub fn copy_node(&mut self, from: &str, to: &str) -> Result<Path> {
        self.require_clean("copy")?;
        let node = self.node(from)?;
        let source = self.path_of(node)?;
        let target = self.transfer_target(&source, to)?;

        self.provider.copy(&self.workspace, &source, &target)?;
        self.rekey_references(&target)?;
        self.graph.reset()?;
        info!(workspace = %self.workspace, from = %source, to = %target, "copied node");
        Ok(target)
    }

    fn rekey_references(&self, root: &Path) -> Result<()> {
        let uuid = QualifiedName::uuid();
        let mut pending = vec![root.clone()];
        while let Some(node) = pending.pop() {
            let property = node.child_named(uuid.clone());
            if self.provider.property_exists(&self.workspace, &property)? {
                let record = PropertyRecord::single(Value::String(generate_reference_key(&node)));
                self.provider.put_property(&self.workspace, &property, &record)?;
            }
            pending.extend(self.provider.list_children(&self.workspace, &node)?);
        }
        Ok(())
    }

    /// The node whose `jcr:uuid` is `key`
    pub fn node_by_identifier(&mut self, key: &str) -> Result<NodeId> {
        let path = self
            .provider
            .find_by_reference(&self.workspace, key)?
            .ok_or_else(|| StoreError::PathNotFound(format!("no node with identifier {}", key)))?;
        self.graph.get_node(&path)
    }

    // --- stable handles ---

    pub fn handle_for(&self, id: impl Into<ItemId>) -> Result<PathHandle> {
        let path = self.path_of(id)?;
        self.handles.acquire(&path)
    }

    pub fn node_by_handle(&mut self, handle: PathHandle) -> Result<NodeId> {
        let path = self.handles.resolve(handle)?;
        self.graph.get_node(&path)
    }

    pub fn item_by_handle(&mut self, handle: PathHandle) -> Result<ItemId> {
        let path = self.handles.resolve(handle)?;
        self.graph.get_item(&path)
    }

    // --- unsupported ---

    pub fn lock(&mut self, path: &str) -> Result<()> {
        Err(StoreError::Unsupported(format!("locking ({})", path)))
    }

    pub fn unlock(&mut self, path: &str) -> Result<()> {
        Err(StoreError::Unsupported(format!("locking ({})", path)))
    }

    pub fn checkin(&mut self, path: &str) -> Result<()> {
        Err(StoreError::Unsupported(format!("versioning ({})", path)))
    }

    pub fn checkout(&mut self, path: &str) -> Result<()> {
        Err(StoreError::Unsupported(format!("versioning ({})", path)))
    }

    pub fn add_event_listener(&mut self, path: &str) -> Result<()> {
        Err(StoreError::Unsupported(format!("observation ({})", path)))
    }
}
