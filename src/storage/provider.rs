//! Storage provider SPI
//!
//! A [`StorageProvider`] persists one or more workspaces. Every call names
//! the workspace and path it works on; providers keep no per-session state,
//! so one instance is shared by every session of a repository.
//!
//! Node paths carry sibling indices. A property lives at its node's path plus
//! one unindexed component holding the property name.

use crate::error::{Result, StoreError};
use crate::item::PropertyRecord;
use crate::path::{Path, QualifiedName};

pub trait StorageProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn workspaces(&self) -> Result<Vec<String>>;

    /// Creates the workspace and its root node if missing
    fn create_workspace(&self, workspace: &str) -> Result<()>;

    fn node_exists(&self, workspace: &str, path: &Path) -> Result<bool>;

    fn property_exists(&self, workspace: &str, path: &Path) -> Result<bool>;

    /// Immediate child node paths. Same-name siblings appear in index order.
    fn list_children(&self, workspace: &str, path: &Path) -> Result<Vec<Path>>;

    fn list_properties(&self, workspace: &str, path: &Path) -> Result<Vec<QualifiedName>>;

    fn get_property(&self, workspace: &str, path: &Path) -> Result<PropertyRecord>;

    /// Writes the existence marker of a node. The parent must exist and the
    /// path must be free.
    fn add_node(&self, workspace: &str, path: &Path) -> Result<()>;

    /// Creates or overwrites a property on an existing node
    fn put_property(&self, workspace: &str, path: &Path, record: &PropertyRecord) -> Result<()>;

    /// Removes a property, or a node and everything beneath it
    fn remove(&self, workspace: &str, path: &Path) -> Result<()>;

    fn copy(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        let _ = (from, to);
        Err(StoreError::Unsupported(format!(
            "{} provider cannot copy in workspace '{}'",
            self.name(),
            workspace
        )))
    }

    /// Moves a subtree. Lowering the index of a same-name sibling keeps its
    /// position in the child list; any other move appends it to the new
    /// parent's children.
    fn move_path(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        let _ = (from, to);
        Err(StoreError::Unsupported(format!(
            "{} provider cannot move in workspace '{}'",
            self.name(),
            workspace
        )))
    }

    /// Finds the node whose `jcr:uuid` equals `key`. The default walks the
    /// whole workspace.
    fn find_by_reference(&self, workspace: &str, key: &str) -> Result<Option<Path>> {
        let uuid = QualifiedName::uuid();
        let mut pending = vec![Path::root()];

        while let Some(node) = pending.pop() {
            let property = node.child_named(uuid.clone());
            if self.property_exists(workspace, &property)? {
                let record = self.get_property(workspace, &property)?;
                if record.value().and_then(|v| v.as_str()) == Some(key) {
                    return Ok(Some(node));
                }
            }
            let mut children = self.list_children(workspace, &node)?;
            children.reverse();
            pending.extend(children);
        }
        Ok(None)
    }
}

/// Shared checks for move and copy targets
pub(crate) fn check_transfer(from: &Path, to: &Path) -> Result<()> {
    if from.is_root() || to.is_root() {
        return Err(StoreError::ConstraintViolation(
            "the root node cannot be moved or copied".to_string(),
        ));
    }
    if from.contains(to) {
        return Err(StoreError::ConstraintViolation(format!(
            "cannot move or copy {} beneath itself",
            from
        )));
    }
    Ok(())
}

/// True if a move keeps the node's position among its siblings: same
/// parent, same name, lower index. Every other move re-appends the node.
pub(crate) fn keeps_position(from: &Path, to: &Path) -> bool {
    from.parent() == to.parent() && from.name() == to.name() && to.index() < from.index()
}
