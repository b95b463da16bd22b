//! In-process storage provider
//!
//! Keeps every workspace in a map guarded by one `RwLock`. Children keep
//! insertion order. Nothing survives the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::provider::{check_transfer, keeps_position, StorageProvider};
use crate::error::{Result, StoreError};
use crate::item::PropertyRecord;
use crate::path::{Path, QualifiedName};

#[derive(Debug, Clone, Default)]
struct NodeRecord {
    children: Vec<Path>,
    properties: BTreeMap<QualifiedName, PropertyRecord>,
}

type Workspace = HashMap<Path, NodeRecord>;

#[derive(Debug, Default)]
pub struct MemoryProvider {
    workspaces: RwLock<BTreeMap<String, Workspace>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, workspace: &str, f: impl FnOnce(&Workspace) -> Result<T>) -> Result<T> {
        let guard = self
            .workspaces
            .read()
            .map_err(|_| StoreError::poisoned("memory provider"))?;
        let ws = guard
            .get(workspace)
            .ok_or_else(|| StoreError::provider(workspace, "/", "unknown workspace"))?;
        f(ws)
    }

    fn write<T>(&self, workspace: &str, f: impl FnOnce(&mut Workspace) -> Result<T>) -> Result<T> {
        let mut guard = self
            .workspaces
            .write()
            .map_err(|_| StoreError::poisoned("memory provider"))?;
        let ws = guard
            .get_mut(workspace)
            .ok_or_else(|| StoreError::provider(workspace, "/", "unknown workspace"))?;
        f(ws)
    }
}

fn node<'a>(ws: &'a Workspace, path: &Path) -> Result<&'a NodeRecord> {
    ws.get(path)
        .ok_or_else(|| StoreError::PathNotFound(path.to_string()))
}

fn node_mut<'a>(ws: &'a mut Workspace, path: &Path) -> Result<&'a mut NodeRecord> {
    ws.get_mut(path)
        .ok_or_else(|| StoreError::PathNotFound(path.to_string()))
}

/// Splits a property path into its node path and name
fn split(path: &Path) -> Result<(Path, QualifiedName)> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name.clone())),
        _ => Err(StoreError::PathNotFound(path.to_string())),
    }
}

/// Checks the destination of a move or copy: parent present, path free
fn check_destination(ws: &Workspace, to: &Path) -> Result<Path> {
    let parent = to
        .parent()
        .ok_or_else(|| StoreError::ItemExists(to.to_string()))?;
    node(ws, &parent)?;
    if ws.contains_key(to) {
        return Err(StoreError::ItemExists(to.to_string()));
    }
    Ok(parent)
}

/// Every record at or beneath `from`, re-rooted onto `to`
fn rebased_subtree(ws: &Workspace, from: &Path, to: &Path) -> Vec<(Path, Path, NodeRecord)> {
    ws.iter()
        .filter(|(path, _)| from.contains(path))
        .filter_map(|(path, record)| {
            let target = path.rebase(from, to)?;
            let mut record = record.clone();
            record.children = record
                .children
                .iter()
                .filter_map(|c| c.rebase(from, to))
                .collect();
            Some((path.clone(), target, record))
        })
        .collect()
}

impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn workspaces(&self) -> Result<Vec<String>> {
        let guard = self
            .workspaces
            .read()
            .map_err(|_| StoreError::poisoned("memory provider"))?;
        Ok(guard.keys().cloned().collect())
    }

    fn create_workspace(&self, workspace: &str) -> Result<()> {
        let mut guard = self
            .workspaces
            .write()
            .map_err(|_| StoreError::poisoned("memory provider"))?;
        guard
            .entry(workspace.to_string())
            .or_insert_with(|| HashMap::from([(Path::root(), NodeRecord::default())]));
        Ok(())
    }

    fn node_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
        self.read(workspace, |ws| Ok(ws.contains_key(path)))
    }

    fn property_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
        let Ok((parent, name)) = split(path) else {
            return Ok(false);
        };
        self.read(workspace, |ws| {
            Ok(ws
                .get(&parent)
                .is_some_and(|n| n.properties.contains_key(&name)))
        })
    }

    fn list_children(&self, workspace: &str, path: &Path) -> Result<Vec<Path>> {
        self.read(workspace, |ws| Ok(node(ws, path)?.children.clone()))
    }

    fn list_properties(&self, workspace: &str, path: &Path) -> Result<Vec<QualifiedName>> {
        self.read(workspace, |ws| {
            Ok(node(ws, path)?.properties.keys().cloned().collect())
        })
    }

    fn get_property(&self, workspace: &str, path: &Path) -> Result<PropertyRecord> {
        let (parent, name) = split(path)?;
        self.read(workspace, |ws| {
            node(ws, &parent)?
                .properties
                .get(&name)
                .cloned()
                .ok_or_else(|| StoreError::PathNotFound(path.to_string()))
        })
    }

    fn add_node(&self, workspace: &str, path: &Path) -> Result<()> {
        self.write(workspace, |ws| {
            let parent = check_destination(ws, path)?;
            ws.insert(path.clone(), NodeRecord::default());
            node_mut(ws, &parent)?.children.push(path.clone());
            Ok(())
        })
    }

    fn put_property(&self, workspace: &str, path: &Path, record: &PropertyRecord) -> Result<()> {
        record.validate()?;
        let (parent, name) = split(path)?;
        self.write(workspace, |ws| {
            node_mut(ws, &parent)?.properties.insert(name, record.clone());
            Ok(())
        })
    }

    fn remove(&self, workspace: &str, path: &Path) -> Result<()> {
        if path.is_root() {
            return Err(StoreError::ConstraintViolation(
                "the root node cannot be removed".to_string(),
            ));
        }
        let (parent, name) = split(path)?;
        self.write(workspace, |ws| {
            if ws.contains_key(path) {
                ws.retain(|p, _| !path.contains(p));
                node_mut(ws, &parent)?.children.retain(|c| c != path);
                return Ok(());
            }
            node_mut(ws, &parent)?
                .properties
                .remove(&name)
                .map(|_| ())
                .ok_or_else(|| StoreError::PathNotFound(path.to_string()))
        })
    }

    fn copy(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        check_transfer(from, to)?;
        self.write(workspace, |ws| {
            node(ws, from)?;
            let parent = check_destination(ws, to)?;
            for (_, target, record) in rebased_subtree(ws, from, to) {
                ws.insert(target, record);
            }
            node_mut(ws, &parent)?.children.push(to.clone());
            Ok(())
        })
    }

    fn move_path(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        check_transfer(from, to)?;
        self.write(workspace, |ws| {
            node(ws, from)?;
            let to_parent = check_destination(ws, to)?;
            let from_parent = from
                .parent()
                .ok_or_else(|| StoreError::PathNotFound(from.to_string()))?;

            for (source, target, record) in rebased_subtree(ws, from, to) {
                ws.remove(&source);
                ws.insert(target, record);
            }

            if keeps_position(from, to) {
                let siblings = &mut node_mut(ws, &from_parent)?.children;
                if let Some(slot) = siblings.iter_mut().find(|c| **c == *from) {
                    *slot = to.clone();
                }
            } else {
                node_mut(ws, &from_parent)?.children.retain(|c| c != from);
                node_mut(ws, &to_parent)?.children.push(to.clone());
            }
            Ok(())
        })
    }
}
