//! Filesystem storage provider
//!
//! ## Layout
//!
//! ```text
//! <root>/
//! ├── .lock                     # fs2 lock shared by every writer
//! └── <workspace>/              # root node
//!     ├── .node                 # existence marker
//!     ├── title.meta.json       # property metadata: type, multiplicity, count
//!     ├── title.data.json       # property values
//!     ├── child/
//!     │   └── .node
//!     └── child~2/              # same-name sibling with index 2
//!         └── .node
//! ```
//!
//! Names are stored in expanded form with every character outside
//! `[A-Za-z0-9_-]` percent-escaped, so a stored name never contains `.` or
//! `~` and the suffixes above stay unambiguous. A directory without `.node`
//! is not a node.
//!
//! Reads take a shared lock, writes an exclusive one. Files are written to a
//! temp file and renamed into place.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path as FsPath, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::provider::{check_transfer, StorageProvider};
use crate::error::{Result, StoreError};
use crate::item::{PropertyRecord, PropertyType, Value};
use crate::path::{Component, Path, QualifiedName};

const NODE_MARKER: &str = ".node";
const META_SUFFIX: &str = ".meta.json";
const DATA_SUFFIX: &str = ".data.json";

#[derive(Debug, Serialize, Deserialize)]
struct PropertyMeta {
    #[serde(rename = "type")]
    kind: PropertyType,
    multiple: bool,
    count: usize,
}

pub struct FileSystemProvider {
    root: PathBuf,
    lock_path: PathBuf,
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn unescape(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = escaped.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn segment(component: &Component) -> String {
    let name = escape(&component.name().to_string());
    match component.index() {
        1 => name,
        n => format!("{}~{}", name, n),
    }
}

fn parse_segment(segment: &str) -> Option<Component> {
    let (name, index) = match segment.rsplit_once('~') {
        Some((name, index)) => (name, index.parse().ok()?),
        None => (segment, 1),
    };
    let name: QualifiedName = unescape(name)?.parse().ok()?;
    Component::new(name, index).ok()
}

fn write_atomic(target: &FsPath, bytes: &[u8]) -> io::Result<()> {
    let temp = target.with_extension("tmp");
    fs::write(&temp, bytes)?;
    fs::rename(&temp, target)
}

fn copy_dir(from: &FsPath, to: &FsPath) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

impl FileSystemProvider {
    /// Opens (creating if needed) a provider rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StoreError::provider("", root.display(), e))?;
        let lock_path = root.join(".lock");
        Ok(Self { root, lock_path })
    }

    pub fn root(&self) -> &FsPath {
        &self.root
    }

    fn lock(&self, exclusive: bool) -> Result<File> {
        let fail = |e: io::Error| StoreError::provider("", self.lock_path.display(), e);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(fail)?;
        if exclusive {
            file.lock_exclusive().map_err(fail)?;
        } else {
            file.lock_shared().map_err(fail)?;
        }
        // Lock is released when the file is dropped
        Ok(file)
    }

    fn workspace_dir(&self, workspace: &str) -> Result<PathBuf> {
        let dir = self.root.join(escape(workspace));
        if !dir.join(NODE_MARKER).is_file() {
            return Err(StoreError::provider(workspace, "/", "unknown workspace"));
        }
        Ok(dir)
    }

    fn node_dir(&self, workspace: &str, path: &Path) -> Result<PathBuf> {
        let mut dir = self.workspace_dir(workspace)?;
        for component in path.components() {
            dir.push(segment(component));
        }
        Ok(dir)
    }

    fn is_node(dir: &FsPath) -> bool {
        dir.join(NODE_MARKER).is_file()
    }

    /// Directory of an existing node, or PathNotFound
    fn existing_node(&self, workspace: &str, path: &Path) -> Result<PathBuf> {
        let dir = self.node_dir(workspace, path)?;
        if !Self::is_node(&dir) {
            return Err(StoreError::PathNotFound(path.to_string()));
        }
        Ok(dir)
    }

    /// Metadata and data file paths of a property
    fn property_files(&self, workspace: &str, path: &Path) -> Result<(PathBuf, PathBuf, PathBuf)> {
        let (Some(node), Some(name)) = (path.parent(), path.name()) else {
            return Err(StoreError::PathNotFound(path.to_string()));
        };
        let dir = self.node_dir(workspace, &node)?;
        let stem = escape(&name.to_string());
        let meta = dir.join(format!("{}{}", stem, META_SUFFIX));
        let data = dir.join(format!("{}{}", stem, DATA_SUFFIX));
        Ok((dir, meta, data))
    }

    /// Checks a move or copy destination and returns its directory
    fn free_destination(&self, workspace: &str, to: &Path) -> Result<PathBuf> {
        let parent = to
            .parent()
            .ok_or_else(|| StoreError::ItemExists(to.to_string()))?;
        self.existing_node(workspace, &parent)?;
        let dir = self.node_dir(workspace, to)?;
        if Self::is_node(&dir) {
            return Err(StoreError::ItemExists(to.to_string()));
        }
        if dir.exists() {
            // Leftover directory without a marker
            fs::remove_dir_all(&dir).map_err(|e| StoreError::provider(workspace, to, e))?;
        }
        Ok(dir)
    }
}

impl StorageProvider for FileSystemProvider {
    fn name(&self) -> &str {
        "fs"
    }

    fn workspaces(&self) -> Result<Vec<String>> {
        let _lock = self.lock(false)?;
        let entries =
            fs::read_dir(&self.root).map_err(|e| StoreError::provider("", self.root.display(), e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| Self::is_node(&entry.path()))
            .filter_map(|entry| unescape(&entry.file_name().to_string_lossy()))
            .collect();
        names.sort();
        Ok(names)
    }

    fn create_workspace(&self, workspace: &str) -> Result<()> {
        let _lock = self.lock(true)?;
        let dir = self.root.join(escape(workspace));
        if Self::is_node(&dir) {
            return Ok(());
        }
        fs::create_dir_all(&dir)
            .and_then(|_| write_atomic(&dir.join(NODE_MARKER), b""))
            .map_err(|e| StoreError::provider(workspace, "/", e))?;
        debug!(workspace, root = %self.root.display(), "created workspace");
        Ok(())
    }

    fn node_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
        let _lock = self.lock(false)?;
        Ok(Self::is_node(&self.node_dir(workspace, path)?))
    }

    fn property_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
        let _lock = self.lock(false)?;
        match self.property_files(workspace, path) {
            Ok((_, meta, _)) => Ok(meta.is_file()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list_children(&self, workspace: &str, path: &Path) -> Result<Vec<Path>> {
        let _lock = self.lock(false)?;
        let dir = self.existing_node(workspace, path)?;
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::provider(workspace, path, e))?;

        let mut components: Vec<Component> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| Self::is_node(&entry.path()))
            .filter_map(|entry| parse_segment(&entry.file_name().to_string_lossy()))
            .collect();
        components.sort();
        Ok(components.into_iter().map(|c| path.child(c)).collect())
    }

    fn list_properties(&self, workspace: &str, path: &Path) -> Result<Vec<QualifiedName>> {
        let _lock = self.lock(false)?;
        let dir = self.existing_node(workspace, path)?;
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::provider(workspace, path, e))?;

        let mut names: Vec<QualifiedName> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                let stem = file_name.strip_suffix(META_SUFFIX)?;
                unescape(stem)?.parse().ok()
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn get_property(&self, workspace: &str, path: &Path) -> Result<PropertyRecord> {
        let _lock = self.lock(false)?;
        let (_, meta_path, data_path) = self.property_files(workspace, path)?;
        if !meta_path.is_file() {
            return Err(StoreError::PathNotFound(path.to_string()));
        }
        let fail = |e: String| StoreError::provider(workspace, path, e);

        let meta: PropertyMeta = fs::read(&meta_path)
            .map_err(|e| fail(e.to_string()))
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| fail(e.to_string())))?;
        let values: Vec<Value> = fs::read(&data_path)
            .map_err(|e| fail(e.to_string()))
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| fail(e.to_string())))?;
        if values.len() != meta.count {
            return Err(fail(format!(
                "metadata declares {} values, data holds {}",
                meta.count,
                values.len()
            )));
        }
        let record = PropertyRecord {
            kind: meta.kind,
            multiple: meta.multiple,
            values,
        };
        record.validate().map_err(|e| fail(e.to_string()))?;
        Ok(record)
    }

    fn add_node(&self, workspace: &str, path: &Path) -> Result<()> {
        let _lock = self.lock(true)?;
        let dir = self.free_destination(workspace, path)?;
        fs::create_dir_all(&dir)
            .and_then(|_| write_atomic(&dir.join(NODE_MARKER), b""))
            .map_err(|e| StoreError::provider(workspace, path, e))
    }

    fn put_property(&self, workspace: &str, path: &Path, record: &PropertyRecord) -> Result<()> {
        record.validate()?;
        let _lock = self.lock(true)?;
        let (dir, meta_path, data_path) = self.property_files(workspace, path)?;
        if !Self::is_node(&dir) {
            return Err(StoreError::PathNotFound(
                path.parent().map(|p| p.to_string()).unwrap_or_default(),
            ));
        }
        let meta = PropertyMeta {
            kind: record.kind,
            multiple: record.multiple,
            count: record.values.len(),
        };
        let fail = |e: String| StoreError::provider(workspace, path, e);
        let meta_json = serde_json::to_vec_pretty(&meta).map_err(|e| fail(e.to_string()))?;
        let data_json = serde_json::to_vec_pretty(&record.values).map_err(|e| fail(e.to_string()))?;

        // Data first, so a visible metadata file always has its data
        write_atomic(&data_path, &data_json).map_err(|e| fail(e.to_string()))?;
        write_atomic(&meta_path, &meta_json).map_err(|e| fail(e.to_string()))
    }

    fn remove(&self, workspace: &str, path: &Path) -> Result<()> {
        if path.is_root() {
            return Err(StoreError::ConstraintViolation(
                "the root node cannot be removed".to_string(),
            ));
        }
        let _lock = self.lock(true)?;
        let dir = self.node_dir(workspace, path)?;
        if Self::is_node(&dir) {
            return fs::remove_dir_all(&dir).map_err(|e| StoreError::provider(workspace, path, e));
        }
        let (_, meta_path, data_path) = self.property_files(workspace, path)?;
        if !meta_path.is_file() {
            return Err(StoreError::PathNotFound(path.to_string()));
        }
        fs::remove_file(&meta_path)
            .and_then(|_| match fs::remove_file(&data_path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            })
            .map_err(|e| StoreError::provider(workspace, path, e))
    }

    fn copy(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        check_transfer(from, to)?;
        let _lock = self.lock(true)?;
        let source = self.existing_node(workspace, from)?;
        let target = self.free_destination(workspace, to)?;
        copy_dir(&source, &target).map_err(|e| StoreError::provider(workspace, to, e))
    }

    fn move_path(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        check_transfer(from, to)?;
        let _lock = self.lock(true)?;
        let source = self.existing_node(workspace, from)?;
        let target = self.free_destination(workspace, to)?;
        fs::rename(&source, &target).map_err(|e| StoreError::provider(workspace, from, e))
    }
}
