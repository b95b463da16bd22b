//! Immutable hierarchical paths
//!
//! A [`Path`] is a shared, immutable sequence of [`Component`]s plus an
//! absolute/relative flag. Cloning is cheap. Equality and hashing look only
//! at the components and the flag, never at the cached string or parent.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use super::component::Component;
use super::name::{ExpandedNames, QualifiedName};
use super::parser;
use crate::error::{Result, StoreError};

#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path(Arc<PathInner>);

struct PathInner {
    components: Vec<Component>,
    absolute: bool,
    parent: OnceLock<Option<Path>>,
    /// Prefixed string form and the mapper generation it was computed under,
    /// filled by the first factory that formats it
    formatted: OnceLock<(u64, Arc<str>)>,
}

impl Path {
    pub(crate) fn from_parts(components: Vec<Component>, absolute: bool) -> Self {
        Path(Arc::new(PathInner {
            components,
            absolute,
            parent: OnceLock::new(),
            formatted: OnceLock::new(),
        }))
    }

    /// The zero-length absolute path
    pub fn root() -> Self {
        Self::from_parts(Vec::new(), true)
    }

    /// Parses the mapper-independent expanded form (`/{uri}a/b[2]`)
    pub fn parse_expanded(s: &str) -> Result<Self> {
        let (absolute, steps) = parser::tokenize(s, &ExpandedNames)?;
        let components = parser::apply(s, &[], 0, steps)?;
        Ok(Self::from_parts(components, absolute))
    }

    pub fn is_root(&self) -> bool {
        self.0.absolute && self.0.components.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.0.absolute
    }

    /// Number of components (the root has depth 0)
    pub fn depth(&self) -> usize {
        self.0.components.len()
    }

    pub fn components(&self) -> &[Component] {
        &self.0.components
    }

    /// The last component, or None for the root and the empty relative path
    pub fn last(&self) -> Option<&Component> {
        self.0.components.last()
    }

    /// The name of the last component
    pub fn name(&self) -> Option<&QualifiedName> {
        self.last().map(Component::name)
    }

    /// The sibling index of the last component (1 for the root)
    pub fn index(&self) -> u32 {
        self.last().map(Component::index).unwrap_or(1)
    }

    /// The parent path, computed once and cached
    pub fn parent(&self) -> Option<Path> {
        self.0
            .parent
            .get_or_init(|| {
                let components = &self.0.components;
                if components.is_empty() {
                    None
                } else {
                    Some(Path::from_parts(
                        components[..components.len() - 1].to_vec(),
                        self.0.absolute,
                    ))
                }
            })
            .clone()
    }

    /// The ancestor at `depth` components from the start
    pub fn ancestor(&self, depth: usize) -> Result<Path> {
        if depth > self.depth() {
            return Err(StoreError::invalid_path(
                self.to_string(),
                format!("no ancestor at depth {}", depth),
            ));
        }
        if depth == self.depth() {
            return Ok(self.clone());
        }
        Ok(Path::from_parts(
            self.0.components[..depth].to_vec(),
            self.0.absolute,
        ))
    }

    /// Components `start..end`. Absolute only when it starts at an absolute
    /// path's beginning.
    pub fn subpath(&self, start: usize, end: usize) -> Result<Path> {
        if start > end || end > self.depth() {
            return Err(StoreError::invalid_path(
                self.to_string(),
                format!("subpath {}..{} out of range", start, end),
            ));
        }
        Ok(Path::from_parts(
            self.0.components[start..end].to_vec(),
            self.0.absolute && start == 0,
        ))
    }

    /// Resolves one component against this path
    pub fn child(&self, component: Component) -> Path {
        let mut components = self.0.components.clone();
        components.push(component);
        Path::from_parts(components, self.0.absolute)
    }

    /// Child with the default sibling index
    pub fn child_named(&self, name: QualifiedName) -> Path {
        self.child(Component::named(name))
    }

    /// True if `self` is a strict ancestor of `other`
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.0.absolute == other.0.absolute
            && self.depth() < other.depth()
            && other.0.components.starts_with(&self.0.components)
    }

    /// True if `self` equals `other` or is an ancestor of it
    pub fn contains(&self, other: &Path) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Re-roots `self` from `from` onto `to`. None if `self` is not under `from`.
    pub fn rebase(&self, from: &Path, to: &Path) -> Option<Path> {
        if !from.contains(self) {
            return None;
        }
        let mut components = to.0.components.clone();
        components.extend_from_slice(&self.0.components[from.depth()..]);
        Some(Path::from_parts(components, to.0.absolute))
    }

    pub(crate) fn cached_format(&self, generation: u64) -> Option<Arc<str>> {
        match self.0.formatted.get() {
            Some((cached, formatted)) if *cached == generation => Some(formatted.clone()),
            _ => None,
        }
    }

    /// Stores `formatted` unless an earlier form is already cached; a stale
    /// cache is left alone and `formatted` is returned as is
    pub(crate) fn cache_format(&self, generation: u64, formatted: Arc<str>) -> Arc<str> {
        let (cached, stored) = self.0.formatted.get_or_init(|| (generation, formatted.clone()));
        if *cached == generation {
            stored.clone()
        } else {
            formatted
        }
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.absolute == other.0.absolute && self.0.components == other.0.components)
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.absolute.hash(state);
        self.0.components.hash(state);
    }
}

/// Expanded form: `/{uri}local[2]/child`
impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.absolute {
            if self.0.components.is_empty() {
                return write!(f, "/");
            }
            for c in &self.0.components {
                write!(f, "/{}", c)?;
            }
            return Ok(());
        }
        if self.0.components.is_empty() {
            return write!(f, ".");
        }
        for (i, c) in self.0.components.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self)
    }
}

impl TryFrom<String> for Path {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        Path::parse_expanded(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse_expanded(s).unwrap()
    }

    #[test]
    fn root_properties() {
        let root = Path::root();
        assert!(root.is_root());
        assert_eq!(root.depth(), 0);
        assert!(root.parent().is_none());
        assert_eq!(root.to_string(), "/");
    }

    #[test]
    fn parent_is_cached() {
        let path = p("/a/b/c");
        let first = path.parent().unwrap();
        let second = path.parent().unwrap();

        assert!(Arc::ptr_eq(&first.0, &second.0));
        assert_eq!(first, p("/a/b"));
    }

    #[test]
    fn ancestors_count_from_root() {
        let path = p("/a/b/c");
        assert_eq!(path.ancestor(0).unwrap(), Path::root());
        assert_eq!(path.ancestor(2).unwrap(), p("/a/b"));
        assert_eq!(path.ancestor(3).unwrap(), path);
        assert!(path.ancestor(4).is_err());
    }

    #[test]
    fn subpath_slices() {
        let path = p("/a/b/c");
        assert_eq!(path.subpath(1, 3).unwrap(), p("b/c"));
        assert_eq!(path.subpath(0, 1).unwrap(), p("/a"));
        assert!(path.subpath(2, 1).is_err());
        assert!(path.subpath(0, 4).is_err());
    }

    #[test]
    fn explicit_first_index_equals_default() {
        assert_eq!(p("/a[1]/b"), p("/a/b"));
        assert_ne!(p("/a[2]/b"), p("/a/b"));
    }

    #[test]
    fn ancestry_and_rebase() {
        let a = p("/a");
        let deep = p("/a/b/c");
        assert!(a.is_ancestor_of(&deep));
        assert!(!deep.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&a));
        assert!(a.contains(&a));

        let moved = deep.rebase(&a, &p("/x/y")).unwrap();
        assert_eq!(moved, p("/x/y/b/c"));
        assert!(p("/z").rebase(&a, &p("/x")).is_none());
    }

    #[test]
    fn equality_ignores_cached_string() {
        let one = p("/a/b");
        let two = p("/a/b");
        one.cache_format(0, Arc::from("/a/b"));

        assert_eq!(one, two);
        assert!(two.cached_format(0).is_none());
    }

    #[test]
    fn serde_roundtrip() {
        let path = p("/{urn:x}a[2]/b");
        let json = serde_json::to_string(&path).unwrap();
        let back: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
