//! Path parsing, formatting and interning
//!
//! [`PathFactory`] owns the namespace mapper and a bounded, bidirectional
//! cache between prefixed string forms and canonical [`Path`] instances.
//! Equal paths parsed through one factory share a single instance while it
//! stays cached; an evicted entry is simply re-parsed on the next lookup.
//! Remapping a namespace prefix empties the cache, since prefixed keys and
//! formatted strings computed under the old mapping no longer hold.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use super::component::Component;
use super::name::{NamespaceMapper, QualifiedName};
use super::parser;
use super::repo_path::Path;
use crate::error::{Result, StoreError};
use crate::lru::Lru;

/// Default number of interned path strings
pub const DEFAULT_INTERN_CAPACITY: usize = 4096;

pub struct PathFactory {
    mapper: Arc<dyn NamespaceMapper>,
    interned: Mutex<Lru<Arc<str>, Path>>,
    /// Mapper generation the interned entries were built under
    generation: AtomicU64,
}

impl PathFactory {
    pub fn new(mapper: Arc<dyn NamespaceMapper>) -> Self {
        Self::with_capacity(mapper, DEFAULT_INTERN_CAPACITY)
    }

    pub fn with_capacity(mapper: Arc<dyn NamespaceMapper>, capacity: usize) -> Self {
        let generation = AtomicU64::new(mapper.generation());
        Self {
            mapper,
            interned: Mutex::new(Lru::new(capacity)),
            generation,
        }
    }

    pub fn mapper(&self) -> &dyn NamespaceMapper {
        self.mapper.as_ref()
    }

    /// Parses a path string into its canonical instance
    pub fn parse(&self, input: &str) -> Result<Path> {
        if let Some(hit) = self.lookup(input) {
            return Ok(hit);
        }
        let (absolute, steps) = parser::tokenize(input, self.mapper.as_ref())?;
        let components = parser::apply(input, &[], 0, steps)?;
        let parsed = Path::from_parts(components, absolute);
        Ok(self.intern_as(input, parsed))
    }

    /// Resolves `relative` against `base`. An absolute `relative` ignores
    /// the base; `..` past the root raises InvalidPath.
    pub fn resolve(&self, base: &Path, relative: &str) -> Result<Path> {
        if relative.starts_with('/') {
            return self.parse(relative);
        }
        let (_, steps) = parser::tokenize(relative, self.mapper.as_ref())?;
        let components = parser::apply(relative, base.components(), 0, steps)?;
        Ok(self.intern(Path::from_parts(components, base.is_absolute())))
    }

    /// Parses a single name such as `jcr:primaryType`
    pub fn parse_name(&self, input: &str) -> Result<QualifiedName> {
        self.mapper.to_qualified(input)
    }

    /// Parses a single component such as `a[2]`
    pub fn parse_component(&self, input: &str) -> Result<Component> {
        let (_, mut steps) = parser::tokenize(input, self.mapper.as_ref())?;
        match (steps.pop(), steps.is_empty()) {
            (Some(parser::Step::Child(c)), true) => Ok(c),
            _ => Err(StoreError::invalid_path(input, "expected a single name")),
        }
    }

    /// The prefixed string form, computed once per path instance
    pub fn format(&self, path: &Path) -> Arc<str> {
        let generation = self.mapper.generation();
        if let Some(cached) = path.cached_format(generation) {
            return cached;
        }
        let formatted: Arc<str> =
            Arc::from(parser::format(path.components(), path.is_absolute(), self.mapper.as_ref()));
        path.cache_format(generation, formatted)
    }

    pub fn format_name(&self, name: &QualifiedName) -> String {
        self.mapper.to_prefixed(name)
    }

    /// Returns the canonical instance for `path`, interning it if new
    pub fn intern(&self, path: Path) -> Path {
        let key = self.format(&path);
        self.intern_as(&key, path)
    }

    fn lookup(&self, key: &str) -> Option<Path> {
        let mut interned = self.interned.lock().ok()?;
        self.drop_stale(&mut interned);
        interned.get(&Arc::from(key)).cloned()
    }

    fn drop_stale(&self, interned: &mut Lru<Arc<str>, Path>) {
        let current = self.mapper.generation();
        if self.generation.swap(current, Ordering::AcqRel) != current {
            trace!(count = interned.len(), "namespace mapping changed, dropping interned paths");
            interned.clear();
        }
    }

    /// Check-then-insert under one lock so concurrent parsers agree on a
    /// single canonical instance
    fn intern_as(&self, key: &str, path: Path) -> Path {
        let canonical_key = self.format(&path);
        let Ok(mut interned) = self.interned.lock() else {
            return path;
        };
        self.drop_stale(&mut interned);

        let canonical = match interned.get(&canonical_key) {
            Some(existing) => existing.clone(),
            None => {
                let evicted = interned.insert(canonical_key.clone(), path.clone());
                if !evicted.is_empty() {
                    trace!(count = evicted.len(), "evicted interned paths");
                }
                path
            }
        };
        if key != &*canonical_key {
            interned.insert(Arc::from(key), canonical.clone());
        }
        canonical
    }

    /// Number of interned string keys
    pub fn interned_len(&self) -> usize {
        self.interned.lock().map(|i| i.len()).unwrap_or(0)
    }
}
