//! Qualified names and namespace mapping
//!
//! A [`QualifiedName`] is a (namespace URI, local name) pair. Its canonical,
//! mapper-independent string form is the expanded form `{uri}local`, or just
//! `local` for the empty namespace. Prefixed forms (`jcr:primaryType`) are
//! produced and consumed through a [`NamespaceMapper`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub const JCR_URI: &str = "http://www.jcp.org/jcr/1.0";
pub const NT_URI: &str = "http://www.jcp.org/jcr/nt/1.0";
pub const MIX_URI: &str = "http://www.jcp.org/jcr/mix/1.0";

/// A namespace-qualified name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedName {
    uri: String,
    local: String,
}

impl QualifiedName {
    /// Creates a name, validating the local part
    pub fn new(uri: impl Into<String>, local: impl Into<String>) -> Result<Self> {
        let uri = uri.into();
        let local = local.into();
        validate_local(&local).map_err(|reason| StoreError::invalid_path(&local, reason))?;
        if uri.contains('}') {
            return Err(StoreError::invalid_path(uri, "namespace URI may not contain '}'"));
        }
        Ok(Self { uri, local })
    }

    /// A name in the empty namespace
    pub fn local(local: impl Into<String>) -> Result<Self> {
        Self::new("", local)
    }

    pub(crate) fn unchecked(uri: &str, local: &str) -> Self {
        Self {
            uri: uri.to_string(),
            local: local.to_string(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    /// `jcr:primaryType`
    pub fn primary_type() -> Self {
        Self::unchecked(JCR_URI, "primaryType")
    }

    /// `jcr:uuid`, the reference key of referenceable nodes
    pub fn uuid() -> Self {
        Self::unchecked(JCR_URI, "uuid")
    }

    /// `nt:unstructured`, the default node type
    pub fn unstructured() -> Self {
        Self::unchecked(NT_URI, "unstructured")
    }

    /// The `*` wildcard used by residual schema definitions
    pub fn wildcard() -> Self {
        Self::unchecked("", "*")
    }

    pub fn is_wildcard(&self) -> bool {
        self.uri.is_empty() && self.local == "*"
    }
}

/// Checks a local name for characters that are structural in path syntax
pub(crate) fn validate_local(local: &str) -> std::result::Result<(), &'static str> {
    if local.is_empty() {
        return Err("empty name");
    }
    if local == "." || local == ".." {
        return Err("'.' and '..' are not names");
    }
    if local
        .chars()
        .any(|c| matches!(c, '/' | ':' | '[' | ']' | '{' | '}' | '|' | '*') || c.is_control())
    {
        return Err("name contains a reserved character");
    }
    Ok(())
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uri.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.uri, self.local)
        }
    }
}

impl FromStr for QualifiedName {
    type Err = StoreError;

    /// Parses the expanded form (`{uri}local` or `local`)
    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix('{') {
            let end = rest
                .find('}')
                .ok_or_else(|| StoreError::invalid_path(s, "unterminated namespace escape"))?;
            return Self::new(&rest[..end], &rest[end + 1..]);
        }
        Self::local(s)
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<QualifiedName> for String {
    fn from(name: QualifiedName) -> Self {
        name.to_string()
    }
}

/// Maps between namespace prefixes and URIs
pub trait NamespaceMapper: Send + Sync {
    fn uri_for_prefix(&self, prefix: &str) -> Option<String>;

    fn prefix_for_uri(&self, uri: &str) -> Option<String>;

    /// Bumped whenever a mapping changes; prefixed forms cached under an
    /// older generation are stale
    fn generation(&self) -> u64 {
        0
    }

    /// `prefix:local` (or bare `local`) to a qualified name
    fn to_qualified(&self, prefixed: &str) -> Result<QualifiedName> {
        if prefixed.starts_with('{') {
            return prefixed.parse();
        }
        match prefixed.split_once(':') {
            Some((prefix, local)) => {
                let uri = self.uri_for_prefix(prefix).ok_or_else(|| {
                    StoreError::invalid_path(prefixed, format!("unknown namespace prefix '{}'", prefix))
                })?;
                QualifiedName::new(uri, local)
            }
            None => {
                let uri = self.uri_for_prefix("").unwrap_or_default();
                QualifiedName::new(uri, prefixed)
            }
        }
    }

    /// A qualified name to `prefix:local`, falling back to the expanded form
    /// when the URI has no registered prefix
    fn to_prefixed(&self, name: &QualifiedName) -> String {
        match self.prefix_for_uri(name.uri()) {
            Some(prefix) if prefix.is_empty() => name.local_name().to_string(),
            Some(prefix) => format!("{}:{}", prefix, name.local_name()),
            None => name.to_string(),
        }
    }
}

/// Mutable prefix registry with the built-in `jcr`, `nt` and `mix` prefixes
#[derive(Debug)]
pub struct NamespaceRegistry {
    inner: RwLock<Mappings>,
    generation: AtomicU64,
}

#[derive(Debug, Default)]
struct Mappings {
    by_prefix: HashMap<String, String>,
    by_uri: HashMap<String, String>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        let registry = Self {
            inner: RwLock::new(Mappings::default()),
            generation: AtomicU64::new(0),
        };
        for (prefix, uri) in [("", ""), ("jcr", JCR_URI), ("nt", NT_URI), ("mix", MIX_URI)] {
            // Built-ins are valid and the lock is fresh
            let _ = registry.register(prefix, uri);
        }
        registry
    }

    /// Registers (or remaps) a prefix
    pub fn register(&self, prefix: &str, uri: &str) -> Result<()> {
        if prefix.contains(':') || prefix.contains('{') {
            return Err(StoreError::invalid_path(prefix, "invalid namespace prefix"));
        }
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StoreError::poisoned("namespace registry"))?;
        if let Some(old_uri) = inner.by_prefix.insert(prefix.to_string(), uri.to_string()) {
            inner.by_uri.remove(&old_uri);
        }
        inner.by_uri.insert(uri.to_string(), prefix.to_string());
        self.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceMapper for NamespaceRegistry {
    fn uri_for_prefix(&self, prefix: &str) -> Option<String> {
        self.inner.read().ok()?.by_prefix.get(prefix).cloned()
    }

    fn prefix_for_uri(&self, uri: &str) -> Option<String> {
        self.inner.read().ok()?.by_uri.get(uri).cloned()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Mapper that knows only the empty namespace: names are read and written in
/// expanded form. Backends use it to decode persisted paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpandedNames;

impl NamespaceMapper for ExpandedNames {
    fn uri_for_prefix(&self, prefix: &str) -> Option<String> {
        prefix.is_empty().then(String::new)
    }

    fn prefix_for_uri(&self, uri: &str) -> Option<String> {
        uri.is_empty().then(String::new)
    }
}
