//! Error taxonomy for the content store
//!
//! Every fallible library operation returns [`StoreError`]. Errors are never
//! retried internally; they surface synchronously to the caller.

use thiserror::Error;

/// Errors raised by the path model, item graph, providers and sessions
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// No item exists at the path
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// Malformed path syntax, unknown prefix, or `..` above the root
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// An add conflicts with an existing item
    #[error("Item already exists: {0}")]
    ItemExists(String),

    /// Rejected by the schema resolver
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Feature explicitly not supported (locking, versioning, observation,
    /// or a backend declining move/copy)
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Backend I/O failure or cache contention timeout
    #[error("Provider failure in workspace '{workspace}' at '{path}': {message}")]
    ProviderFailure {
        workspace: String,
        path: String,
        message: String,
    },
}

impl StoreError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn provider(
        workspace: impl Into<String>,
        path: impl ToString,
        message: impl ToString,
    ) -> Self {
        StoreError::ProviderFailure {
            workspace: workspace.into(),
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    /// A poisoned internal lock
    pub fn poisoned(what: &str) -> Self {
        StoreError::ProviderFailure {
            workspace: String::new(),
            path: String::new(),
            message: format!("{} lock poisoned", what),
        }
    }

    /// Returns true if this error means "nothing at that path"
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::PathNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_failure_carries_context() {
        let err = StoreError::provider("default", "/a/b", "disk full");
        let msg = err.to_string();

        assert!(msg.contains("default"));
        assert!(msg.contains("/a/b"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn not_found_predicate() {
        assert!(StoreError::PathNotFound("/x".into()).is_not_found());
        assert!(!StoreError::ItemExists("/x".into()).is_not_found());
    }
}
