//! Storage error types

use crate::hash::ContentHash;
use std::path::PathBuf;

/// Errors raised by artifact stores
///
/// Integrity violations are fatal: callers must surface them, never retry.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Artifact does not exist
    #[error("artifact not found: {0}")]
    NotFound(ContentHash),

    /// A declared parent is not in the store
    #[error("parent {parent} of {child} is not in the store")]
    MissingParent {
        child: ContentHash,
        parent: ContentHash,
    },

    /// Hash collision with divergent content, or corrupted stored data
    #[error("integrity violation for {hash}: {detail}")]
    IntegrityViolation { hash: ContentHash, detail: String },

    /// Underlying filesystem failure
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record (de)serialization failure
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for `NotFound`
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
