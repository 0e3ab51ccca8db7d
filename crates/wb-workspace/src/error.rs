//! Workspace error types

use std::path::PathBuf;
use std::sync::Arc;
use wb_artifact::{ContentHash, StorageError};
use wb_capability::CapabilityError;
use wb_runtime::{CancelReason, RuntimeError};

/// Invocation log failures
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("invocation record {0} not found")]
    RecordNotFound(u64),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unparseable index or record file name
    #[error("corrupt log entry at {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

impl LogError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by the workspace engine
///
/// Cloneable so coalesced callers can share one failure. Storage and log
/// errors are held behind `Arc` for that reason.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Storage(Arc<StorageError>),

    #[error(transparent)]
    Log(Arc<LogError>),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Adding the artifact would close a cycle in the provenance graph
    #[error("artifact {0} would introduce a provenance cycle")]
    Cycle(ContentHash),

    /// Record cannot be replayed (user change or unsuccessful invocation)
    #[error("record {seq} is not replayable: {reason}")]
    NotReplayable { seq: u64, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for WorkspaceError {
    fn from(e: StorageError) -> Self {
        Self::Storage(Arc::new(e))
    }
}

impl From<LogError> for WorkspaceError {
    fn from(e: LogError) -> Self {
        Self::Log(Arc::new(e))
    }
}

impl From<CapabilityError> for WorkspaceError {
    fn from(e: CapabilityError) -> Self {
        Self::Runtime(RuntimeError::Capability(e))
    }
}

impl WorkspaceError {
    /// Stable external error kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            WorkspaceError::Storage(e) if e.is_not_found() => "not_found",
            WorkspaceError::Log(e) if matches!(**e, LogError::RecordNotFound(_)) => "not_found",
            WorkspaceError::Storage(_) | WorkspaceError::Log(_) => "storage_error",
            WorkspaceError::Runtime(e) => e.kind(),
            WorkspaceError::Cycle(_) => "storage_error",
            WorkspaceError::NotReplayable { .. } | WorkspaceError::Internal(_) => "internal",
        }
    }

    /// Cancellation reason, if this is a cancellation
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            WorkspaceError::Runtime(RuntimeError::Cancelled(reason)) => Some(*reason),
            _ => None,
        }
    }
}

impl From<CancelReason> for WorkspaceError {
    fn from(reason: CancelReason) -> Self {
        Self::Runtime(RuntimeError::Cancelled(reason))
    }
}
