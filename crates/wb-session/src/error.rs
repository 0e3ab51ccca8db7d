//! Session errors and their external form

use serde::{Deserialize, Serialize};
use wb_workspace::WorkspaceError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("workspace already attached: {0}")]
    WorkspaceExists(String),

    /// Unparseable capability request or artifact reference
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl SessionError {
    /// Stable external error kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::WorkspaceNotFound(_) => "not_found",
            SessionError::WorkspaceExists(_) => "internal",
            SessionError::InvalidRequest(_) => "schema_error",
            SessionError::Workspace(e) => e.kind(),
        }
    }
}

/// `{error_kind, message}` as returned to external callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalError {
    pub error_kind: String,
    pub message: String,
}

impl From<&SessionError> for ExternalError {
    fn from(e: &SessionError) -> Self {
        Self {
            error_kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}
