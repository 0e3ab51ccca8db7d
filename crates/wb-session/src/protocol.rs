//! External request and response shapes
//!
//! Both are JSON objects tagged by `op` and `status` respectively.

use crate::error::ExternalError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;
use wb_artifact::{ArtifactHandle, ContentHash};
use wb_workspace::{InvocationRecord, InvokeOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Invoke {
        workspace: String,
        /// `name` or `name@range`
        capability: String,
        #[serde(default)]
        inputs: Vec<ContentHash>,
        #[serde(default)]
        params: Option<Value>,
    },
    GetArtifact {
        workspace: String,
        hash: ContentHash,
    },
    ListProvenance {
        workspace: String,
        hash: ContentHash,
    },
}

/// Successful invocation as seen externally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub outputs: Vec<ContentHash>,
    pub seq: u64,
    pub invocation_id: Ulid,
    /// Resolved `name@version`
    pub capability: String,
    pub plugin_id: String,
    pub response: Value,
}

impl From<InvokeOutcome> for InvokeResponse {
    fn from(outcome: InvokeOutcome) -> Self {
        Self {
            outputs: outcome.outputs.iter().map(|h| h.hash).collect(),
            seq: outcome.seq,
            invocation_id: outcome.invocation_id,
            capability: outcome.capability.to_string(),
            plugin_id: outcome.plugin_id,
            response: outcome.response,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Invoked(InvokeResponse),
    Artifact {
        handle: ArtifactHandle,
        /// Hex-encoded content
        content_hex: String,
    },
    Provenance {
        records: Vec<InvocationRecord>,
    },
    Error(ExternalError),
}

impl Response {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Error kind, if this is an error
    #[must_use]
    pub fn error_kind(&self) -> Option<&str> {
        match self {
            Response::Error(e) => Some(&e.error_kind),
            _ => None,
        }
    }
}
