//! The plugin boundary
//!
//! Plugins are trait objects (`Arc<dyn Plugin>`). They receive artifact
//! content, never store references, and return produced content for the
//! workspace engine to commit.

use crate::cancel::CancelReason;
use crate::context::InvocationContext;
use crate::error::RuntimeError;
use crate::manifest::PluginManifest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wb_artifact::{ArtifactKind, ContentHash};

/// An extension hosted by the runtime
#[async_trait::async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Static description: id, version, provided and required capabilities
    fn manifest(&self) -> PluginManifest;

    /// Called once while the instance is `Loading`
    async fn load(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Execute one capability call; `ctx.capability()` names which
    async fn invoke(
        &self,
        ctx: InvocationContext,
        input: PluginInput,
    ) -> Result<PluginOutput, PluginError>;

    /// Called once while the instance is `Unloading`
    async fn unload(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Input artifact content handed to a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputArtifact {
    pub hash: ContentHash,
    pub kind: ArtifactKind,
    pub content: Vec<u8>,
}

/// Call input: artifact contents plus JSON parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PluginInput {
    pub artifacts: Vec<InputArtifact>,
    pub params: Value,
}

impl PluginInput {
    #[must_use]
    pub fn new(params: Value) -> Self {
        Self {
            artifacts: Vec::new(),
            params,
        }
    }

    #[must_use]
    pub fn with_artifact(mut self, hash: ContentHash, kind: ArtifactKind, content: Vec<u8>) -> Self {
        self.artifacts.push(InputArtifact {
            hash,
            kind,
            content,
        });
        self
    }
}

/// Content a plugin wants committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedArtifact {
    pub kind: ArtifactKind,
    pub content: Vec<u8>,
}

/// Call output: produced artifacts plus a JSON response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PluginOutput {
    pub artifacts: Vec<ProducedArtifact>,
    pub response: Value,
}

impl PluginOutput {
    #[must_use]
    pub fn new(response: Value) -> Self {
        Self {
            artifacts: Vec::new(),
            response,
        }
    }

    #[must_use]
    pub fn with_artifact(mut self, kind: ArtifactKind, content: impl Into<Vec<u8>>) -> Self {
        self.artifacts.push(ProducedArtifact {
            kind,
            content: content.into(),
        });
        self
    }

    /// Bytes counted against `max_output_bytes`
    #[must_use]
    pub fn output_bytes(&self) -> usize {
        let response = serde_json::to_vec(&self.response).map_or(0, |v| v.len());
        self.artifacts.iter().map(|a| a.content.len()).sum::<usize>() + response
    }
}

/// Structured plugin failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    /// Recoverable; the instance stays healthy
    #[error("{0}")]
    Failed(String),
    /// Unrecoverable; the instance is faulted
    #[error("fatal: {0}")]
    Fatal(String),
    /// The plugin observed cancellation
    #[error("cancelled ({0})")]
    Cancelled(CancelReason),
}

impl PluginError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }
}

impl From<CancelReason> for PluginError {
    fn from(reason: CancelReason) -> Self {
        Self::Cancelled(reason)
    }
}

/// Nested-call failures surface to the calling plugin as recoverable,
/// except cancellation which keeps its reason.
impl From<RuntimeError> for PluginError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Cancelled(reason) => Self::Cancelled(reason),
            other => Self::Failed(other.to_string()),
        }
    }
}
