//! Plugin runtime errors

use crate::cancel::CancelReason;
use crate::instance::InstanceId;
use crate::state::InstanceState;
use std::fmt;
use wb_capability::{CapabilityError, CapabilityRequest};

/// Why a plugin failed to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    /// A required capability does not resolve
    MissingDependency(CapabilityRequest),
    /// A provided descriptor differs from (or is absent in) the registry
    SchemaMismatch { capability: String, detail: String },
    /// Requested resources exceed what the runtime grants
    LimitDenied(String),
    /// The plugin's own `load` hook failed
    Hook(String),
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadFailure::MissingDependency(req) => write!(f, "missing dependency {req}"),
            LoadFailure::SchemaMismatch { capability, detail } => {
                write!(f, "schema mismatch for {capability}: {detail}")
            }
            LoadFailure::LimitDenied(detail) => write!(f, "resource limit denied: {detail}"),
            LoadFailure::Hook(msg) => write!(f, "load hook failed: {msg}"),
        }
    }
}

/// Why an instance was faulted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultReason {
    /// Load failed
    Load(LoadFailure),
    /// Call outside the sandbox allow-list
    SandboxViolation(String),
    /// Output size, call depth or similar exhausted
    ResourceExhausted(String),
    /// Plugin reported an unrecoverable error
    Fatal(String),
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultReason::Load(failure) => write!(f, "{failure}"),
            FaultReason::SandboxViolation(detail) => write!(f, "sandbox violation: {detail}"),
            FaultReason::ResourceExhausted(detail) => write!(f, "resource exhausted: {detail}"),
            FaultReason::Fatal(msg) => write!(f, "fatal plugin error: {msg}"),
        }
    }
}

/// Errors from the plugin runtime
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// Registry lookup or schema validation failed
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Capabilities resolve but no live instance provides them
    #[error("no plugin instance provides {request}")]
    NoInstance { request: String },

    #[error("unknown plugin instance {0}")]
    UnknownInstance(InstanceId),

    #[error("unknown plugin {0}")]
    UnknownPlugin(String),

    /// Instance is unloading or terminated
    #[error("plugin instance {instance} is {state}")]
    Unavailable {
        instance: InstanceId,
        state: InstanceState,
    },

    #[error("plugin {plugin} failed to load: {reason}")]
    PluginLoad { plugin: String, reason: LoadFailure },

    #[error("plugin instance {instance} faulted: {reason}")]
    Faulted {
        instance: InstanceId,
        reason: FaultReason,
    },

    #[error("illegal instance transition {from} -> {to}")]
    IllegalTransition {
        from: InstanceState,
        to: InstanceState,
    },

    /// Recoverable failure reported by the plugin
    #[error("plugin {plugin} failed: {message}")]
    Invocation { plugin: String, message: String },

    #[error("cancelled ({0})")]
    Cancelled(CancelReason),
}

impl RuntimeError {
    /// Stable external error kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::Capability(CapabilityError::NotFound { .. })
            | RuntimeError::NoInstance { .. }
            | RuntimeError::UnknownInstance(_)
            | RuntimeError::UnknownPlugin(_)
            | RuntimeError::Unavailable { .. } => "not_found",
            RuntimeError::Capability(CapabilityError::SchemaConflict { .. }) => "schema_conflict",
            // Malformed requests are schema failures of the request itself.
            RuntimeError::Capability(_) => "schema_error",
            RuntimeError::PluginLoad { .. } => "plugin_load_error",
            RuntimeError::Faulted { .. } => "faulted",
            RuntimeError::Invocation { .. } => "invocation_error",
            RuntimeError::Cancelled(_) => "cancelled",
            RuntimeError::IllegalTransition { .. } => "internal",
        }
    }
}
