//! Capability registry errors

use crate::version::Version;

/// Errors raised by capability registration, resolution and validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// No registered descriptor satisfies the request
    #[error("no capability matches {name}@{range}")]
    NotFound { name: String, range: String },

    /// Same name and version registered with a different contract
    #[error("capability {name}@{version} is already registered with a different contract")]
    SchemaConflict { name: String, version: Version },

    /// A schema failed to compile or a value failed validation
    #[error("schema error for {capability}: {}", .errors.join("; "))]
    SchemaError {
        capability: String,
        errors: Vec<String>,
    },

    /// Malformed version or version range
    #[error("invalid version `{input}`: {reason}")]
    InvalidVersion { input: String, reason: String },

    /// Malformed `name@range` request
    #[error("invalid capability request `{0}`")]
    InvalidRequest(String),
}

impl CapabilityError {
    pub(crate) fn invalid_version(input: &str, reason: &str) -> Self {
        Self::InvalidVersion {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn schema(capability: impl Into<String>, errors: Vec<String>) -> Self {
        Self::SchemaError {
            capability: capability.into(),
            errors,
        }
    }

    /// Whether this is a `NotFound`
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
