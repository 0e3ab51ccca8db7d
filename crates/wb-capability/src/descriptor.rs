//! Capability descriptors and requests

use crate::error::CapabilityError;
use crate::version::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// What a capability is allowed to affect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SideEffect {
    /// Computes a response only
    Pure,
    /// Produces workspace artifacts
    #[default]
    ArtifactProducing,
    /// Reaches outside the process (model backends, remote services)
    ExternalNetwork,
}

impl SideEffect {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SideEffect::Pure => "pure",
            SideEffect::ArtifactProducing => "artifact-producing",
            SideEffect::ExternalNetwork => "external-network",
        }
    }
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, versioned operation contract
///
/// Schemas are JSON Schema documents. The input schema constrains call
/// parameters, the output schema constrains the JSON response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub version: Version,
    pub input_schema: Value,
    pub output_schema: Value,
    #[serde(default)]
    pub side_effect: SideEffect,
    #[serde(default)]
    pub reentrant: bool,
    #[serde(default = "default_true")]
    pub deterministic: bool,
}

fn default_true() -> bool {
    true
}

impl CapabilityDescriptor {
    /// Descriptor accepting any input and output, artifact-producing,
    /// deterministic and non-reentrant
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            input_schema: serde_json::json!({}),
            output_schema: serde_json::json!({}),
            side_effect: SideEffect::ArtifactProducing,
            reentrant: false,
            deterministic: true,
        }
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    #[must_use]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    #[must_use]
    pub fn with_side_effect(mut self, side_effect: SideEffect) -> Self {
        self.side_effect = side_effect;
        self
    }

    #[must_use]
    pub fn with_reentrant(mut self, reentrant: bool) -> Self {
        self.reentrant = reentrant;
        self
    }

    #[must_use]
    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    /// `name@version`
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Whether this descriptor satisfies `request`
    #[must_use]
    pub fn satisfies(&self, request: &CapabilityRequest) -> bool {
        self.name == request.name && request.range.matches(&self.version)
    }

    /// Request pinned to exactly this descriptor
    #[must_use]
    pub fn exact_request(&self) -> CapabilityRequest {
        CapabilityRequest::new(self.name.clone(), VersionReq::exact(self.version))
    }
}

/// A capability name plus acceptable version range, written `name@range`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityRequest {
    pub name: String,
    pub range: VersionReq,
}

impl CapabilityRequest {
    #[must_use]
    pub fn new(name: impl Into<String>, range: VersionReq) -> Self {
        Self {
            name: name.into(),
            range,
        }
    }

    /// Any version of `name`
    #[must_use]
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, VersionReq::any())
    }

    /// Parse `name` or `name@range`
    ///
    /// # Errors
    /// `InvalidRequest` on an empty name, `InvalidVersion` on a bad range.
    pub fn parse(s: &str) -> Result<Self, CapabilityError> {
        let (name, range) = match s.split_once('@') {
            Some((name, range)) => (name.trim(), VersionReq::parse(range)?),
            None => (s.trim(), VersionReq::any()),
        };
        if name.is_empty() {
            return Err(CapabilityError::InvalidRequest(s.to_string()));
        }
        Ok(Self::new(name, range))
    }
}

impl fmt::Display for CapabilityRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.range.is_any() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}@{}", self.name, self.range)
        }
    }
}

impl FromStr for CapabilityRequest {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CapabilityRequest {
    type Error = CapabilityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<CapabilityRequest> for String {
    fn from(r: CapabilityRequest) -> Self {
        r.to_string()
    }
}
