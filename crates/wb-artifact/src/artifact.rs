//! Artifact metadata types
//!
//! An artifact is an immutable, content-addressed unit of workspace state.
//! The store hands out [`ArtifactHandle`]s; content is fetched separately.

use crate::hash::{artifact_hash, ContentHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Semantic kind of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Source code
    Code,
    /// Datasets and structured inputs
    Data,
    /// Experiment and tool logs
    Log,
    /// Output of a model or assistant
    ModelOutput,
}

impl ArtifactKind {
    /// Stable string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Data => "data",
            Self::Log => "log",
            Self::ModelOutput => "model-output",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "data" => Ok(Self::Data),
            "log" => Ok(Self::Log),
            "model-output" => Ok(Self::ModelOutput),
            other => Err(format!("unknown artifact kind: {other}")),
        }
    }
}

/// Who created an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Producer {
    /// Direct user action
    User,
    /// A plugin invocation, identified by plugin id
    Plugin(String),
}

impl Producer {
    /// Plugin producer
    #[inline]
    #[must_use]
    pub fn plugin(id: impl Into<String>) -> Self {
        Self::Plugin(id.into())
    }

    /// Plugin id if produced by a plugin
    #[inline]
    #[must_use]
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::User => None,
            Self::Plugin(id) => Some(id),
        }
    }
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Plugin(id) => write!(f, "plugin:{id}"),
        }
    }
}

/// Reference to a stored artifact plus its immutable metadata
///
/// # Invariants
/// - `hash == artifact_hash(content, &parents)`
/// - `content_digest == ContentHash::compute(content)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    /// Artifact identity
    pub hash: ContentHash,
    /// Digest of the raw content blob
    pub content_digest: ContentHash,
    /// Semantic kind
    pub kind: ArtifactKind,
    /// Provenance edges, in declaration order
    pub parents: Vec<ContentHash>,
    /// Creator
    pub producer: Producer,
    /// Creation time of the first write
    pub created_at: DateTime<Utc>,
    /// Content length in bytes
    pub size: u64,
}

impl ArtifactHandle {
    /// Build the handle a `put` of this content would produce
    #[must_use]
    pub fn describe(
        content: &[u8],
        parents: Vec<ContentHash>,
        kind: ArtifactKind,
        producer: Producer,
    ) -> Self {
        Self {
            hash: artifact_hash(content, &parents),
            content_digest: ContentHash::compute(content),
            kind,
            parents,
            producer,
            created_at: Utc::now(),
            size: content.len() as u64,
        }
    }

    /// True when the artifact has no parents
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Recompute identity from content and compare
    #[must_use]
    pub fn matches(&self, content: &[u8]) -> bool {
        self.content_digest == ContentHash::compute(content)
            && self.hash == artifact_hash(content, &self.parents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            ArtifactKind::Code,
            ArtifactKind::Data,
            ArtifactKind::Log,
            ArtifactKind::ModelOutput,
        ] {
            assert_eq!(kind.as_str().parse::<ArtifactKind>().unwrap(), kind);
        }
        assert!("binary".parse::<ArtifactKind>().is_err());
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ArtifactKind::ModelOutput).unwrap();
        assert_eq!(json, "\"model-output\"");
    }

    #[test]
    fn producer_display() {
        assert_eq!(Producer::User.to_string(), "user");
        assert_eq!(Producer::plugin("lint").to_string(), "plugin:lint");
        assert_eq!(Producer::plugin("lint").plugin_id(), Some("lint"));
    }

    #[test]
    fn describe_matches_content() {
        let handle = ArtifactHandle::describe(b"abc", vec![], ArtifactKind::Data, Producer::User);
        assert!(handle.is_root());
        assert!(handle.matches(b"abc"));
        assert!(!handle.matches(b"abd"));
        assert_eq!(handle.size, 3);
    }
}
