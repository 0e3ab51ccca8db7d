//! Invocation records
//!
//! One record per invocation attempt or user change, appended once and
//! never rewritten. Records are the substrate for provenance queries and
//! replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use ulid::Ulid;
use wb_artifact::{ContentHash, Producer};
use wb_capability::{CapabilityDescriptor, CapabilityRequest, Version};
use wb_runtime::CancelReason;

/// Capability a record ran under, pinned to the resolved version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityRef {
    pub name: String,
    pub version: Version,
}

impl CapabilityRef {
    /// Request matching exactly this capability
    #[must_use]
    pub fn exact_request(&self) -> CapabilityRequest {
        CapabilityRequest::new(self.name.clone(), wb_capability::VersionReq::exact(self.version))
    }
}

impl From<&CapabilityDescriptor> for CapabilityRef {
    fn from(d: &CapabilityDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            version: d.version,
        }
    }
}

impl fmt::Display for CapabilityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Outcome of the recorded invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    Succeeded,
    Failed { error_kind: String, message: String },
    Cancelled { reason: CancelReason },
}

impl RecordStatus {
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        matches!(self, RecordStatus::Succeeded)
    }
}

/// Append-only log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// Assigned by the log on append
    pub seq: u64,
    pub invocation_id: Ulid,
    /// `None` when dispatch failed before a plugin was chosen
    pub producer: Option<Producer>,
    /// What the caller asked for; `None` for user changes
    pub request: Option<CapabilityRequest>,
    /// What dispatch resolved to
    pub capability: Option<CapabilityRef>,
    pub deterministic: bool,
    pub inputs: Vec<ContentHash>,
    pub params: Value,
    pub outputs: Vec<ContentHash>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: RecordStatus,
}

impl InvocationRecord {
    /// Fresh record for an invocation starting now; sequence is unassigned
    #[must_use]
    pub fn begin(request: Option<CapabilityRequest>, inputs: Vec<ContentHash>, params: Value) -> Self {
        let now = Utc::now();
        Self {
            seq: 0,
            invocation_id: Ulid::new(),
            producer: None,
            request,
            capability: None,
            deterministic: false,
            inputs,
            params,
            outputs: Vec::new(),
            started_at: now,
            finished_at: now,
            status: RecordStatus::Succeeded,
        }
    }

    /// Stamp the finish time and status
    #[must_use]
    pub fn finish(mut self, status: RecordStatus) -> Self {
        self.finished_at = Utc::now();
        self.status = status;
        self
    }

    /// Plugin that produced this record, if any
    #[must_use]
    pub fn plugin_id(&self) -> Option<&str> {
        self.producer.as_ref().and_then(Producer::plugin_id)
    }

    /// Every artifact the record mentions, inputs first, without repeats
    #[must_use]
    pub fn artifacts(&self) -> Vec<ContentHash> {
        let mut out: Vec<ContentHash> = Vec::with_capacity(self.inputs.len() + self.outputs.len());
        for hash in self.inputs.iter().chain(&self.outputs) {
            if !out.contains(hash) {
                out.push(*hash);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_is_flattened() {
        let record = InvocationRecord::begin(None, vec![], json!({})).finish(RecordStatus::Failed {
            error_kind: "invocation_error".into(),
            message: "boom".into(),
        });
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error_kind"], "invocation_error");

        let back: InvocationRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn cancelled_reason_serializes_snake_case() {
        let record = InvocationRecord::begin(None, vec![], json!(null)).finish(RecordStatus::Cancelled {
            reason: CancelReason::Timeout,
        });
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["reason"], "timeout");
    }

    #[test]
    fn artifacts_deduplicates() {
        let a = ContentHash::compute(b"a");
        let b = ContentHash::compute(b"b");
        let mut record = InvocationRecord::begin(None, vec![a, a], json!({}));
        record.outputs = vec![b, a];
        assert_eq!(record.artifacts(), vec![a, b]);
    }
}
