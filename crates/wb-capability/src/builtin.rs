//! Built-in capability contracts
//!
//! `query-model` is the boundary to AI-assistance backends. Plugins that
//! talk to a model provider advertise it; nothing in the core depends on
//! which provider answers.

use crate::descriptor::{CapabilityDescriptor, SideEffect};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Name of the model-query capability
pub const QUERY_MODEL: &str = "query-model";

/// `query-model@1.0.0`: `{prompt, context_artifacts} -> {completion, rationale?}`
#[must_use]
pub fn query_model_descriptor() -> CapabilityDescriptor {
    CapabilityDescriptor::new(QUERY_MODEL, Version::new(1, 0, 0))
        .with_input_schema(json!({
            "type": "object",
            "required": ["prompt"],
            "properties": {
                "prompt": { "type": "string" },
                "context_artifacts": {
                    "type": "array",
                    "items": { "type": "string", "pattern": "^[0-9a-f]{64}$" }
                }
            },
            "additionalProperties": false
        }))
        .with_output_schema(json!({
            "type": "object",
            "required": ["completion"],
            "properties": {
                "completion": { "type": "string" },
                "rationale": { "type": "string" }
            }
        }))
        .with_side_effect(SideEffect::ExternalNetwork)
        .with_reentrant(true)
        .with_deterministic(false)
}

/// Typed `query-model` parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryModelParams {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_artifacts: Vec<String>,
}

/// Typed `query-model` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryModelResponse {
    pub completion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CapabilityRegistry;

    #[test]
    fn query_model_contract_validates() {
        let reg = CapabilityRegistry::new();
        let d = query_model_descriptor();
        reg.register(d.clone()).unwrap();

        let params = serde_json::to_value(QueryModelParams {
            prompt: "summarize".into(),
            context_artifacts: vec!["ab".repeat(32)],
        })
        .unwrap();
        reg.validate(&params, &d).unwrap();

        let response = serde_json::to_value(QueryModelResponse {
            completion: "done".into(),
            rationale: None,
        })
        .unwrap();
        reg.validate_output(&response, &d).unwrap();
        assert!(reg.validate_output(&json!({ "rationale": "x" }), &d).is_err());
    }

    #[test]
    fn query_model_is_non_deterministic_network() {
        let d = query_model_descriptor();
        assert!(!d.deterministic);
        assert_eq!(d.side_effect, SideEffect::ExternalNetwork);
    }
}
