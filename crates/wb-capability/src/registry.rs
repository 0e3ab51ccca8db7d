//! Capability registry
//!
//! Holds validated descriptors keyed by name and version. One registry is
//! shared explicitly (`Arc<CapabilityRegistry>`) by the engine and runtime
//! that use it; there is no process-wide instance.

use crate::descriptor::{CapabilityDescriptor, CapabilityRequest};
use crate::error::CapabilityError;
use crate::version::{Version, VersionReq};
use jsonschema::JSONSchema;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

/// Registry of capability descriptors
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    entries: RwLock<BTreeMap<String, BTreeMap<Version, CapabilityDescriptor>>>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor
    ///
    /// Re-registering an identical descriptor is a no-op.
    ///
    /// # Errors
    /// - `SchemaError` if either schema does not compile
    /// - `SchemaConflict` if the same name and version hold a different contract
    pub fn register(&self, descriptor: CapabilityDescriptor) -> Result<(), CapabilityError> {
        compile_check(&descriptor.id(), &descriptor.input_schema)?;
        compile_check(&descriptor.id(), &descriptor.output_schema)?;

        let mut entries = self.entries.write();
        let versions = entries.entry(descriptor.name.clone()).or_default();
        match versions.get(&descriptor.version) {
            Some(existing) if *existing == descriptor => Ok(()),
            Some(_) => {
                tracing::warn!(capability = %descriptor.id(), "conflicting capability registration");
                Err(CapabilityError::SchemaConflict {
                    name: descriptor.name,
                    version: descriptor.version,
                })
            }
            None => {
                tracing::info!(
                    capability = %descriptor.id(),
                    side_effect = %descriptor.side_effect,
                    "capability registered"
                );
                versions.insert(descriptor.version, descriptor);
                Ok(())
            }
        }
    }

    /// Descriptors of `name` matching `range`, highest version first
    ///
    /// # Errors
    /// `NotFound` when nothing matches.
    pub fn resolve(
        &self,
        name: &str,
        range: &VersionReq,
    ) -> Result<Vec<CapabilityDescriptor>, CapabilityError> {
        let entries = self.entries.read();
        let matched: Vec<CapabilityDescriptor> = entries
            .get(name)
            .map(|versions| {
                versions
                    .iter()
                    .rev()
                    .filter(|(v, _)| range.matches(v))
                    .map(|(_, d)| d.clone())
                    .collect()
            })
            .unwrap_or_default();

        if matched.is_empty() {
            return Err(CapabilityError::NotFound {
                name: name.to_string(),
                range: range.to_string(),
            });
        }
        Ok(matched)
    }

    /// [`resolve`](Self::resolve) for a parsed request
    ///
    /// # Errors
    /// `NotFound` when nothing matches.
    pub fn resolve_request(
        &self,
        request: &CapabilityRequest,
    ) -> Result<Vec<CapabilityDescriptor>, CapabilityError> {
        self.resolve(&request.name, &request.range)
    }

    /// Exact lookup
    #[must_use]
    pub fn get(&self, name: &str, version: &Version) -> Option<CapabilityDescriptor> {
        self.entries
            .read()
            .get(name)
            .and_then(|versions| versions.get(version))
            .cloned()
    }

    /// Check that `descriptor` is exactly what the registry holds
    ///
    /// # Errors
    /// `NotFound` if unregistered, `SchemaConflict` if it differs.
    pub fn check_registered(&self, descriptor: &CapabilityDescriptor) -> Result<(), CapabilityError> {
        match self.get(&descriptor.name, &descriptor.version) {
            Some(held) if held == *descriptor => Ok(()),
            Some(_) => Err(CapabilityError::SchemaConflict {
                name: descriptor.name.clone(),
                version: descriptor.version,
            }),
            None => Err(CapabilityError::NotFound {
                name: descriptor.name.clone(),
                range: VersionReq::exact(descriptor.version).to_string(),
            }),
        }
    }

    /// Validate call parameters against a registered descriptor's input schema
    ///
    /// # Errors
    /// `SchemaError` listing every violation; `NotFound`/`SchemaConflict`
    /// if the descriptor is not the registered one.
    pub fn validate(
        &self,
        input: &Value,
        descriptor: &CapabilityDescriptor,
    ) -> Result<(), CapabilityError> {
        self.check_registered(descriptor)?;
        check_instance(&descriptor.id(), &descriptor.input_schema, input)
    }

    /// Validate a response against a registered descriptor's output schema
    ///
    /// # Errors
    /// As [`validate`](Self::validate).
    pub fn validate_output(
        &self,
        output: &Value,
        descriptor: &CapabilityDescriptor,
    ) -> Result<(), CapabilityError> {
        self.check_registered(descriptor)?;
        check_instance(&descriptor.id(), &descriptor.output_schema, output)
    }

    /// All descriptors, by name then ascending version
    #[must_use]
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.entries
            .read()
            .values()
            .flat_map(|versions| versions.values().cloned())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn compile_check(capability: &str, schema: &Value) -> Result<(), CapabilityError> {
    JSONSchema::compile(schema)
        .map(|_| ())
        .map_err(|e| CapabilityError::schema(capability, vec![e.to_string()]))
}

fn check_instance(capability: &str, schema: &Value, instance: &Value) -> Result<(), CapabilityError> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| CapabilityError::schema(capability, vec![e.to_string()]))?;
    let result = compiled
        .validate(instance)
        .map_err(|errors| errors.map(|e| e.to_string()).collect::<Vec<_>>());
    result.map_err(|errors| CapabilityError::schema(capability, errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lint(version: Version) -> CapabilityDescriptor {
        CapabilityDescriptor::new("lint", version).with_input_schema(json!({
            "type": "object",
            "properties": { "strict": { "type": "boolean" } }
        }))
    }

    #[test]
    fn identical_registration_is_idempotent() {
        let reg = CapabilityRegistry::new();
        reg.register(lint(Version::new(1, 0, 0))).unwrap();
        reg.register(lint(Version::new(1, 0, 0))).unwrap();
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn conflicting_registration_rejected() {
        let reg = CapabilityRegistry::new();
        reg.register(lint(Version::new(1, 0, 0))).unwrap();
        let err = reg
            .register(lint(Version::new(1, 0, 0)).with_reentrant(true))
            .unwrap_err();
        assert!(matches!(err, CapabilityError::SchemaConflict { .. }));
    }

    #[test]
    fn uncompilable_schema_rejected() {
        let reg = CapabilityRegistry::new();
        let bad = CapabilityDescriptor::new("bad", Version::new(1, 0, 0))
            .with_input_schema(json!({ "type": 17 }));
        assert!(matches!(
            reg.register(bad),
            Err(CapabilityError::SchemaError { .. })
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn validate_reports_violations() {
        let reg = CapabilityRegistry::new();
        let d = lint(Version::new(1, 0, 0));
        reg.register(d.clone()).unwrap();
        reg.validate(&json!({ "strict": true }), &d).unwrap();
        let err = reg.validate(&json!({ "strict": "yes" }), &d).unwrap_err();
        match err {
            CapabilityError::SchemaError { errors, .. } => assert!(!errors.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validate_requires_registered_descriptor() {
        let reg = CapabilityRegistry::new();
        let d = lint(Version::new(1, 0, 0));
        assert!(reg.validate(&json!({}), &d).unwrap_err().is_not_found());
    }
}
