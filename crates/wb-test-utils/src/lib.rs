//! Testing utilities for the workbench workspace
//!
//! Fixture plugins, descriptor shorthands and ready-made runtimes and
//! engines.

#![allow(missing_docs)]

pub mod plugins;

pub use plugins::*;

use serde_json::{json, Value};
use std::sync::Arc;
use wb_artifact::MemoryArtifactStore;
use wb_capability::{CapabilityDescriptor, CapabilityRegistry, Version};
use wb_runtime::{InstanceId, Plugin, Runtime, RuntimeConfig};
use wb_workspace::{EngineConfig, MemoryInvocationLog, WorkspaceEngine};

/// Descriptor accepting `{ text?: string }` and any object response
pub fn descriptor(name: &str, version: &str) -> CapabilityDescriptor {
    CapabilityDescriptor::new(name, Version::parse(version).unwrap())
        .with_input_schema(json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        }))
        .with_output_schema(json!({ "type": "object" }))
}

/// Same as [`descriptor`] but reentrant
pub fn reentrant(name: &str, version: &str) -> CapabilityDescriptor {
    descriptor(name, version).with_reentrant(true)
}

/// Same as [`descriptor`] but non-deterministic
pub fn nondeterministic(name: &str, version: &str) -> CapabilityDescriptor {
    descriptor(name, version).with_deterministic(false)
}

pub fn text_params(text: &str) -> Value {
    json!({ "text": text })
}

pub fn runtime() -> Runtime {
    runtime_with(RuntimeConfig::default())
}

pub fn runtime_with(config: RuntimeConfig) -> Runtime {
    Runtime::new(Arc::new(CapabilityRegistry::new()), config)
}

/// Register the plugin's descriptors and the plugin itself
pub fn install(runtime: &Runtime, plugin: impl Plugin) -> InstanceId {
    runtime.install(Arc::new(plugin)).unwrap()
}

/// Engine over in-memory store and log, sharing `runtime`'s registry
pub fn memory_engine(name: &str, runtime: &Runtime) -> WorkspaceEngine {
    WorkspaceEngine::new(
        name,
        Arc::new(MemoryArtifactStore::new()),
        Arc::new(MemoryInvocationLog::new()),
        runtime.clone(),
        EngineConfig::default(),
    )
}
