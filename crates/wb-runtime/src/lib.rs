//! Workbench Plugin Runtime
//!
//! Loads, sandboxes, supervises and dispatches to plugin instances.
//!
//! # Lifecycle
//!
//! Instances move through [`InstanceState`]; every transition goes through
//! [`validate_transition`]. A faulted instance is never reloaded
//! automatically: callers use [`Runtime::reload`].
//!
//! # Dispatch
//!
//! [`Runtime::dispatch`] resolves a [`CapabilityRequest`] through the
//! registry and reserves a slot on one instance, returning a [`Lease`].
//! [`Lease::invoke`] validates the call, races it against the sandbox
//! timeout and a [`CancelSignal`], then checks the output.
//!
//! [`CapabilityRequest`]: wb_capability::CapabilityRequest

#![allow(missing_docs)]

mod cancel;
mod config;
mod context;
mod error;
mod instance;
mod manifest;
mod plugin;
mod runtime;
mod sandbox;
mod state;

pub use cancel::{CancelReason, CancelSignal};
pub use config::RuntimeConfig;
pub use context::InvocationContext;
pub use error::{FaultReason, LoadFailure, RuntimeError};
pub use instance::{InstanceId, InstanceInfo};
pub use manifest::{PluginManifest, ResourceLimits, SandboxPolicy};
pub use plugin::{InputArtifact, Plugin, PluginError, PluginInput, PluginOutput, ProducedArtifact};
pub use runtime::{Lease, Runtime};
pub use state::{allowed_transitions, validate_transition, InstanceState};
