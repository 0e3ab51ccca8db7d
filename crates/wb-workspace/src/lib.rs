//! Workbench Workspace Engine
//!
//! Owns a workspace's artifacts, their provenance graph and the log of
//! invocations that produced them.
//!
//! # Core Concepts
//!
//! - [`WorkspaceEngine`]: invokes capabilities over artifacts and commits results
//! - [`InvocationRecord`]: append-only entry per invocation or user change
//! - [`InvocationLog`]: record persistence (memory and filesystem backends)
//! - [`ProvenanceGraph`]: parent -> child DAG over artifact hashes
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = WorkspaceEngine::new("demo", store, log, runtime, EngineConfig::default());
//! let root = engine.add_root(ArtifactKind::Code, "fn main() {}").await?;
//! let outputs = engine.invoke(&CapabilityRequest::parse("format@^1")?, &[root.hash]).await?;
//! let history = engine.list_provenance(&outputs[0].hash).await?;
//! ```

#![allow(missing_docs)]

mod config;
mod engine;
mod error;
mod log;
mod provenance;
mod record;

pub use config::EngineConfig;
pub use engine::{InvokeOutcome, InvokeRequest, ReplayReport, ReplayStatus, WorkspaceEngine};
pub use error::{LogError, WorkspaceError};
pub use log::{FsInvocationLog, InvocationLog, MemoryInvocationLog};
pub use provenance::ProvenanceGraph;
pub use record::{CapabilityRef, InvocationRecord, RecordStatus};
