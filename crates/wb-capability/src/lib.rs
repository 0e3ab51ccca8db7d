//! Workbench Capability Registry
//!
//! Typed, versioned operation contracts that plugins advertise and the
//! workspace engine requests.
//!
//! - [`CapabilityDescriptor`]: name, [`Version`], JSON Schemas, side effects
//! - [`CapabilityRequest`]: `name@range` lookup key
//! - [`CapabilityRegistry`]: registration, resolution (highest version
//!   first) and schema validation

#![allow(missing_docs)]

mod builtin;
mod descriptor;
mod error;
mod registry;
mod version;

pub use builtin::{query_model_descriptor, QueryModelParams, QueryModelResponse, QUERY_MODEL};
pub use descriptor::{CapabilityDescriptor, CapabilityRequest, SideEffect};
pub use error::CapabilityError;
pub use registry::CapabilityRegistry;
pub use version::{Version, VersionReq};
