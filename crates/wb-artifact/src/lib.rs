//! Workbench Artifact Store
//!
//! Content-addressed, versioned storage for workspace objects.
//!
//! # Core Concepts
//!
//! - [`ContentHash`]: 32-byte Blake3 hash used for content and identity
//! - [`ArtifactHandle`]: immutable metadata of a stored artifact
//! - [`ArtifactStore`]: persistence contract (memory and filesystem backends)
//! - [`Ancestors`]: lazy, restartable walk over provenance edges
//!
//! An artifact's hash covers its content and its ordered parent list, so the
//! same bytes derived from different inputs are different artifacts while
//! the underlying blob is stored once.
//!
//! # Example
//!
//! ```rust,ignore
//! use wb_artifact::{ArtifactKind, ArtifactStore, MemoryArtifactStore, Producer};
//!
//! let store = MemoryArtifactStore::new();
//! let root = store.put(b"data", &[], ArtifactKind::Data, Producer::User).await?;
//! let derived = store.put(b"clean", &[root.hash], ArtifactKind::Data, Producer::plugin("clean")).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod config;
mod error;
mod hash;
mod store;

pub use artifact::{ArtifactHandle, ArtifactKind, Producer};
pub use config::StoreConfig;
pub use error::StorageError;
pub use hash::{artifact_hash, ContentHash, HashError};
pub use store::{
    Ancestors, ArtifactStore, ArtifactStoreExt, FsArtifactStore, GcReport, MemoryArtifactStore,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
