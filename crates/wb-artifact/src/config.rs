//! Artifact store configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the store
    pub root: PathBuf,
    /// Re-hash content blobs on every read
    pub verify_on_read: bool,
}

impl StoreConfig {
    /// Config rooted at `root` with defaults otherwise
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Toggle read verification
    #[inline]
    #[must_use]
    pub fn with_verify_on_read(mut self, verify: bool) -> Self {
        self.verify_on_read = verify;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".workbench/artifacts"),
            verify_on_read: true,
        }
    }
}
