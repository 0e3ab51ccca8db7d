//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Workspace engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attach identical concurrent invocations to one execution
    pub coalesce: bool,
    /// Root of the filesystem invocation log
    pub log_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coalesce: true,
            log_root: PathBuf::from(".workbench/log"),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    #[must_use]
    pub fn with_log_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.log_root = root.into();
        self
    }
}
