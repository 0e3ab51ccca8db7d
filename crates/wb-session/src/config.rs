//! Workbench configuration
//!
//! One TOML file with a section per component:
//!
//! ```toml
//! workspace = "default"
//!
//! [store]
//! root = ".workbench/artifacts"
//!
//! [runtime]
//! max_call_depth = 4
//!
//! [engine]
//! log_root = ".workbench/log"
//!
//! [session]
//! request_timeout_ms = 60000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use wb_artifact::StoreConfig;
use wb_runtime::RuntimeConfig;
use wb_workspace::EngineConfig;

/// Configuration load failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Request handling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for one external request, independent of plugin timeouts
    pub request_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 60_000,
        }
    }
}

impl SessionConfig {
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// All component settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    /// Workspace id used by the command-line tool
    pub workspace: String,
    pub store: StoreConfig,
    pub runtime: RuntimeConfig,
    pub engine: EngineConfig,
    pub session: SessionConfig,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            workspace: "default".to_string(),
            store: StoreConfig::default(),
            runtime: RuntimeConfig::default(),
            engine: EngineConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl WorkbenchConfig {
    /// Load from a TOML file
    ///
    /// # Errors
    /// `Io` if unreadable, `Parse` if not valid TOML for this shape
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string; missing sections take defaults
    ///
    /// # Errors
    /// `Parse` on malformed TOML or mistyped fields
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// # Errors
    /// `Serialize` if a value has no TOML form
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    #[must_use]
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// Point store and log under one directory
    #[must_use]
    pub fn rooted_at(mut self, dir: &Path) -> Self {
        self.store.root = dir.join("artifacts");
        self.engine.log_root = dir.join("log");
        self
    }
}
