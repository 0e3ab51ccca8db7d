//! Runtime configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceilings every plugin's sandbox request must fit within
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Largest per-call timeout a plugin may request
    pub max_call_timeout_ms: u64,
    /// Largest output limit a plugin may request
    pub max_output_bytes: usize,
    /// Largest per-instance concurrency a plugin may request
    pub max_concurrency: usize,
    /// Concurrency slots shared by all loaded instances
    pub total_concurrency: usize,
    /// Depth bound for nested inter-plugin calls
    pub max_call_depth: usize,
}

impl RuntimeConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn max_call_timeout(&self) -> Duration {
        Duration::from_millis(self.max_call_timeout_ms)
    }

    #[must_use]
    pub fn with_max_call_timeout(mut self, timeout: Duration) -> Self {
        self.max_call_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    #[must_use]
    pub fn with_total_concurrency(mut self, n: usize) -> Self {
        self.total_concurrency = n;
        self
    }

    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_call_timeout_ms: 300_000,
            max_output_bytes: 64 * 1024 * 1024,
            max_concurrency: 16,
            total_concurrency: 256,
            max_call_depth: 8,
        }
    }
}
