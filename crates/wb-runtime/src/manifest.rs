//! Plugin manifests and sandbox policies

use crate::config::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use wb_capability::{CapabilityDescriptor, CapabilityRequest, Version};

/// What a plugin declares about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub version: Version,
    /// Capabilities the plugin implements
    pub provides: Vec<CapabilityDescriptor>,
    /// Capabilities that must resolve before the plugin can load
    #[serde(default)]
    pub requires: Vec<CapabilityRequest>,
    #[serde(default)]
    pub sandbox: SandboxPolicy,
}

impl PluginManifest {
    #[must_use]
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
            provides: Vec::new(),
            requires: Vec::new(),
            sandbox: SandboxPolicy::default(),
        }
    }

    #[must_use]
    pub fn provides(mut self, descriptor: CapabilityDescriptor) -> Self {
        self.provides.push(descriptor);
        self
    }

    #[must_use]
    pub fn requires(mut self, request: CapabilityRequest) -> Self {
        self.requires.push(request);
        self
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxPolicy) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Whether a descriptor with the same name and version is provided
    #[must_use]
    pub fn declared(&self, descriptor: &CapabilityDescriptor) -> bool {
        self.provides
            .iter()
            .any(|d| d.name == descriptor.name && d.version == descriptor.version)
    }
}

/// Resource limits applied to every call into an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Per-call wall-clock limit in milliseconds
    pub call_timeout_ms: u64,
    /// Upper bound on produced bytes (artifact content plus response)
    pub max_output_bytes: usize,
    /// Concurrent calls allowed for reentrant capabilities
    pub max_concurrency: usize,
}

impl ResourceLimits {
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
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

    /// Check these limits against the runtime ceiling
    ///
    /// # Errors
    /// A description of the first limit that exceeds the ceiling.
    pub fn fits_within(&self, ceiling: &RuntimeConfig) -> Result<(), String> {
        if self.call_timeout_ms > ceiling.max_call_timeout_ms {
            return Err(format!(
                "call timeout {}ms exceeds ceiling {}ms",
                self.call_timeout_ms, ceiling.max_call_timeout_ms
            ));
        }
        if self.max_output_bytes > ceiling.max_output_bytes {
            return Err(format!(
                "output limit {} bytes exceeds ceiling {} bytes",
                self.max_output_bytes, ceiling.max_output_bytes
            ));
        }
        if self.max_concurrency == 0 || self.max_concurrency > ceiling.max_concurrency {
            return Err(format!(
                "concurrency {} outside 1..={}",
                self.max_concurrency, ceiling.max_concurrency
            ));
        }
        Ok(())
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            max_output_bytes: 16 * 1024 * 1024,
            max_concurrency: 4,
        }
    }
}

/// Sandbox policy declared by a plugin
///
/// Filesystem and network flags are declarative: they are reported with
/// the instance but not enforced by the operating system.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    pub limits: ResourceLimits,
    /// Capability names this plugin may call through its context
    pub allowed_calls: BTreeSet<String>,
    pub filesystem: bool,
    pub network: bool,
}

impl SandboxPolicy {
    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn allow_call(mut self, capability: impl Into<String>) -> Self {
        self.allowed_calls.insert(capability.into());
        self
    }

    #[must_use]
    pub fn with_filesystem(mut self, allowed: bool) -> Self {
        self.filesystem = allowed;
        self
    }

    #[must_use]
    pub fn with_network(mut self, allowed: bool) -> Self {
        self.network = allowed;
        self
    }

    #[must_use]
    pub fn may_call(&self, capability: &str) -> bool {
        self.allowed_calls.contains(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_fit_default_ceiling() {
        assert!(ResourceLimits::default()
            .fits_within(&RuntimeConfig::default())
            .is_ok());
    }

    #[test]
    fn oversized_limits_denied() {
        let ceiling = RuntimeConfig::default();
        let limits = ResourceLimits::default().with_max_concurrency(ceiling.max_concurrency + 1);
        assert!(limits.fits_within(&ceiling).is_err());
        let limits = ResourceLimits::default().with_max_concurrency(0);
        assert!(limits.fits_within(&ceiling).is_err());
    }

    #[test]
    fn allow_list() {
        let policy = SandboxPolicy::default().allow_call("format");
        assert!(policy.may_call("format"));
        assert!(!policy.may_call("execute-code"));
    }
}
