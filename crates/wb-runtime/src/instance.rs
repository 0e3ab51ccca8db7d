//! Plugin instances
//!
//! An [`Instance`] is owned by the runtime. Its lifecycle state and the
//! number of executing calls change together under one lock, so `Invoking`
//! is reported exactly while at least one call runs.

use crate::error::{FaultReason, LoadFailure, RuntimeError};
use crate::manifest::{PluginManifest, SandboxPolicy};
use crate::plugin::Plugin;
use crate::sandbox::SandboxGuard;
use crate::state::{validate_transition, InstanceState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OnceCell, Semaphore};
use ulid::Ulid;
use wb_capability::{CapabilityDescriptor, Version};

/// Unique identifier for a plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(Ulid);

impl InstanceId {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time view of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub plugin_id: String,
    pub plugin_version: Version,
    pub order: u64,
    pub state: InstanceState,
    pub in_flight: usize,
    pub completed: u64,
    pub capabilities: Vec<String>,
    pub sandbox: SandboxPolicy,
}

#[derive(Debug)]
struct Status {
    state: InstanceState,
    executing: usize,
    fault: Option<FaultReason>,
}

pub(crate) struct Instance {
    pub(crate) id: InstanceId,
    pub(crate) order: u64,
    pub(crate) plugin: Arc<dyn Plugin>,
    pub(crate) manifest: PluginManifest,
    status: Mutex<Status>,
    /// Reserved at selection time, released when the lease drops
    in_flight: AtomicUsize,
    completed: AtomicU64,
    /// FIFO queue for non-reentrant capabilities
    pub(crate) serial: tokio::sync::Mutex<()>,
    /// Bound for reentrant capabilities
    pub(crate) permits: Semaphore,
    pub(crate) loaded: OnceCell<Result<(), LoadFailure>>,
    sandbox: Mutex<Option<SandboxGuard>>,
    idle: Notify,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("plugin", &self.manifest.id)
            .field("order", &self.order)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub(crate) fn new(plugin: Arc<dyn Plugin>, order: u64) -> Self {
        let manifest = plugin.manifest();
        let permits = Semaphore::new(manifest.sandbox.limits.max_concurrency.max(1));
        Self {
            id: InstanceId::new(),
            order,
            plugin,
            manifest,
            status: Mutex::new(Status {
                state: InstanceState::Registered,
                executing: 0,
                fault: None,
            }),
            in_flight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            serial: tokio::sync::Mutex::new(()),
            permits,
            loaded: OnceCell::new(),
            sandbox: Mutex::new(None),
            idle: Notify::new(),
        }
    }

    pub(crate) fn plugin_id(&self) -> &str {
        &self.manifest.id
    }

    pub(crate) fn state(&self) -> InstanceState {
        self.status.lock().state
    }

    pub(crate) fn declares(&self, descriptor: &CapabilityDescriptor) -> bool {
        self.manifest.declared(descriptor)
    }

    /// Move to `to`, returning the previous state
    pub(crate) fn transition(&self, to: InstanceState) -> Result<InstanceState, RuntimeError> {
        let mut status = self.status.lock();
        let from = status.state;
        validate_transition(from, to)?;
        status.state = to;
        tracing::debug!(instance = %self.id, plugin = %self.manifest.id, %from, %to, "instance transition");
        Ok(from)
    }

    /// Fault the instance; idempotent once faulted
    pub(crate) fn fault(&self, reason: FaultReason) -> RuntimeError {
        let mut status = self.status.lock();
        if let Some(existing) = &status.fault {
            return RuntimeError::Faulted {
                instance: self.id,
                reason: existing.clone(),
            };
        }
        if validate_transition(status.state, InstanceState::Faulted).is_ok() {
            status.state = InstanceState::Faulted;
            status.fault = Some(reason.clone());
            tracing::warn!(instance = %self.id, plugin = %self.manifest.id, %reason, "instance faulted");
        }
        RuntimeError::Faulted {
            instance: self.id,
            reason,
        }
    }

    pub(crate) fn fault_error(&self) -> Option<RuntimeError> {
        self.status
            .lock()
            .fault
            .clone()
            .map(|reason| RuntimeError::Faulted {
                instance: self.id,
                reason,
            })
    }

    /// Mark a call as executing
    pub(crate) fn begin_call(&self) -> Result<(), RuntimeError> {
        let mut status = self.status.lock();
        match status.state {
            InstanceState::Ready => {
                validate_transition(InstanceState::Ready, InstanceState::Invoking)?;
                status.state = InstanceState::Invoking;
                status.executing = 1;
                Ok(())
            }
            InstanceState::Invoking => {
                status.executing += 1;
                Ok(())
            }
            InstanceState::Faulted => Err(RuntimeError::Faulted {
                instance: self.id,
                reason: status
                    .fault
                    .clone()
                    .unwrap_or_else(|| FaultReason::Fatal("unknown".into())),
            }),
            state => Err(RuntimeError::Unavailable {
                instance: self.id,
                state,
            }),
        }
    }

    /// Mark a call as finished, returning to `Ready` when none remain
    pub(crate) fn end_call(&self, succeeded: bool) {
        let mut status = self.status.lock();
        status.executing = status.executing.saturating_sub(1);
        if status.executing == 0 && status.state == InstanceState::Invoking {
            status.state = InstanceState::Ready;
        }
        if succeeded {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn reserve(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait until no lease references this instance
    pub(crate) async fn drained(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn install_sandbox(&self, guard: SandboxGuard) {
        *self.sandbox.lock() = Some(guard);
    }

    pub(crate) fn take_sandbox(&self) -> Option<SandboxGuard> {
        self.sandbox.lock().take()
    }

    pub(crate) fn info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.id,
            plugin_id: self.manifest.id.clone(),
            plugin_version: self.manifest.version,
            order: self.order,
            state: self.state(),
            in_flight: self.in_flight(),
            completed: self.completed.load(Ordering::Relaxed),
            capabilities: self.manifest.provides.iter().map(CapabilityDescriptor::id).collect(),
            sandbox: self.manifest.sandbox.clone(),
        }
    }
}
