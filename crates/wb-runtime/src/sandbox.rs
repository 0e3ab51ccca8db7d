//! Sandbox resource accounting
//!
//! Each loaded instance holds a [`SandboxGuard`] reserving its concurrency
//! slots from the runtime-wide pool. Dropping the guard returns the slots,
//! so they come back on every exit path: unload, failed load, runtime drop.

use parking_lot::Mutex;
use std::sync::Arc;

/// Runtime-wide concurrency slots
#[derive(Debug)]
pub(crate) struct ResourcePool {
    available: Mutex<usize>,
    capacity: usize,
}

impl ResourcePool {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            available: Mutex::new(capacity),
            capacity,
        })
    }

    /// Reserve `slots`, or describe why not
    pub(crate) fn acquire(self: &Arc<Self>, slots: usize) -> Result<SandboxGuard, String> {
        let mut available = self.available.lock();
        if *available < slots {
            return Err(format!(
                "requested {slots} concurrency slots, {} of {} available",
                *available, self.capacity
            ));
        }
        *available -= slots;
        Ok(SandboxGuard {
            pool: Arc::clone(self),
            slots,
        })
    }

    pub(crate) fn available(&self) -> usize {
        *self.available.lock()
    }
}

/// Slots held by one loaded instance
#[derive(Debug)]
pub(crate) struct SandboxGuard {
    pool: Arc<ResourcePool>,
    slots: usize,
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        *self.pool.available.lock() += self.slots;
        tracing::trace!(slots = self.slots, "sandbox slots released");
    }
}
