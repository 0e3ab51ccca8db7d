//! Per-call context handed to plugins

use crate::cancel::{CancelReason, CancelSignal};
use crate::error::{FaultReason, RuntimeError};
use crate::instance::{Instance, InstanceId};
use crate::plugin::{PluginInput, PluginOutput};
use crate::runtime::Runtime;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use wb_capability::{CapabilityDescriptor, CapabilityRequest};

/// What a plugin sees about the call it is serving
///
/// Nested capability calls go through [`call`](Self::call) so they obey
/// the caller's sandbox, cancellation and deadline.
#[derive(Clone)]
pub struct InvocationContext {
    runtime: Runtime,
    instance: Arc<Instance>,
    descriptor: CapabilityDescriptor,
    cancel: CancelSignal,
    deadline: Instant,
    depth: usize,
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("instance", &self.instance.id)
            .field("capability", &self.descriptor.id())
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl InvocationContext {
    pub(crate) fn new(
        runtime: Runtime,
        instance: Arc<Instance>,
        descriptor: CapabilityDescriptor,
        cancel: CancelSignal,
        deadline: Instant,
        depth: usize,
    ) -> Self {
        Self {
            runtime,
            instance,
            descriptor,
            cancel,
            deadline,
            depth,
        }
    }

    /// The capability being served
    #[must_use]
    pub fn capability(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance.id
    }

    #[must_use]
    pub fn plugin_id(&self) -> &str {
        self.instance.plugin_id()
    }

    #[must_use]
    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Nesting level; top-level calls are 0
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Time left before the call deadline
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Cooperative cancellation point
    ///
    /// # Errors
    /// The cancellation reason, or `Timeout` once the deadline has passed.
    pub fn checkpoint(&self) -> Result<(), CancelReason> {
        self.cancel.check()?;
        if Instant::now() >= self.deadline {
            return Err(CancelReason::Timeout);
        }
        Ok(())
    }

    /// Call another capability through the runtime
    ///
    /// # Errors
    /// - `Faulted` (and the caller is faulted) if the capability is not in
    ///   the caller's allow-list or the call depth bound is exceeded
    /// - any dispatch or invocation error of the callee
    pub async fn call(
        &self,
        request: CapabilityRequest,
        input: PluginInput,
    ) -> Result<PluginOutput, RuntimeError> {
        let sandbox = &self.instance.manifest.sandbox;
        if !sandbox.may_call(&request.name) {
            return Err(self.instance.fault(FaultReason::SandboxViolation(format!(
                "call to undeclared capability {}",
                request.name
            ))));
        }
        let max_depth = self.runtime.config().max_call_depth;
        if self.depth + 1 > max_depth {
            return Err(self.instance.fault(FaultReason::ResourceExhausted(format!(
                "call depth {} exceeds {max_depth}",
                self.depth + 1
            ))));
        }

        tracing::debug!(
            caller = %self.instance.id,
            callee = %request,
            depth = self.depth + 1,
            "nested capability call"
        );
        let lease = self.runtime.dispatch(&request)?;
        Box::pin(lease.run(input, self.cancel.clone(), Some(self.deadline), self.depth + 1)).await
    }
}
