//! Plugin runtime: registration, loading, dispatch and supervision

use crate::cancel::{CancelReason, CancelSignal};
use crate::config::RuntimeConfig;
use crate::context::InvocationContext;
use crate::error::{FaultReason, LoadFailure, RuntimeError};
use crate::instance::{Instance, InstanceId, InstanceInfo};
use crate::plugin::{Plugin, PluginError, PluginInput, PluginOutput};
use crate::sandbox::{ResourcePool, SandboxGuard};
use crate::state::InstanceState;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use wb_capability::{CapabilityDescriptor, CapabilityRegistry, CapabilityRequest};

/// Hosts plugin instances and dispatches capability calls to them
///
/// Cheap to clone; clones share the same instances.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    registry: Arc<CapabilityRegistry>,
    config: RuntimeConfig,
    instances: RwLock<Vec<Arc<Instance>>>,
    /// Held while choosing an instance and reserving its slot
    selection: Mutex<()>,
    next_order: AtomicU64,
    pool: Arc<ResourcePool>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("instances", &self.inner.instances.read().len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>, config: RuntimeConfig) -> Self {
        let pool = ResourcePool::new(config.total_concurrency);
        Self {
            inner: Arc::new(RuntimeInner {
                registry,
                config,
                instances: RwLock::new(Vec::new()),
                selection: Mutex::new(()),
                next_order: AtomicU64::new(0),
                pool,
            }),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.inner.registry
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Concurrency slots not held by loaded instances
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.inner.pool.available()
    }

    /// Add an instance of `plugin` in the `Registered` state
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> InstanceId {
        let order = self.inner.next_order.fetch_add(1, Ordering::Relaxed);
        let instance = Arc::new(Instance::new(plugin, order));
        let id = instance.id;
        tracing::info!(
            instance = %id,
            plugin = %instance.plugin_id(),
            version = %instance.manifest.version,
            order,
            "plugin registered"
        );
        self.inner.instances.write().push(instance);
        id
    }

    /// Register the plugin's provided descriptors, then the plugin
    ///
    /// # Errors
    /// `SchemaConflict`/`SchemaError` from the registry.
    pub fn install(&self, plugin: Arc<dyn Plugin>) -> Result<InstanceId, RuntimeError> {
        for descriptor in plugin.manifest().provides {
            self.inner.registry.register(descriptor)?;
        }
        Ok(self.register(plugin))
    }

    /// Load an instance now instead of on first dispatch
    ///
    /// # Errors
    /// `PluginLoadError` if loading fails (the instance is then `Faulted`).
    pub async fn activate(&self, id: InstanceId) -> Result<(), RuntimeError> {
        let instance = self.find(id)?;
        {
            let _selection = self.inner.selection.lock();
            match instance.state() {
                InstanceState::Registered => {
                    instance.transition(InstanceState::Loading)?;
                }
                state @ (InstanceState::Unloading | InstanceState::Terminated) => {
                    return Err(RuntimeError::Unavailable { instance: id, state });
                }
                _ => {}
            }
        }
        self.ensure_loaded(&instance).await
    }

    /// Choose an instance for `request` and reserve a call slot on it
    ///
    /// Ready instances at the highest matching version win; otherwise a
    /// loadable instance is chosen and will load on first use. Ties go to
    /// the fewest in-flight calls, then the earliest registration.
    ///
    /// # Errors
    /// `NotFound` if no descriptor matches, `NoInstance` if none is served.
    pub fn dispatch(&self, request: &CapabilityRequest) -> Result<Lease, RuntimeError> {
        let descriptors = self.inner.registry.resolve_request(request)?;

        let _selection = self.inner.selection.lock();
        let instances = self.inner.instances.read();
        let pick = |eligible: fn(InstanceState) -> bool| {
            descriptors.iter().find_map(|descriptor| {
                instances
                    .iter()
                    .filter(|i| i.declares(descriptor) && eligible(i.state()))
                    .min_by_key(|i| (i.in_flight(), i.order))
                    .map(|i| (Arc::clone(i), descriptor.clone()))
            })
        };

        let (instance, descriptor) = pick(InstanceState::is_ready)
            .or_else(|| pick(InstanceState::is_loadable))
            .ok_or_else(|| RuntimeError::NoInstance {
                request: request.to_string(),
            })?;

        if instance.state() == InstanceState::Registered {
            instance.transition(InstanceState::Loading)?;
        }
        instance.reserve();
        tracing::debug!(
            request = %request,
            capability = %descriptor.id(),
            instance = %instance.id,
            in_flight = instance.in_flight(),
            "dispatched"
        );

        Ok(Lease {
            runtime: self.clone(),
            instance,
            descriptor,
        })
    }

    /// Drain, run the unload hook and terminate an instance
    ///
    /// # Errors
    /// `IllegalTransition` unless the instance is `Ready` or `Faulted`.
    pub async fn unload(&self, id: InstanceId) -> Result<(), RuntimeError> {
        let instance = self.find(id)?;
        {
            let _selection = self.inner.selection.lock();
            instance.transition(InstanceState::Unloading)?;
        }

        instance.drained().await;
        let _released: Option<SandboxGuard> = instance.take_sandbox();

        // Only instances whose load succeeded get the hook.
        if matches!(instance.loaded.get(), Some(Ok(()))) {
            if let Err(e) = instance.plugin.unload().await {
                tracing::warn!(instance = %id, error = %e, "unload hook failed");
            }
        }

        instance.transition(InstanceState::Terminated)?;
        tracing::info!(instance = %id, plugin = %instance.plugin_id(), "plugin unloaded");
        Ok(())
    }

    /// Replace the plugin's ready or faulted instances with a freshly loaded one
    ///
    /// # Errors
    /// `UnknownPlugin`, or `PluginLoadError` if the new instance fails to load.
    pub async fn reload(&self, plugin_id: &str) -> Result<InstanceId, RuntimeError> {
        let existing: Vec<Arc<Instance>> = self
            .inner
            .instances
            .read()
            .iter()
            .filter(|i| i.plugin_id() == plugin_id)
            .cloned()
            .collect();
        let plugin = existing
            .last()
            .map(|i| Arc::clone(&i.plugin))
            .ok_or_else(|| RuntimeError::UnknownPlugin(plugin_id.to_string()))?;

        for old in &existing {
            if matches!(old.state(), InstanceState::Ready | InstanceState::Faulted) {
                self.unload(old.id).await?;
            }
        }

        let id = self.register(plugin);
        self.activate(id).await?;
        tracing::info!(plugin = %plugin_id, instance = %id, "plugin reloaded");
        Ok(id)
    }

    /// Snapshot of every instance in registration order
    #[must_use]
    pub fn instances(&self) -> Vec<InstanceInfo> {
        self.inner.instances.read().iter().map(|i| i.info()).collect()
    }

    /// # Errors
    /// `UnknownInstance`.
    pub fn state(&self, id: InstanceId) -> Result<InstanceState, RuntimeError> {
        Ok(self.find(id)?.state())
    }

    fn find(&self, id: InstanceId) -> Result<Arc<Instance>, RuntimeError> {
        self.inner
            .instances
            .read()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or(RuntimeError::UnknownInstance(id))
    }

    async fn ensure_loaded(&self, instance: &Arc<Instance>) -> Result<(), RuntimeError> {
        let outcome = instance
            .loaded
            .get_or_init(|| self.load(instance))
            .await;
        outcome.clone().map_err(|reason| RuntimeError::PluginLoad {
            plugin: instance.plugin_id().to_string(),
            reason,
        })
    }

    /// Sandbox setup, contract checks and the plugin's load hook
    async fn load(&self, instance: &Arc<Instance>) -> Result<(), LoadFailure> {
        let manifest = &instance.manifest;
        let registry = &self.inner.registry;

        let prepared: Result<SandboxGuard, LoadFailure> = async {
            manifest
                .sandbox
                .limits
                .fits_within(&self.inner.config)
                .map_err(LoadFailure::LimitDenied)?;
            for descriptor in &manifest.provides {
                registry
                    .check_registered(descriptor)
                    .map_err(|e| LoadFailure::SchemaMismatch {
                        capability: descriptor.id(),
                        detail: e.to_string(),
                    })?;
            }
            for request in &manifest.requires {
                registry
                    .resolve_request(request)
                    .map_err(|_| LoadFailure::MissingDependency(request.clone()))?;
            }
            let guard = self
                .inner
                .pool
                .acquire(manifest.sandbox.limits.max_concurrency)
                .map_err(LoadFailure::LimitDenied)?;
            instance
                .plugin
                .load()
                .await
                .map_err(|e| LoadFailure::Hook(e.to_string()))?;
            Ok(guard)
        }
        .await;

        let failure = match prepared {
            Ok(guard) => {
                instance.install_sandbox(guard);
                match instance.transition(InstanceState::Ready) {
                    Ok(_) => {
                        tracing::info!(
                            instance = %instance.id,
                            plugin = %manifest.id,
                            filesystem = manifest.sandbox.filesystem,
                            network = manifest.sandbox.network,
                            "plugin loaded"
                        );
                        return Ok(());
                    }
                    Err(e) => LoadFailure::Hook(e.to_string()),
                }
            }
            Err(failure) => failure,
        };

        instance.take_sandbox();
        instance.fault(FaultReason::Load(failure.clone()));
        Err(failure)
    }
}

/// A reserved call slot on one instance
///
/// Dropping the lease releases the reservation, whether or not it was used.
pub struct Lease {
    runtime: Runtime,
    instance: Arc<Instance>,
    descriptor: CapabilityDescriptor,
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("instance", &self.instance.id)
            .field("capability", &self.descriptor.id())
            .finish_non_exhaustive()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.instance.release();
    }
}

/// Marks a call as executing for as long as it lives
struct CallGuard<'a> {
    instance: &'a Instance,
    succeeded: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.instance.end_call(self.succeeded);
    }
}

impl Lease {
    /// The resolved descriptor this call will run under
    #[must_use]
    pub fn descriptor(&self) -> &CapabilityDescriptor {
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

    /// Run the call under the instance's sandbox policy
    ///
    /// # Errors
    /// - `PluginLoadError` if the instance cannot load
    /// - `SchemaError` if params or response violate the descriptor
    /// - `Cancelled` on cancellation or call timeout
    /// - `Faulted` on fatal errors, sandbox violations or oversized output
    /// - `InvocationError` on recoverable plugin failure
    pub async fn invoke(
        self,
        input: PluginInput,
        cancel: CancelSignal,
    ) -> Result<PluginOutput, RuntimeError> {
        self.run(input, cancel, None, 0).await
    }

    pub(crate) async fn run(
        self,
        input: PluginInput,
        cancel: CancelSignal,
        parent_deadline: Option<Instant>,
        depth: usize,
    ) -> Result<PluginOutput, RuntimeError> {
        let limits = self.instance.manifest.sandbox.limits;
        let own_deadline = Instant::now() + limits.call_timeout();
        let deadline = parent_deadline.map_or(own_deadline, |parent| parent.min(own_deadline));

        cancel.check().map_err(RuntimeError::Cancelled)?;
        self.runtime.ensure_loaded(&self.instance).await?;
        self.runtime
            .inner
            .registry
            .validate(&input.params, &self.descriptor)?;

        let ctx = InvocationContext::new(
            self.runtime.clone(),
            Arc::clone(&self.instance),
            self.descriptor.clone(),
            cancel.clone(),
            deadline,
            depth,
        );

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            reason = cancel.cancelled() => Err(RuntimeError::Cancelled(reason)),
            () = tokio::time::sleep_until(deadline) => Err(RuntimeError::Cancelled(CancelReason::Timeout)),
            result = self.execute(ctx, input) => result,
        };

        tracing::debug!(
            instance = %self.instance.id,
            capability = %self.descriptor.id(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            ok = result.is_ok(),
            "call finished"
        );
        result
    }

    async fn execute(
        &self,
        ctx: InvocationContext,
        input: PluginInput,
    ) -> Result<PluginOutput, RuntimeError> {
        let instance = &self.instance;
        let _exclusive = if self.descriptor.reentrant {
            None
        } else {
            Some(instance.serial.lock().await)
        };
        let _shared = if self.descriptor.reentrant {
            Some(instance.permits.acquire().await.map_err(|_| {
                RuntimeError::Unavailable {
                    instance: instance.id,
                    state: instance.state(),
                }
            })?)
        } else {
            None
        };

        instance.begin_call()?;
        let mut call = CallGuard {
            instance,
            succeeded: false,
        };

        let result = instance.plugin.invoke(ctx, input).await;

        // A sandbox violation during the call outranks whatever it returned.
        if let Some(fault) = instance.fault_error() {
            return Err(fault);
        }

        let output = match result {
            Ok(output) => output,
            Err(PluginError::Failed(message)) => {
                return Err(RuntimeError::Invocation {
                    plugin: instance.plugin_id().to_string(),
                    message,
                })
            }
            Err(PluginError::Fatal(message)) => {
                return Err(instance.fault(FaultReason::Fatal(message)))
            }
            Err(PluginError::Cancelled(reason)) => return Err(RuntimeError::Cancelled(reason)),
        };

        let limit = instance.manifest.sandbox.limits.max_output_bytes;
        let produced = output.output_bytes();
        if produced > limit {
            return Err(instance.fault(FaultReason::ResourceExhausted(format!(
                "output of {produced} bytes exceeds limit of {limit}"
            ))));
        }

        self.runtime
            .inner
            .registry
            .validate_output(&output.response, &self.descriptor)?;
        call.succeeded = true;
        Ok(output)
    }
}
