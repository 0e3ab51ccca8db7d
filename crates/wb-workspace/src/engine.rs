//! Workspace engine
//!
//! Ties the artifact store, the plugin runtime and the invocation log
//! together. Every committed non-root artifact has a record naming the
//! invocation that produced it.

use crate::config::EngineConfig;
use crate::error::WorkspaceError;
use crate::log::InvocationLog;
use crate::provenance::ProvenanceGraph;
use crate::record::{CapabilityRef, InvocationRecord, RecordStatus};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use ulid::Ulid;
use wb_artifact::{
    artifact_hash, ArtifactHandle, ArtifactKind, ArtifactStore, ArtifactStoreExt, ContentHash,
    GcReport, Producer,
};
use wb_capability::{CapabilityRegistry, CapabilityRequest};
use wb_runtime::{CancelReason, CancelSignal, PluginInput, Runtime};

/// A capability call against workspace artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub capability: CapabilityRequest,
    /// Input artifacts; also the parents of every produced artifact
    pub inputs: Vec<ContentHash>,
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

impl InvokeRequest {
    /// Request with empty object params
    #[must_use]
    pub fn new(capability: CapabilityRequest, inputs: Vec<ContentHash>) -> Self {
        Self {
            capability,
            inputs,
            params: empty_params(),
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Result of a successful invocation
///
/// Coalesced callers receive identical outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeOutcome {
    pub seq: u64,
    pub invocation_id: Ulid,
    pub capability: CapabilityRef,
    pub plugin_id: String,
    pub outputs: Vec<ArtifactHandle>,
    pub response: Value,
}

/// Replay verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Reproduced,
    /// Recomputed hashes differ; reported, never an error
    Diverged,
    /// Non-deterministic capability; not re-executed
    Exempt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub seq: u64,
    pub invocation_id: Ulid,
    pub capability: CapabilityRef,
    pub status: ReplayStatus,
    pub recorded: Vec<ContentHash>,
    pub recomputed: Vec<ContentHash>,
}

/// Identity of an execution for coalescing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CoalesceKey {
    request: String,
    inputs: Vec<ContentHash>,
    params: ContentHash,
    /// Set when coalescing is disabled so every call gets its own entry
    nonce: Option<u64>,
}

impl CoalesceKey {
    fn new(request: &InvokeRequest, nonce: Option<u64>) -> Self {
        // serde_json objects are key-ordered, so the rendering is canonical.
        let params = ContentHash::compute(request.params.to_string().as_bytes());
        Self {
            // Parsed form, so spelling variants of one range share a key.
            request: request.capability.to_string(),
            inputs: request.inputs.clone(),
            params,
            nonce,
        }
    }
}

type SharedExecution = Shared<BoxFuture<'static, Result<InvokeOutcome, WorkspaceError>>>;

struct Inflight {
    execution: u64,
    shared: SharedExecution,
    cancel: CancelSignal,
    waiters: usize,
}

/// Owns artifacts, provenance and invocation records for one workspace
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WorkspaceEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    name: String,
    store: Arc<dyn ArtifactStore>,
    log: Arc<dyn InvocationLog>,
    runtime: Runtime,
    config: EngineConfig,
    graph: ProvenanceGraph,
    inflight: Mutex<HashMap<CoalesceKey, Inflight>>,
    next_execution: AtomicU64,
}

impl fmt::Debug for WorkspaceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceEngine")
            .field("name", &self.inner.name)
            .field("artifacts", &self.inner.graph.node_count())
            .field("inflight", &self.inner.inflight.lock().len())
            .finish_non_exhaustive()
    }
}

impl WorkspaceEngine {
    /// Engine over an empty workspace graph
    ///
    /// Use [`WorkspaceEngine::open`] to start from what `store` already holds.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn ArtifactStore>,
        log: Arc<dyn InvocationLog>,
        runtime: Runtime,
        config: EngineConfig,
    ) -> Self {
        Self::with_graph(name.into(), store, log, runtime, config, ProvenanceGraph::new())
    }

    /// Engine whose graph is rebuilt from everything already in `store`
    ///
    /// # Errors
    /// Storage errors while listing, `Cycle` on corrupt parent edges
    pub async fn open(
        name: impl Into<String>,
        store: Arc<dyn ArtifactStore>,
        log: Arc<dyn InvocationLog>,
        runtime: Runtime,
        config: EngineConfig,
    ) -> Result<Self, WorkspaceError> {
        let handles = store.list().await?;
        let graph = ProvenanceGraph::from_handles(&handles)?;
        let name = name.into();
        tracing::info!(workspace = %name, artifacts = handles.len(), "opened workspace");
        Ok(Self::with_graph(name, store, log, runtime, config, graph))
    }

    fn with_graph(
        name: String,
        store: Arc<dyn ArtifactStore>,
        log: Arc<dyn InvocationLog>,
        runtime: Runtime,
        config: EngineConfig,
        graph: ProvenanceGraph,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                name,
                store,
                log,
                runtime,
                config,
                graph,
                inflight: Mutex::new(HashMap::new()),
                next_execution: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn log(&self) -> &Arc<dyn InvocationLog> {
        &self.inner.log
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        self.inner.runtime.registry()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn provenance_graph(&self) -> &ProvenanceGraph {
        &self.inner.graph
    }

    /// Artifacts nothing in the workspace derives from
    #[must_use]
    pub fn heads(&self) -> Vec<ContentHash> {
        self.inner.graph.heads()
    }

    /// Executions currently running
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.inner.inflight.lock().len()
    }

    /// Store a user-created root artifact
    ///
    /// Roots carry no record; their producer is the user.
    pub async fn add_root(
        &self,
        kind: ArtifactKind,
        content: impl AsRef<[u8]>,
    ) -> Result<ArtifactHandle, WorkspaceError> {
        let handle = self
            .commit(content.as_ref(), &[], kind, Producer::User)
            .await?;
        tracing::info!(workspace = %self.inner.name, artifact = %handle.hash.short(), "added root");
        Ok(handle)
    }

    /// Store a user edit derived from `parents`, with a `user` record
    pub async fn record_user_change(
        &self,
        kind: ArtifactKind,
        content: impl AsRef<[u8]>,
        parents: &[ContentHash],
    ) -> Result<ArtifactHandle, WorkspaceError> {
        let mut record = InvocationRecord::begin(None, parents.to_vec(), Value::Null);
        record.producer = Some(Producer::User);
        let handle = self
            .commit(content.as_ref(), parents, kind, Producer::User)
            .await?;
        record.outputs = vec![handle.hash];
        let record = self
            .inner
            .log
            .append(record.finish(RecordStatus::Succeeded))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to append user change record");
                WorkspaceError::from(e)
            })?;
        tracing::info!(
            workspace = %self.inner.name,
            artifact = %handle.hash.short(),
            seq = record.seq,
            "recorded user change"
        );
        Ok(handle)
    }

    /// Invoke with empty params and no external cancellation
    ///
    /// # Errors
    /// See [`WorkspaceEngine::invoke_with`]
    pub async fn invoke(
        &self,
        request: &CapabilityRequest,
        inputs: &[ContentHash],
    ) -> Result<Vec<ArtifactHandle>, WorkspaceError> {
        let request = InvokeRequest::new(request.clone(), inputs.to_vec());
        self.invoke_with(request, CancelSignal::new())
            .await
            .map(|outcome| outcome.outputs)
    }

    /// Run a capability over input artifacts and commit what it produces
    ///
    /// Identical concurrent requests share one execution. Requests are
    /// identical when their parsed capability requests print the same
    /// (`echo@1` and `echo@^1` match), their inputs are equal in order and
    /// their params are equal. Different ranges such as `echo` and `echo@^1`
    /// run separately even when they resolve to the same version today.
    ///
    /// The execution is cancelled once every attached caller has cancelled
    /// or gone away; the last caller to cancel waits for it to settle, so
    /// the `cancelled` record is in the log when this returns.
    ///
    /// # Errors
    /// - `Storage` if an input is missing or a commit fails
    /// - `Runtime` for dispatch, load, schema, plugin failures and cancellation
    pub async fn invoke_with(
        &self,
        request: InvokeRequest,
        cancel: CancelSignal,
    ) -> Result<InvokeOutcome, WorkspaceError> {
        cancel.check()?;
        let mut waiter = self.attach(request);
        let execution = waiter.shared.clone();

        tokio::select! {
            biased;
            result = execution => {
                waiter.release(None);
                result
            }
            reason = cancel.cancelled() => {
                if waiter.release(Some(reason)) {
                    waiter.shared.clone().await
                } else {
                    Err(reason.into())
                }
            }
        }
    }

    fn attach(&self, request: InvokeRequest) -> Waiter {
        let id = self.inner.next_execution.fetch_add(1, Ordering::Relaxed);
        let nonce = (!self.inner.config.coalesce).then_some(id);
        let key = CoalesceKey::new(&request, nonce);

        let mut table = self.inner.inflight.lock();
        if let Some(entry) = table.get_mut(&key) {
            entry.waiters += 1;
            tracing::debug!(
                capability = %request.capability,
                waiters = entry.waiters,
                "attached to running execution"
            );
            return Waiter {
                engine: self.clone(),
                key,
                execution: entry.execution,
                shared: entry.shared.clone(),
                attached: true,
            };
        }

        let cancel = CancelSignal::new();
        let engine = self.clone();
        let task_key = key.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = engine.execute(request, task_cancel).await;
            engine.retire(&task_key, id);
            result
        });
        let shared = async move {
            handle.await.unwrap_or_else(|e| {
                Err(WorkspaceError::Internal(format!("execution task failed: {e}")))
            })
        }
        .boxed()
        .shared();

        table.insert(
            key.clone(),
            Inflight {
                execution: id,
                shared: shared.clone(),
                cancel,
                waiters: 1,
            },
        );
        Waiter {
            engine: self.clone(),
            key,
            execution: id,
            shared,
            attached: true,
        }
    }

    fn retire(&self, key: &CoalesceKey, execution: u64) {
        let mut table = self.inner.inflight.lock();
        if table.get(key).is_some_and(|e| e.execution == execution) {
            table.remove(key);
        }
    }

    async fn execute(
        &self,
        request: InvokeRequest,
        cancel: CancelSignal,
    ) -> Result<InvokeOutcome, WorkspaceError> {
        let mut record = InvocationRecord::begin(
            Some(request.capability.clone()),
            request.inputs.clone(),
            request.params.clone(),
        );

        let input = match self.read_inputs(&request.inputs, request.params.clone()).await {
            Ok(input) => input,
            Err(e) => return Err(self.record_failure(record, e).await),
        };
        let lease = match self.inner.runtime.dispatch(&request.capability) {
            Ok(lease) => lease,
            Err(e) => return Err(self.record_failure(record, e.into()).await),
        };

        let descriptor = lease.descriptor().clone();
        let plugin_id = lease.plugin_id().to_string();
        record.producer = Some(Producer::plugin(&plugin_id));
        record.capability = Some(CapabilityRef::from(&descriptor));
        record.deterministic = descriptor.deterministic;
        tracing::debug!(
            workspace = %self.inner.name,
            capability = %descriptor.id(),
            instance = %lease.instance_id(),
            "dispatching invocation"
        );

        let output = match lease.invoke(input, cancel.clone()).await {
            Ok(output) => output,
            Err(e) => return Err(self.record_failure(record, e.into()).await),
        };
        // Late cancellation still discards the result.
        if let Some(reason) = cancel.reason() {
            return Err(self.record_failure(record, reason.into()).await);
        }

        let mut outputs = Vec::with_capacity(output.artifacts.len());
        for artifact in &output.artifacts {
            match self
                .commit(
                    &artifact.content,
                    &request.inputs,
                    artifact.kind,
                    Producer::plugin(&plugin_id),
                )
                .await
            {
                Ok(handle) => {
                    record.outputs.push(handle.hash);
                    outputs.push(handle);
                }
                // Already committed outputs stay listed on the failed record.
                Err(e) => return Err(self.record_failure(record, e).await),
            }
        }

        let record = self
            .inner
            .log
            .append(record.finish(RecordStatus::Succeeded))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, capability = %descriptor.id(), "failed to append invocation record");
                WorkspaceError::from(e)
            })?;
        tracing::info!(
            workspace = %self.inner.name,
            capability = %descriptor.id(),
            plugin = %plugin_id,
            seq = record.seq,
            outputs = outputs.len(),
            "invocation committed"
        );

        Ok(InvokeOutcome {
            seq: record.seq,
            invocation_id: record.invocation_id,
            capability: CapabilityRef::from(&descriptor),
            plugin_id,
            outputs,
            response: output.response,
        })
    }

    /// Append a `failed` or `cancelled` record and hand back the error
    async fn record_failure(&self, record: InvocationRecord, error: WorkspaceError) -> WorkspaceError {
        let status = match error.cancel_reason() {
            Some(reason) => RecordStatus::Cancelled { reason },
            None => RecordStatus::Failed {
                error_kind: error.kind().to_string(),
                message: error.to_string(),
            },
        };
        match self.inner.log.append(record.finish(status)).await {
            Ok(record) => tracing::info!(
                workspace = %self.inner.name,
                seq = record.seq,
                error_kind = error.kind(),
                "invocation did not commit"
            ),
            Err(e) => tracing::error!(error = %e, original = %error, "failed to append failure record"),
        }
        error
    }

    async fn read_inputs(
        &self,
        inputs: &[ContentHash],
        params: Value,
    ) -> Result<PluginInput, WorkspaceError> {
        let mut input = PluginInput::new(params);
        for hash in inputs {
            let handle = self.inner.store.handle(hash).await?;
            let content = self.inner.store.get(hash).await?;
            input = input.with_artifact(*hash, handle.kind, content);
        }
        Ok(input)
    }

    async fn commit(
        &self,
        content: &[u8],
        parents: &[ContentHash],
        kind: ArtifactKind,
        producer: Producer,
    ) -> Result<ArtifactHandle, WorkspaceError> {
        let handle = self.inner.store.put(content, parents, kind, producer).await?;
        self.inner.graph.add_artifact(handle.hash, &handle.parents)?;
        Ok(handle)
    }

    pub async fn get_artifact(&self, hash: &ContentHash) -> Result<Vec<u8>, WorkspaceError> {
        Ok(self.inner.store.get(hash).await?)
    }

    pub async fn artifact(&self, hash: &ContentHash) -> Result<ArtifactHandle, WorkspaceError> {
        Ok(self.inner.store.handle(hash).await?)
    }

    /// Records that produced `hash` or any of its ancestors, by sequence
    ///
    /// # Errors
    /// `Storage(NotFound)` if `hash` is not stored
    pub async fn list_provenance(
        &self,
        hash: &ContentHash,
    ) -> Result<Vec<InvocationRecord>, WorkspaceError> {
        let store = self.inner.store.as_ref();
        store.handle(hash).await?;
        let mut targets = vec![*hash];
        targets.extend(
            store
                .ancestors(*hash)
                .collect()
                .await?
                .into_iter()
                .map(|h| h.hash),
        );

        let mut by_seq = BTreeMap::new();
        for target in &targets {
            for record in self.inner.log.by_artifact(target).await? {
                if record.outputs.contains(target) {
                    by_seq.entry(record.seq).or_insert(record);
                }
            }
        }
        Ok(by_seq.into_values().collect())
    }

    /// Re-execute a recorded invocation without committing
    ///
    /// Runs the recorded capability at its exact recorded version.
    ///
    /// # Errors
    /// `NotReplayable` for user records and unsuccessful invocations; any
    /// error from reading inputs or running the plugin
    pub async fn replay(&self, record: &InvocationRecord) -> Result<ReplayReport, WorkspaceError> {
        let capability = match (record.plugin_id(), &record.capability) {
            (Some(_), Some(capability)) => capability.clone(),
            _ => {
                return Err(WorkspaceError::NotReplayable {
                    seq: record.seq,
                    reason: "not a plugin invocation".to_string(),
                })
            }
        };
        if !record.status.is_succeeded() {
            return Err(WorkspaceError::NotReplayable {
                seq: record.seq,
                reason: "only succeeded invocations are replayed".to_string(),
            });
        }

        let mut report = ReplayReport {
            seq: record.seq,
            invocation_id: record.invocation_id,
            capability,
            status: ReplayStatus::Exempt,
            recorded: record.outputs.clone(),
            recomputed: Vec::new(),
        };
        if !record.deterministic {
            tracing::debug!(seq = record.seq, capability = %report.capability, "replay exempt");
            return Ok(report);
        }

        let input = self.read_inputs(&record.inputs, record.params.clone()).await?;
        let lease = self
            .inner
            .runtime
            .dispatch(&report.capability.exact_request())?;
        let output = lease.invoke(input, CancelSignal::new()).await?;
        report.recomputed = output
            .artifacts
            .iter()
            .map(|a| artifact_hash(&a.content, &record.inputs))
            .collect();

        if report.recomputed == report.recorded {
            report.status = ReplayStatus::Reproduced;
        } else {
            report.status = ReplayStatus::Diverged;
            tracing::warn!(
                workspace = %self.inner.name,
                seq = record.seq,
                capability = %report.capability,
                "replay diverged from recorded outputs"
            );
        }
        Ok(report)
    }

    /// Replay every succeeded plugin record in sequence order
    ///
    /// # Errors
    /// Stops at the first record that cannot be replayed
    pub async fn verify_reproducibility(&self) -> Result<Vec<ReplayReport>, WorkspaceError> {
        let mut reports = Vec::new();
        for record in self.inner.log.records().await? {
            if record.plugin_id().is_none() || !record.status.is_succeeded() {
                continue;
            }
            reports.push(self.replay(&record).await?);
        }
        let diverged = reports
            .iter()
            .filter(|r| r.status == ReplayStatus::Diverged)
            .count();
        tracing::info!(
            workspace = %self.inner.name,
            replayed = reports.len(),
            diverged,
            "reproducibility check finished"
        );
        Ok(reports)
    }

    /// Drop stored artifacts not reachable from the workspace heads
    ///
    /// Stored artifacts the graph has not seen yet (an engine built with
    /// [`WorkspaceEngine::new`] over a populated store) are merged in first,
    /// so their heads stay live. Run while no invocations are in flight;
    /// artifacts committed during the pass are not protected.
    pub async fn collect_garbage(&self) -> Result<GcReport, WorkspaceError> {
        let handles = self.inner.store.list().await?;
        let adopted = self.inner.graph.absorb(&handles)?;
        if adopted > 0 {
            tracing::warn!(
                workspace = %self.inner.name,
                adopted,
                "stored artifacts were missing from the workspace graph"
            );
        }
        let heads = self.heads();
        self.collect_garbage_from(&heads).await
    }

    /// Keep only what `live_heads` and their ancestors reach
    pub async fn collect_garbage_from(
        &self,
        live_heads: &[ContentHash],
    ) -> Result<GcReport, WorkspaceError> {
        let report = self.inner.store.collect_garbage(live_heads).await?;
        for hash in &report.removed {
            self.inner.graph.remove(hash);
        }
        Ok(report)
    }
}

/// One caller's attachment to an execution
///
/// Dropping an attached waiter counts as abandonment.
struct Waiter {
    engine: WorkspaceEngine,
    key: CoalesceKey,
    execution: u64,
    shared: SharedExecution,
    attached: bool,
}

impl Waiter {
    /// Detach; cancels the execution with `reason` if this was the last
    /// caller, returning whether it did
    fn release(&mut self, reason: Option<CancelReason>) -> bool {
        if !std::mem::replace(&mut self.attached, false) {
            return false;
        }
        let mut table = self.engine.inner.inflight.lock();
        let Some(entry) = table.get_mut(&self.key) else {
            return false;
        };
        if entry.execution != self.execution {
            return false;
        }
        entry.waiters -= 1;
        if entry.waiters > 0 {
            return false;
        }
        let Some(reason) = reason else {
            return false;
        };
        entry.cancel.cancel(reason);
        table.remove(&self.key);
        tracing::debug!(reason = reason.as_str(), "cancelled execution with no remaining callers");
        true
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.release(Some(CancelReason::Abandoned));
    }
}
