//! Fixture plugins

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wb_artifact::ArtifactKind;
use wb_capability::{
    query_model_descriptor, CapabilityDescriptor, CapabilityRequest, QueryModelParams,
    QueryModelResponse, Version,
};
use wb_runtime::{
    InvocationContext, Plugin, PluginError, PluginInput, PluginManifest, PluginOutput,
    SandboxPolicy,
};

fn manifest(id: &str, descriptor: &CapabilityDescriptor, sandbox: &SandboxPolicy) -> PluginManifest {
    PluginManifest::new(id, Version::new(1, 0, 0))
        .provides(descriptor.clone())
        .with_sandbox(sandbox.clone())
}

/// Uppercases its inputs (or `params.text`) into one `data` artifact
///
/// Deterministic. Counts calls; optionally sleeps before answering.
pub struct EchoPlugin {
    id: String,
    descriptor: CapabilityDescriptor,
    sandbox: SandboxPolicy,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl EchoPlugin {
    pub fn new(id: &str, descriptor: CapabilityDescriptor) -> Self {
        Self {
            id: id.to_string(),
            descriptor,
            sandbox: SandboxPolicy::default(),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxPolicy) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Shared call counter
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait::async_trait]
impl Plugin for EchoPlugin {
    fn manifest(&self) -> PluginManifest {
        manifest(&self.id, &self.descriptor, &self.sandbox)
    }

    async fn invoke(
        &self,
        ctx: InvocationContext,
        input: PluginInput,
    ) -> Result<PluginOutput, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ctx.checkpoint()?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
            ctx.checkpoint()?;
        }

        let mut text = String::new();
        for artifact in &input.artifacts {
            text.push_str(&String::from_utf8_lossy(&artifact.content));
        }
        if let Some(extra) = input.params.get("text").and_then(|v| v.as_str()) {
            text.push_str(extra);
        }
        Ok(PluginOutput::new(json!({ "length": text.len() }))
            .with_artifact(ArtifactKind::Data, text.to_uppercase()))
    }
}

/// Finishes its work on a detached task, ignoring cancellation
///
/// `finished()` counts work that ran to completion even after the caller
/// gave up.
pub struct StubbornPlugin {
    descriptor: CapabilityDescriptor,
    sandbox: SandboxPolicy,
    work: Duration,
    finished: Arc<AtomicUsize>,
}

impl StubbornPlugin {
    pub fn new(descriptor: CapabilityDescriptor, work: Duration) -> Self {
        Self {
            descriptor,
            sandbox: SandboxPolicy::default(),
            work,
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxPolicy) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn finished(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.finished)
    }
}

#[async_trait::async_trait]
impl Plugin for StubbornPlugin {
    fn manifest(&self) -> PluginManifest {
        manifest("stubborn", &self.descriptor, &self.sandbox)
    }

    async fn invoke(
        &self,
        _ctx: InvocationContext,
        _input: PluginInput,
    ) -> Result<PluginOutput, PluginError> {
        let work = self.work;
        let finished = Arc::clone(&self.finished);
        let task = tokio::spawn(async move {
            tokio::time::sleep(work).await;
            finished.fetch_add(1, Ordering::SeqCst);
        });
        task.await.map_err(|e| PluginError::failed(e.to_string()))?;
        Ok(PluginOutput::new(json!({})).with_artifact(ArtifactKind::Log, "late result"))
    }
}

/// Produces random content on every call
pub struct RandomPlugin {
    descriptor: CapabilityDescriptor,
}

impl RandomPlugin {
    pub fn new(descriptor: CapabilityDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait::async_trait]
impl Plugin for RandomPlugin {
    fn manifest(&self) -> PluginManifest {
        manifest("random", &self.descriptor, &SandboxPolicy::default())
    }

    async fn invoke(
        &self,
        _ctx: InvocationContext,
        _input: PluginInput,
    ) -> Result<PluginOutput, PluginError> {
        let sample: u64 = rand::random();
        Ok(PluginOutput::new(json!({ "sample": sample }))
            .with_artifact(ArtifactKind::ModelOutput, sample.to_string()))
    }
}

/// Always fails; fatally if `fatal`
pub struct FailingPlugin {
    descriptor: CapabilityDescriptor,
    fatal: bool,
}

impl FailingPlugin {
    pub fn recoverable(descriptor: CapabilityDescriptor) -> Self {
        Self {
            descriptor,
            fatal: false,
        }
    }

    pub fn fatal(descriptor: CapabilityDescriptor) -> Self {
        Self {
            descriptor,
            fatal: true,
        }
    }
}

#[async_trait::async_trait]
impl Plugin for FailingPlugin {
    fn manifest(&self) -> PluginManifest {
        manifest("failing", &self.descriptor, &SandboxPolicy::default())
    }

    async fn invoke(
        &self,
        _ctx: InvocationContext,
        _input: PluginInput,
    ) -> Result<PluginOutput, PluginError> {
        if self.fatal {
            Err(PluginError::fatal("corrupted internal state"))
        } else {
            Err(PluginError::failed("input rejected"))
        }
    }
}

/// Load hook always fails
pub struct BrokenLoadPlugin {
    descriptor: CapabilityDescriptor,
    loads: Arc<AtomicUsize>,
}

impl BrokenLoadPlugin {
    pub fn new(descriptor: CapabilityDescriptor) -> Self {
        Self {
            descriptor,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of times the load hook ran
    pub fn loads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.loads)
    }
}

#[async_trait::async_trait]
impl Plugin for BrokenLoadPlugin {
    fn manifest(&self) -> PluginManifest {
        manifest("broken-load", &self.descriptor, &SandboxPolicy::default())
    }

    async fn load(&self) -> Result<(), PluginError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Err(PluginError::failed("toolchain not found"))
    }

    async fn invoke(
        &self,
        _ctx: InvocationContext,
        _input: PluginInput,
    ) -> Result<PluginOutput, PluginError> {
        Err(PluginError::failed("never loaded"))
    }
}

/// Forwards its input to another capability through the runtime
pub struct DelegatingPlugin {
    id: String,
    descriptor: CapabilityDescriptor,
    target: CapabilityRequest,
    sandbox: SandboxPolicy,
    requires: Vec<CapabilityRequest>,
}

impl DelegatingPlugin {
    pub fn new(id: &str, descriptor: CapabilityDescriptor, target: CapabilityRequest) -> Self {
        Self {
            id: id.to_string(),
            descriptor,
            target,
            sandbox: SandboxPolicy::default(),
            requires: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxPolicy) -> Self {
        self.sandbox = sandbox;
        self
    }

    #[must_use]
    pub fn requiring(mut self, request: CapabilityRequest) -> Self {
        self.requires.push(request);
        self
    }
}

#[async_trait::async_trait]
impl Plugin for DelegatingPlugin {
    fn manifest(&self) -> PluginManifest {
        let mut manifest = manifest(&self.id, &self.descriptor, &self.sandbox);
        manifest.requires.clone_from(&self.requires);
        manifest
    }

    async fn invoke(
        &self,
        ctx: InvocationContext,
        input: PluginInput,
    ) -> Result<PluginOutput, PluginError> {
        let output = ctx.call(self.target.clone(), input).await?;
        Ok(output)
    }
}

/// Stand-in model backend for `query-model`
pub struct ModelStubPlugin;

#[async_trait::async_trait]
impl Plugin for ModelStubPlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new("model-stub", Version::new(0, 1, 0))
            .provides(query_model_descriptor())
            .with_sandbox(SandboxPolicy::default().with_network(true))
    }

    async fn invoke(
        &self,
        _ctx: InvocationContext,
        input: PluginInput,
    ) -> Result<PluginOutput, PluginError> {
        let params: QueryModelParams = serde_json::from_value(input.params)
            .map_err(|e| PluginError::failed(e.to_string()))?;
        let response = QueryModelResponse {
            completion: format!("echo: {}", params.prompt),
            rationale: Some(format!("{} context artifacts", params.context_artifacts.len())),
        };
        let completion = response.completion.clone();
        let response =
            serde_json::to_value(response).map_err(|e| PluginError::failed(e.to_string()))?;
        Ok(PluginOutput::new(response).with_artifact(ArtifactKind::ModelOutput, completion))
    }
}
