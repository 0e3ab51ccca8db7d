//! Session coordinator
//!
//! Binds external requests to workspace engines and enforces request
//! deadlines on top of the runtime's own call timeouts.

use crate::config::SessionConfig;
use crate::error::{ExternalError, SessionError};
use crate::protocol::{InvokeResponse, Request, Response};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use wb_artifact::{ArtifactHandle, ContentHash};
use wb_capability::CapabilityRequest;
use wb_runtime::{CancelReason, CancelSignal};
use wb_workspace::{InvocationRecord, InvokeRequest, WorkspaceEngine};

/// Routes requests to attached workspaces by id
#[derive(Debug, Default)]
pub struct SessionCoordinator {
    engines: DashMap<String, WorkspaceEngine>,
    config: SessionConfig,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            engines: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Attach an engine under its workspace name
    ///
    /// # Errors
    /// `WorkspaceExists` if the name is taken
    pub fn attach(&self, engine: WorkspaceEngine) -> Result<(), SessionError> {
        match self.engines.entry(engine.name().to_string()) {
            Entry::Occupied(e) => Err(SessionError::WorkspaceExists(e.key().clone())),
            Entry::Vacant(e) => {
                tracing::info!(workspace = %e.key(), "attached workspace");
                e.insert(engine);
                Ok(())
            }
        }
    }

    /// Detach and hand back the engine; in-flight calls keep running
    pub fn detach(&self, workspace: &str) -> Result<WorkspaceEngine, SessionError> {
        let (_, engine) = self
            .engines
            .remove(workspace)
            .ok_or_else(|| SessionError::WorkspaceNotFound(workspace.to_string()))?;
        tracing::info!(workspace, "detached workspace");
        Ok(engine)
    }

    pub fn engine(&self, workspace: &str) -> Result<WorkspaceEngine, SessionError> {
        self.engines
            .get(workspace)
            .map(|e| e.value().clone())
            .ok_or_else(|| SessionError::WorkspaceNotFound(workspace.to_string()))
    }

    /// Attached workspace ids, sorted
    #[must_use]
    pub fn workspaces(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Invoke under the request deadline
    ///
    /// On expiry the engine is told to cancel with reason `timeout` and is
    /// awaited until it settles, so the `cancelled` record exists by the
    /// time this returns. If the engine finishes first, its result stands.
    pub async fn invoke(
        &self,
        workspace: &str,
        capability: &CapabilityRequest,
        inputs: &[ContentHash],
        params: Option<Value>,
    ) -> Result<InvokeResponse, SessionError> {
        let engine = self.engine(workspace)?;
        let mut request = InvokeRequest::new(capability.clone(), inputs.to_vec());
        if let Some(params) = params {
            request = request.with_params(params);
        }

        let cancel = CancelSignal::new();
        let call = engine.invoke_with(request, cancel.clone());
        tokio::pin!(call);
        let result = tokio::select! {
            result = &mut call => result,
            () = tokio::time::sleep(self.config.request_timeout()) => {
                tracing::debug!(workspace, capability = %capability, "request deadline reached");
                cancel.cancel(CancelReason::Timeout);
                call.await
            }
        };
        Ok(result?.into())
    }

    pub async fn get_artifact(
        &self,
        workspace: &str,
        hash: &ContentHash,
    ) -> Result<(ArtifactHandle, Vec<u8>), SessionError> {
        let engine = self.engine(workspace)?;
        let handle = engine.artifact(hash).await?;
        let content = engine.get_artifact(hash).await?;
        Ok((handle, content))
    }

    pub async fn list_provenance(
        &self,
        workspace: &str,
        hash: &ContentHash,
    ) -> Result<Vec<InvocationRecord>, SessionError> {
        Ok(self.engine(workspace)?.list_provenance(hash).await?)
    }

    /// Serve one external request; failures become `Response::Error`
    pub async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Invoke {
                workspace,
                capability,
                inputs,
                params,
            } => match CapabilityRequest::parse(&capability) {
                Ok(capability) => self
                    .invoke(&workspace, &capability, &inputs, params)
                    .await
                    .map(Response::Invoked),
                Err(e) => Err(SessionError::InvalidRequest(e.to_string())),
            },
            Request::GetArtifact { workspace, hash } => self
                .get_artifact(&workspace, &hash)
                .await
                .map(|(handle, content)| Response::Artifact {
                    handle,
                    content_hex: hex::encode(content),
                }),
            Request::ListProvenance { workspace, hash } => self
                .list_provenance(&workspace, &hash)
                .await
                .map(|records| Response::Provenance { records }),
        };
        result.unwrap_or_else(|e| {
            tracing::debug!(error_kind = e.kind(), error = %e, "request failed");
            Response::Error(ExternalError::from(&e))
        })
    }

    /// Parse a JSON request, serve it, and render the JSON response
    pub async fn handle_json(&self, request: &str) -> String {
        let response = match serde_json::from_str::<Request>(request) {
            Ok(request) => self.handle(request).await,
            Err(e) => Response::Error(ExternalError::from(&SessionError::InvalidRequest(
                e.to_string(),
            ))),
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            serde_json::json!({
                "status": "error",
                "error_kind": "internal",
                "message": e.to_string(),
            })
            .to_string()
        })
    }
}
