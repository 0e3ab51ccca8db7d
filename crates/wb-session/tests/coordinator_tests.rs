use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wb_artifact::{ArtifactKind, FsArtifactStore};
use wb_capability::CapabilityRequest;
use wb_runtime::CancelReason;
use wb_session::*;
use wb_test_utils::*;
use wb_workspace::{FsInvocationLog, RecordStatus, WorkspaceEngine};

fn request(s: &str) -> CapabilityRequest {
    CapabilityRequest::parse(s).unwrap()
}

#[tokio::test]
async fn test_attach_rejects_duplicate_names() {
    let rt = runtime();
    let session = SessionCoordinator::new(SessionConfig::default());
    session.attach(memory_engine("alpha", &rt)).unwrap();
    session.attach(memory_engine("beta", &rt)).unwrap();

    let err = session.attach(memory_engine("alpha", &rt)).unwrap_err();
    assert!(matches!(err, SessionError::WorkspaceExists(ref id) if id == "alpha"));
    assert_eq!(session.workspaces(), vec!["alpha".to_string(), "beta".to_string()]);

    session.detach("alpha").unwrap();
    assert_eq!(session.detach("alpha").unwrap_err().kind(), "not_found");
    assert_eq!(session.workspaces(), vec!["beta".to_string()]);
}

#[tokio::test]
async fn test_invoke_routes_to_workspace() {
    let rt = runtime();
    install(&rt, EchoPlugin::new("echo", descriptor("echo", "1.2.0")));
    let session = SessionCoordinator::new(SessionConfig::default());
    let engine = memory_engine("ws", &rt);
    let root = engine.add_root(ArtifactKind::Code, "abc").await.unwrap();
    session.attach(engine).unwrap();

    let response = session
        .invoke("ws", &request("echo@^1"), &[root.hash], None)
        .await
        .unwrap();
    assert_eq!(response.capability, "echo@1.2.0");
    assert_eq!(response.plugin_id, "echo");
    assert_eq!(response.outputs.len(), 1);

    let (handle, content) = session.get_artifact("ws", &response.outputs[0]).await.unwrap();
    assert_eq!(content, b"ABC".to_vec());
    assert_eq!(handle.parents, vec![root.hash]);

    let records = session.list_provenance("ws", &response.outputs[0]).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].seq, response.seq);
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_cancels_and_records() {
    let rt = runtime();
    install(
        &rt,
        EchoPlugin::new("slow", descriptor("slow", "1.0.0")).with_delay(Duration::from_secs(5)),
    );
    let session = SessionCoordinator::new(
        SessionConfig::default().with_request_timeout(Duration::from_millis(50)),
    );
    let engine = memory_engine("ws", &rt);
    session.attach(engine.clone()).unwrap();

    let err = session
        .invoke("ws", &request("slow"), &[], None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "cancelled");

    // Settled before the response: the record is already there.
    let records = engine.log().records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].status,
        RecordStatus::Cancelled {
            reason: CancelReason::Timeout
        }
    );
    assert!(engine.store().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_handle_translates_errors() {
    let rt = runtime();
    install(&rt, FailingPlugin::recoverable(descriptor("lint", "1.0.0")));
    let session = SessionCoordinator::new(SessionConfig::default());
    session.attach(memory_engine("ws", &rt)).unwrap();

    let unknown_ws = session
        .handle(Request::Invoke {
            workspace: "nope".into(),
            capability: "lint".into(),
            inputs: vec![],
            params: None,
        })
        .await;
    assert_eq!(unknown_ws.error_kind(), Some("not_found"));

    let failed = session
        .handle(Request::Invoke {
            workspace: "ws".into(),
            capability: "lint".into(),
            inputs: vec![],
            params: None,
        })
        .await;
    assert_eq!(failed.error_kind(), Some("invocation_error"));

    let bad_range = session
        .handle(Request::Invoke {
            workspace: "ws".into(),
            capability: "lint@>>1".into(),
            inputs: vec![],
            params: None,
        })
        .await;
    assert_eq!(bad_range.error_kind(), Some("schema_error"));

    let missing = session
        .handle(Request::GetArtifact {
            workspace: "ws".into(),
            hash: wb_artifact::ContentHash::compute(b"ghost"),
        })
        .await;
    assert_eq!(missing.error_kind(), Some("not_found"));
}

#[tokio::test]
async fn test_invalid_params_are_schema_errors() {
    let rt = runtime();
    install(&rt, EchoPlugin::new("echo", descriptor("echo", "1.0.0")));
    let session = SessionCoordinator::new(SessionConfig::default());
    session.attach(memory_engine("ws", &rt)).unwrap();

    let response = session
        .handle(Request::Invoke {
            workspace: "ws".into(),
            capability: "echo".into(),
            inputs: vec![],
            params: Some(json!({ "text": 42 })),
        })
        .await;
    assert_eq!(response.error_kind(), Some("schema_error"));
}

#[tokio::test]
async fn test_json_round_trip() {
    let rt = runtime();
    install(&rt, ModelStubPlugin);
    let session = SessionCoordinator::new(SessionConfig::default());
    session.attach(memory_engine("ws", &rt)).unwrap();

    let reply = session
        .handle_json(
            r#"{"op":"invoke","workspace":"ws","capability":"query-model@^1","params":{"prompt":"hi"}}"#,
        )
        .await;
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["status"], "invoked");
    assert_eq!(reply["plugin_id"], "model-stub");
    assert_eq!(reply["response"]["completion"], "echo: hi");

    let output = reply["outputs"][0].as_str().unwrap().to_string();
    let reply = session
        .handle_json(&format!(
            r#"{{"op":"get_artifact","workspace":"ws","hash":"{output}"}}"#
        ))
        .await;
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["status"], "artifact");
    assert_eq!(reply["content_hex"], hex_of("echo: hi"));

    let reply = session.handle_json("{not json").await;
    let reply: Response = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply.error_kind(), Some("schema_error"));
}

fn hex_of(s: &str) -> String {
    s.bytes().map(|b| format!("{b:02x}")).collect()
}

#[tokio::test]
async fn test_provenance_response_lists_records_in_order() {
    let rt = runtime();
    install(&rt, EchoPlugin::new("echo", descriptor("echo", "1.0.0")));
    let session = SessionCoordinator::new(SessionConfig::default());
    let engine = memory_engine("ws", &rt);
    let root = engine.add_root(ArtifactKind::Data, "x").await.unwrap();
    session.attach(engine).unwrap();

    let first = session
        .invoke("ws", &request("echo"), &[root.hash], None)
        .await
        .unwrap();
    let second = session
        .invoke("ws", &request("echo"), &first.outputs, Some(json!({ "text": "y" })))
        .await
        .unwrap();

    match session
        .handle(Request::ListProvenance {
            workspace: "ws".into(),
            hash: second.outputs[0],
        })
        .await
    {
        Response::Provenance { records } => {
            let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
            assert_eq!(seqs, vec![first.seq, second.seq]);
        }
        other => panic!("unexpected response {other:?}"),
    }
}

async fn fs_engine(config: &WorkbenchConfig, rt: &wb_runtime::Runtime) -> WorkspaceEngine {
    let store = FsArtifactStore::with_config(config.store.clone()).await.unwrap();
    let log = FsInvocationLog::open(&config.engine.log_root).await.unwrap();
    WorkspaceEngine::open(
        config.workspace.clone(),
        Arc::new(store),
        Arc::new(log),
        rt.clone(),
        config.engine.clone(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_config_file_workspace_survives_reattach() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workbench.toml");
    std::fs::write(&path, "workspace = \"notes\"\n\n[session]\nrequest_timeout_ms = 5000\n").unwrap();
    let config = WorkbenchConfig::from_file(&path).unwrap().rooted_at(dir.path());
    assert_eq!(config.session.request_timeout(), Duration::from_secs(5));

    let rt = runtime();
    install(&rt, EchoPlugin::new("echo", descriptor("echo", "1.0.0")));
    let session = SessionCoordinator::new(config.session.clone());
    let engine = fs_engine(&config, &rt).await;
    let root = engine.add_root(ArtifactKind::Code, "abc").await.unwrap();
    session.attach(engine).unwrap();
    let first = session
        .invoke("notes", &request("echo"), &[root.hash], None)
        .await
        .unwrap();

    drop(session.detach("notes").unwrap());
    session.attach(fs_engine(&config, &rt).await).unwrap();

    let (handle, content) = session.get_artifact("notes", &first.outputs[0]).await.unwrap();
    assert_eq!(content, b"ABC".to_vec());
    assert_eq!(handle.parents, vec![root.hash]);
    let records = session.list_provenance("notes", &first.outputs[0]).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].seq, first.seq);
}
