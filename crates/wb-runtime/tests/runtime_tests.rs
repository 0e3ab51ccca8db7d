use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use wb_capability::{CapabilityDescriptor, CapabilityRequest, Version};
use wb_runtime::*;
use wb_test_utils::*;

fn request(s: &str) -> CapabilityRequest {
    CapabilityRequest::parse(s).unwrap()
}

fn any_state() -> impl Strategy<Value = InstanceState> {
    prop_oneof![
        Just(InstanceState::Registered),
        Just(InstanceState::Loading),
        Just(InstanceState::Ready),
        Just(InstanceState::Invoking),
        Just(InstanceState::Faulted),
        Just(InstanceState::Unloading),
        Just(InstanceState::Terminated),
    ]
}

proptest! {
    #[test]
    fn prop_only_listed_transitions_are_allowed(from in any_state(), to in any_state()) {
        let allowed = allowed_transitions(from);
        match validate_transition(from, to) {
            Ok(()) => prop_assert!(allowed.contains(&to)),
            Err(RuntimeError::IllegalTransition { from: f, to: t }) => {
                prop_assert!(!allowed.contains(&to));
                prop_assert_eq!((f, t), (from, to));
            }
            Err(other) => prop_assert!(false, "unexpected error {}", other),
        }
    }
}

#[tokio::test]
async fn test_dispatch_prefers_highest_ready_version() {
    let rt = runtime();
    install(&rt, EchoPlugin::new("lint-old", descriptor("lint", "0.9.0")));
    install(&rt, EchoPlugin::new("lint-new", descriptor("lint", "1.0.0")));

    let lease = rt.dispatch(&request("lint@>=0.9")).unwrap();
    assert_eq!(lease.descriptor().version, Version::new(1, 0, 0));
    assert_eq!(lease.plugin_id(), "lint-new");
    drop(lease);

    let lease = rt.dispatch(&request("lint@<1")).unwrap();
    assert_eq!(lease.plugin_id(), "lint-old");
}

#[tokio::test]
async fn test_dispatch_unknown_capability_is_not_found() {
    let rt = runtime();
    let err = rt.dispatch(&request("missing")).unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_spread_across_instances() {
    let rt = runtime();
    let a = install(
        &rt,
        EchoPlugin::new("exec-a", descriptor("execute-code", "1.0.0"))
            .with_delay(Duration::from_millis(50)),
    );
    let b = install(
        &rt,
        EchoPlugin::new("exec-b", descriptor("execute-code", "1.0.0"))
            .with_delay(Duration::from_millis(50)),
    );
    rt.activate(a).await.unwrap();
    rt.activate(b).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..10 {
        let rt = rt.clone();
        tasks.push(tokio::spawn(async move {
            let lease = rt.dispatch(&request("execute-code@1.0")).unwrap();
            lease
                .invoke(PluginInput::new(text_params(&format!("job {i}"))), CancelSignal::new())
                .await
                .unwrap()
        }));
    }
    let mut contents = std::collections::HashSet::new();
    for task in tasks {
        let output = task.await.unwrap();
        contents.insert(output.artifacts[0].content.clone());
    }
    assert_eq!(contents.len(), 10);

    let infos = rt.instances();
    assert_eq!(infos.iter().map(|i| i.completed).sum::<u64>(), 10);
    assert!(infos.iter().all(|i| i.completed <= 6), "{infos:?}");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_and_discards_late_work() {
    let rt = runtime();
    let plugin = StubbornPlugin::new(descriptor("build", "1.0.0"), Duration::from_millis(200))
        .with_sandbox(
            SandboxPolicy::default()
                .with_limits(ResourceLimits::default().with_call_timeout(Duration::from_millis(50))),
        );
    let finished = plugin.finished();
    let id = install(&rt, plugin);

    let lease = rt.dispatch(&request("build")).unwrap();
    let err = lease
        .invoke(PluginInput::new(json!({})), CancelSignal::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Cancelled(CancelReason::Timeout)));
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(rt.state(id).unwrap(), InstanceState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_signal_stops_call() {
    let rt = runtime();
    install(
        &rt,
        EchoPlugin::new("slow", descriptor("slow", "1.0.0")).with_delay(Duration::from_secs(5)),
    );
    let cancel = CancelSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel(CancelReason::Requested);
    });

    let lease = rt.dispatch(&request("slow")).unwrap();
    let err = lease.invoke(PluginInput::new(json!({})), cancel).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Cancelled(CancelReason::Requested)));
}

#[tokio::test]
async fn test_missing_dependency_faults_without_retry() {
    let rt = runtime();
    let id = install(
        &rt,
        DelegatingPlugin::new("needs-db", descriptor("query", "1.0.0"), request("db"))
            .requiring(request("db@^1")),
    );

    let err = rt.activate(id).await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::PluginLoad { reason: LoadFailure::MissingDependency(_), .. }
    ));
    assert_eq!(rt.state(id).unwrap(), InstanceState::Faulted);

    // Faulted instances are out of dispatch.
    assert!(matches!(
        rt.dispatch(&request("query")).unwrap_err(),
        RuntimeError::NoInstance { .. }
    ));
}

#[tokio::test]
async fn test_load_hook_failure_is_not_retried() {
    let rt = runtime();
    let plugin = BrokenLoadPlugin::new(descriptor("analyze", "1.0.0"));
    let loads = plugin.loads();
    let id = install(&rt, plugin);

    assert_eq!(rt.activate(id).await.unwrap_err().kind(), "plugin_load_error");
    assert_eq!(rt.activate(id).await.unwrap_err().kind(), "plugin_load_error");
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(rt.state(id).unwrap(), InstanceState::Faulted);
}

#[tokio::test]
async fn test_schema_mismatch_faults_on_load() {
    let rt = runtime();
    rt.registry()
        .register(descriptor("lint", "1.0.0"))
        .unwrap();
    let drifted = descriptor("lint", "1.0.0").with_output_schema(json!({ "type": "string" }));
    let id = rt.register(Arc::new(EchoPlugin::new("lint", drifted)));

    let err = rt.activate(id).await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::PluginLoad { reason: LoadFailure::SchemaMismatch { .. }, .. }
    ));
    assert_eq!(rt.state(id).unwrap(), InstanceState::Faulted);
}

#[tokio::test]
async fn test_resource_limit_denial_faults_on_load() {
    let rt = runtime_with(RuntimeConfig::default().with_max_concurrency(2));
    let id = install(
        &rt,
        EchoPlugin::new("greedy", descriptor("greedy", "1.0.0")).with_sandbox(
            SandboxPolicy::default().with_limits(ResourceLimits::default().with_max_concurrency(8)),
        ),
    );

    let err = rt.activate(id).await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::PluginLoad { reason: LoadFailure::LimitDenied(_), .. }
    ));
    assert_eq!(rt.available_slots(), RuntimeConfig::default().total_concurrency);
}

#[tokio::test]
async fn test_undeclared_inter_plugin_call_faults_caller() {
    let rt = runtime();
    install(&rt, EchoPlugin::new("format", descriptor("format", "1.0.0")));
    let caller = install(
        &rt,
        DelegatingPlugin::new("refactor", descriptor("refactor", "1.0.0"), request("format")),
    );

    let lease = rt.dispatch(&request("refactor")).unwrap();
    let err = lease
        .invoke(PluginInput::new(text_params("x")), CancelSignal::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Faulted { reason: FaultReason::SandboxViolation(_), .. }
    ));
    assert_eq!(rt.state(caller).unwrap(), InstanceState::Faulted);
}

#[tokio::test]
async fn test_declared_inter_plugin_call_succeeds() {
    let rt = runtime();
    install(&rt, EchoPlugin::new("format", descriptor("format", "1.0.0")));
    install(
        &rt,
        DelegatingPlugin::new("refactor", descriptor("refactor", "1.0.0"), request("format"))
            .with_sandbox(SandboxPolicy::default().allow_call("format")),
    );

    let lease = rt.dispatch(&request("refactor")).unwrap();
    let output = lease
        .invoke(PluginInput::new(text_params("tidy")), CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(output.artifacts[0].content, b"TIDY");
}

#[tokio::test]
async fn test_call_depth_is_bounded() {
    let rt = runtime_with(RuntimeConfig::default().with_max_call_depth(3));
    let id = install(
        &rt,
        DelegatingPlugin::new("recurse", reentrant("recurse", "1.0.0"), request("recurse"))
            .with_sandbox(SandboxPolicy::default().allow_call("recurse")),
    );

    let lease = rt.dispatch(&request("recurse")).unwrap();
    let err = lease
        .invoke(PluginInput::new(json!({})), CancelSignal::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Faulted { reason: FaultReason::ResourceExhausted(_), .. }
    ));
    assert_eq!(rt.state(id).unwrap(), InstanceState::Faulted);
}

#[tokio::test]
async fn test_fatal_error_faults_and_recoverable_does_not() {
    let rt = runtime();
    let fatal = install(&rt, FailingPlugin::fatal(descriptor("crash", "1.0.0")));
    let soft = install(&rt, FailingPlugin::recoverable(descriptor("reject", "1.0.0")));

    let err = rt
        .dispatch(&request("crash"))
        .unwrap()
        .invoke(PluginInput::new(json!({})), CancelSignal::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "faulted");
    assert_eq!(rt.state(fatal).unwrap(), InstanceState::Faulted);

    let err = rt
        .dispatch(&request("reject"))
        .unwrap()
        .invoke(PluginInput::new(json!({})), CancelSignal::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invocation_error");
    assert_eq!(rt.state(soft).unwrap(), InstanceState::Ready);
}

#[tokio::test]
async fn test_oversized_output_faults() {
    let rt = runtime();
    let id = install(
        &rt,
        EchoPlugin::new("chatty", descriptor("chatty", "1.0.0")).with_sandbox(
            SandboxPolicy::default().with_limits(ResourceLimits::default().with_max_output_bytes(16)),
        ),
    );
    let err = rt
        .dispatch(&request("chatty"))
        .unwrap()
        .invoke(
            PluginInput::new(text_params("this text is far too long for the limit")),
            CancelSignal::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Faulted { reason: FaultReason::ResourceExhausted(_), .. }
    ));
    assert_eq!(rt.state(id).unwrap(), InstanceState::Faulted);
}

#[tokio::test]
async fn test_invalid_params_are_schema_errors() {
    let rt = runtime();
    let id = install(&rt, EchoPlugin::new("echo", descriptor("echo", "1.0.0")));
    let err = rt
        .dispatch(&request("echo"))
        .unwrap()
        .invoke(PluginInput::new(json!({ "text": 42 })), CancelSignal::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "schema_error");
    assert_eq!(rt.state(id).unwrap(), InstanceState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_non_reentrant_calls_are_serialized() {
    let rt = runtime();
    install(
        &rt,
        EchoPlugin::new("serial", descriptor("serial", "1.0.0"))
            .with_delay(Duration::from_millis(30)),
    );
    install(
        &rt,
        EchoPlugin::new("parallel", reentrant("parallel", "1.0.0"))
            .with_delay(Duration::from_millis(30)),
    );

    for (capability, expected_ms) in [("serial", 90), ("parallel", 30)] {
        let started = tokio::time::Instant::now();
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let lease = rt.dispatch(&request(capability)).unwrap();
            tasks.push(tokio::spawn(
                lease.invoke(PluginInput::new(json!({})), CancelSignal::new()),
            ));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(expected_ms)
                && elapsed < Duration::from_millis(expected_ms + 30),
            "{capability}: {elapsed:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_reentrant_calls_are_bounded_by_max_concurrency() {
    let rt = runtime();
    let plugin = EchoPlugin::new("pair", reentrant("pair", "1.0.0"))
        .with_delay(Duration::from_millis(30))
        .with_sandbox(
            SandboxPolicy::default().with_limits(ResourceLimits::default().with_max_concurrency(2)),
        );
    let calls = plugin.calls();
    install(&rt, plugin);

    let started = tokio::time::Instant::now();
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let lease = rt.dispatch(&request("pair")).unwrap();
        tasks.push(tokio::spawn(
            lease.invoke(PluginInput::new(json!({})), CancelSignal::new()),
        ));
    }

    // Two run at once; the others wait for a permit.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(60) && elapsed < Duration::from_millis(90),
        "{elapsed:?}"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_unload_releases_sandbox_and_reload_recovers() {
    let rt = runtime();
    let total = rt.config().total_concurrency;
    let first = install(&rt, FailingPlugin::fatal(descriptor("flaky", "1.0.0")));

    rt.activate(first).await.unwrap();
    assert!(rt.available_slots() < total);
    let _ = rt
        .dispatch(&request("flaky"))
        .unwrap()
        .invoke(PluginInput::new(json!({})), CancelSignal::new())
        .await;
    assert_eq!(rt.state(first).unwrap(), InstanceState::Faulted);

    let second = rt.reload("failing").await.unwrap();
    assert_ne!(first, second);
    assert_eq!(rt.state(first).unwrap(), InstanceState::Terminated);
    assert_eq!(rt.state(second).unwrap(), InstanceState::Ready);

    rt.unload(second).await.unwrap();
    assert_eq!(rt.state(second).unwrap(), InstanceState::Terminated);
    assert_eq!(rt.available_slots(), total);
}

#[tokio::test]
async fn test_unload_registered_instance_is_illegal() {
    let rt = runtime();
    let id = install(&rt, EchoPlugin::new("idle", descriptor("idle", "1.0.0")));
    assert!(matches!(
        rt.unload(id).await.unwrap_err(),
        RuntimeError::IllegalTransition { .. }
    ));
}

#[tokio::test]
async fn test_query_model_boundary() {
    let rt = runtime();
    install(&rt, ModelStubPlugin);
    let output = rt
        .dispatch(&request("query-model@^1"))
        .unwrap()
        .invoke(
            PluginInput::new(json!({ "prompt": "explain", "context_artifacts": [] })),
            CancelSignal::new(),
        )
        .await
        .unwrap();
    assert_eq!(output.response["completion"], "echo: explain");

    let info = &rt.instances()[0];
    assert!(info.sandbox.network);
    assert_eq!(info.capabilities, vec!["query-model@1.0.0".to_string()]);
}

#[test]
fn test_manifest_serializes_versions_as_strings() {
    let descriptor: CapabilityDescriptor = descriptor("lint", "1.0.0");
    let manifest = PluginManifest::new("lint", Version::new(1, 0, 0)).provides(descriptor);
    let json = serde_json::to_value(&manifest).unwrap();
    assert_eq!(json["provides"][0]["version"], "1.0.0");
}
