//! Coordinator Integration Tests
//!
//! Worker selection, dispatch and bookkeeping through the public registry
//! and coordinator API.

use futures_util::future::join_all;
use quizsmith_agent::registry::{handler, CapabilityHandler, HandlerTable};
use quizsmith_agent::{
    AgentRegistry, CoordinatorConfig, FailureKind, TaskCoordinator, TaskRequest,
    WorkerDescriptor, WorkerStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn register(registry: &AgentRegistry, id: &str, caps: &[&str], h: CapabilityHandler) {
    let mut descriptor = WorkerDescriptor::new(id, id);
    let mut handlers = HandlerTable::new();
    for cap in caps {
        descriptor = descriptor.with_capability(cap, json!({ "type": "object" }));
        handlers.insert(cap.to_string(), h.clone());
    }
    registry.register(descriptor, handlers).unwrap();
}

fn slow_echo(tag: &'static str, delay: Duration) -> CapabilityHandler {
    handler(move |params| async move {
        tokio::time::sleep(delay).await;
        Ok(json!({ "by": tag, "params": params }))
    })
}

fn failing() -> CapabilityHandler {
    handler(|_| async { Err(anyhow::anyhow!("model refused")) })
}

fn setup() -> (Arc<AgentRegistry>, Arc<TaskCoordinator>) {
    let registry = Arc::new(AgentRegistry::new());
    let coordinator = Arc::new(TaskCoordinator::new(
        registry.clone(),
        CoordinatorConfig::default(),
    ));
    (registry, coordinator)
}

#[tokio::test]
async fn test_concurrent_submissions_settle_cleanly() {
    let (registry, coordinator) = setup();
    register(&registry, "a", &["generate_quiz"], slow_echo("a", Duration::from_millis(5)));
    register(&registry, "b", &["generate_quiz"], slow_echo("b", Duration::from_millis(5)));

    let tasks = (0..10).map(|i| {
        let coordinator = coordinator.clone();
        async move {
            coordinator
                .submit(TaskRequest::new("generate_quiz", json!({ "n": i })))
                .await
        }
    });
    let results = join_all(tasks).await;

    assert!(results.iter().all(|r| r.success));
    assert!(coordinator.in_flight().is_empty());
    assert_eq!(coordinator.history(None).len(), 10);

    let completed: u64 = registry
        .list()
        .iter()
        .map(|w| {
            assert_eq!(w.status, WorkerStatus::Active);
            assert!(w.current_task_ids.is_empty());
            w.performance.completed_count
        })
        .sum();
    assert_eq!(completed, 10);
}

#[tokio::test]
async fn test_required_capabilities_narrow_selection() {
    let (registry, coordinator) = setup();
    register(&registry, "quiz-only", &["generate_quiz"], slow_echo("quiz-only", Duration::ZERO));
    register(
        &registry,
        "researcher",
        &["generate_quiz", "search_content"],
        slow_echo("researcher", Duration::ZERO),
    );

    let result = coordinator
        .submit(TaskRequest::new("generate_quiz", json!({})).requiring("search_content"))
        .await;
    assert_eq!(result.worker_id.as_deref(), Some("researcher"));

    let result = coordinator
        .submit(TaskRequest::new("generate_quiz", json!({})).requiring("translate"))
        .await;
    assert_eq!(result.failure_kind(), Some(FailureKind::NoEligibleWorker));
    assert_eq!(result.worker_id, None);
}

#[tokio::test]
async fn test_failures_steer_selection_away() {
    let (registry, coordinator) = setup();
    register(&registry, "flaky", &["generate_quiz"], failing());
    register(&registry, "steady", &["generate_quiz"], slow_echo("steady", Duration::ZERO));

    let first = coordinator
        .submit(TaskRequest::new("generate_quiz", json!({})))
        .await;
    assert_eq!(first.worker_id.as_deref(), Some("flaky"));
    assert_eq!(first.failure_kind(), Some(FailureKind::DispatchFailure));
    assert!(first.error.unwrap().message.contains("model refused"));

    let flaky = registry.get("flaky").unwrap();
    assert_eq!(flaky.performance.success_rate, 0.0);
    assert_eq!(flaky.status, WorkerStatus::Active);

    let second = coordinator
        .submit(TaskRequest::new("generate_quiz", json!({})))
        .await;
    assert_eq!(second.worker_id.as_deref(), Some("steady"));
    assert!(second.success);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_frees_the_worker() {
    let (registry, coordinator) = setup();
    register(&registry, "sleepy", &["generate_quiz"], slow_echo("sleepy", Duration::from_secs(60)));

    let result = coordinator
        .submit(TaskRequest::new("generate_quiz", json!({})).with_timeout(Duration::from_secs(1)))
        .await;

    assert_eq!(result.failure_kind(), Some(FailureKind::DispatchTimeout));
    let sleepy = registry.get("sleepy").unwrap();
    assert!(sleepy.current_task_ids.is_empty());
    assert_eq!(sleepy.status, WorkerStatus::Active);
    assert_eq!(sleepy.performance.completed_count, 1);
    assert_eq!(coordinator.history(None).len(), 1);
}

#[tokio::test]
async fn test_submit_to_respects_status() {
    let (registry, coordinator) = setup();
    register(&registry, "w", &["generate_quiz"], slow_echo("w", Duration::ZERO));
    registry.set_status("w", WorkerStatus::Inactive).unwrap();

    let result = coordinator
        .submit_to(TaskRequest::new("generate_quiz", json!({})), "w")
        .await;
    assert_eq!(result.failure_kind(), Some(FailureKind::WorkerInactive));

    let result = coordinator
        .submit_to(TaskRequest::new("generate_quiz", json!({})), "ghost")
        .await;
    assert_eq!(result.failure_kind(), Some(FailureKind::UnknownWorker));

    registry.set_status("w", WorkerStatus::Active).unwrap();
    let result = coordinator
        .submit_to(TaskRequest::new("search_content", json!({})), "w")
        .await;
    assert_eq!(result.failure_kind(), Some(FailureKind::MissingCapability));

    assert_eq!(registry.get("w").unwrap().performance.completed_count, 0);
}
