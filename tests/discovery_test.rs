//! Remote Agent Integration Tests
//!
//! Registers a stub peer served on a local port and forwards tasks to it.

use async_trait::async_trait;
use axum::routing::{get, post};
use axum::{Json, Router};
use quizsmith_agent::{
    Config, FailureKind, GeneratorError, PromptPayload, QuizService, TaskRequest, TextProducer,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct Silent;

#[async_trait]
impl TextProducer for Silent {
    async fn produce(&self, _prompt: &PromptPayload) -> Result<String, GeneratorError> {
        Err(GeneratorError::Transport("not used".to_string()))
    }
}

/// Serve a peer whose `/a2a` answers every task with `result` after `delay`
async fn spawn_peer(delay: Duration, result: Value) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let card = json!({
        "name": "peer",
        "version": "0.1.0",
        "capabilities": { "generate_quiz": { "type": "object" } },
        "endpoints": { "a2a": format!("{}/a2a", base) }
    });

    let router = Router::new()
        .route(
            "/.well-known/agent.json",
            get(move || {
                let card = card.clone();
                async move { Json(card) }
            }),
        )
        .route(
            "/a2a",
            post(move |Json(request): Json<Value>| {
                let result = result.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    Json(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }))
                }
            }),
        );
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    base
}

fn service(discovery_timeout_ms: u64) -> QuizService {
    let config = Config {
        discovery_timeout_ms,
        log_requests: false,
        ..Config::default()
    };
    QuizService::new(config, Arc::new(Silent)).unwrap()
}

fn peer_task() -> TaskRequest {
    TaskRequest::new("generate_quiz", json!({ "topic": "tides" }))
}

#[tokio::test]
async fn test_forwarding_is_bounded_by_dispatch_timeout_only() {
    let reply = json!({ "task_id": "r1", "success": true, "payload": { "from": "peer" } });
    let base = spawn_peer(Duration::from_millis(600), reply).await;

    let service = service(200);
    let descriptor = service.register_remote(&base).await.unwrap();
    assert_eq!(descriptor.id, "peer");

    let result = service
        .coordinator()
        .submit_to(peer_task().with_timeout(Duration::from_secs(5)), "peer")
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.payload.unwrap()["from"], "peer");

    let result = service
        .coordinator()
        .submit_to(peer_task().with_timeout(Duration::from_millis(100)), "peer")
        .await;
    assert_eq!(result.failure_kind(), Some(FailureKind::DispatchTimeout));
}

#[tokio::test]
async fn test_remote_failure_details_are_kept() {
    let reply = json!({
        "task_id": "r2",
        "success": false,
        "error": {
            "kind": "dispatch_failure",
            "message": "worker failed: quiz generation failed",
            "details": { "code": "count_not_reached", "retryable": false }
        }
    });
    let base = spawn_peer(Duration::ZERO, reply).await;

    let service = service(1_000);
    service.register_remote(&base).await.unwrap();

    let result = service.coordinator().submit_to(peer_task(), "peer").await;
    let failure = result.error.unwrap();
    assert_eq!(failure.kind, FailureKind::DispatchFailure);
    assert!(failure.message.contains("remote task failed"));

    let details = failure.details.unwrap();
    assert_eq!(details["code"], "count_not_reached");
    assert_eq!(details["retryable"], false);
}
