//! HTTP Surface Integration Tests
//!
//! Drives the full router with `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use quizsmith_agent::rpc::error_codes;
use quizsmith_agent::{build_router, Config, GeneratorError, PromptPayload, QuizService, TextProducer};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Answers every prompt with as many questions as it asks for
struct Obliging;

#[async_trait]
impl TextProducer for Obliging {
    async fn produce(&self, prompt: &PromptPayload) -> Result<String, GeneratorError> {
        let count: usize = prompt
            .user
            .split_whitespace()
            .skip_while(|w| *w != "exactly")
            .nth(1)
            .and_then(|n| n.parse().ok())
            .unwrap_or(1);

        let questions: Vec<Value> = (0..count)
            .map(|i| {
                json!({
                    "question": format!("Q{}", i),
                    "options": ["a", "b", "c", "d", "e"],
                    "answer": "E"
                })
            })
            .collect();
        Ok(json!({ "questions": questions }).to_string())
    }
}

struct Unreachable;

#[async_trait]
impl TextProducer for Unreachable {
    async fn produce(&self, _prompt: &PromptPayload) -> Result<String, GeneratorError> {
        Err(GeneratorError::Transport("connection refused".to_string()))
    }
}

fn app(producer: Arc<dyn TextProducer>) -> Router {
    let config = Config {
        log_requests: false,
        ..Config::default()
    };
    build_router(Arc::new(QuizService::new(config, producer).unwrap()))
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_generate_uses_configured_default_count() {
    let (status, quiz) = post(app(Arc::new(Obliging)), "/generate", json!({ "prompt": "stars" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        quiz["questions"].as_array().unwrap().len(),
        Config::default().default_questions
    );
    assert_eq!(quiz["topic"], "stars");
}

#[tokio::test]
async fn test_generate_unavailable_is_503() {
    let (status, body) = post(
        app(Arc::new(Unreachable)),
        "/generate",
        json!({ "topic": "stars", "num_questions": 2, "max_attempts": 2 }),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "generator_unavailable");
    assert!(body["error"].as_str().unwrap().contains("try again"));
    assert_eq!(body["retryable"], true);
    assert_eq!(body["report"]["attempts"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_generate_over_ceiling_is_400() {
    let (status, body) = post(
        app(Arc::new(Obliging)),
        "/generate",
        json!({ "topic": "stars", "num_questions": 1000 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
    assert_eq!(
        body["error"],
        "invalid request: question count 1000 exceeds the limit of 50"
    );
}

#[tokio::test]
async fn test_mcp_tools_call_over_http() {
    let (status, body) = post(
        app(Arc::new(Obliging)),
        "/mcp",
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "generate_quiz", "arguments": { "topic": "comets", "num_questions": 4 } }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    let quiz: Value = serde_json::from_str(text).unwrap();
    assert_eq!(quiz["questions"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_a2a_agent_list_and_failed_registration() {
    let app = app(Arc::new(Obliging));

    let (_, body) = post(
        app.clone(),
        "/a2a",
        json!({ "jsonrpc": "2.0", "id": 1, "method": "agent/list" }),
    )
    .await;
    assert_eq!(body["result"]["agents"][0]["id"], "local");

    let (_, body) = post(
        app,
        "/a2a",
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "agent/register",
            "params": { "url": "http://127.0.0.1:9" }
        }),
    )
    .await;
    assert_eq!(body["error"]["code"], error_codes::AGENT_INTERNAL);
}

#[tokio::test]
async fn test_a2a_task_history_after_quiz_generate() {
    let app = app(Arc::new(Obliging));

    let (_, body) = post(
        app.clone(),
        "/a2a",
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "quiz/generate",
            "params": { "topic": "tides", "num_questions": 3 }
        }),
    )
    .await;
    assert_eq!(body["result"]["questions"].as_array().unwrap().len(), 3);

    let (_, body) = post(
        app,
        "/a2a",
        json!({ "jsonrpc": "2.0", "id": 2, "method": "task/history", "params": { "limit": 5 } }),
    )
    .await;
    let tasks = body["result"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["success"], true);
}
