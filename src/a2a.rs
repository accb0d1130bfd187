//! Agent-to-Agent Protocol
//!
//! JSON-RPC 2.0 surface for other agents: discovery, worker management and
//! task submission through the coordinator.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::coordinator::{TaskFailure, TaskRequest, TaskResult};
use crate::registry::WorkerStatus;
use crate::rpc::{error_codes, RpcRequest, RpcResponse};
use crate::service::{QuizService, LOCAL_WORKER_ID};
use crate::worker::{GenerateParams, GENERATE_QUIZ};

#[derive(Debug, Deserialize)]
struct RegisterParams {
    url: String,
}

#[derive(Debug, Deserialize)]
struct WorkerParams {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct SubmitToParams {
    worker_id: String,
    #[serde(flatten)]
    task: TaskRequest,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    #[serde(default)]
    limit: Option<usize>,
}

/// Agent-RPC dispatcher
pub struct A2aHandler {
    service: Arc<QuizService>,
}

impl A2aHandler {
    pub fn new(service: Arc<QuizService>) -> Self {
        Self { service }
    }

    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id;
        let params = request.params;

        match request.method.as_str() {
            "ping" => RpcResponse::success(
                id,
                json!({
                    "status": "ok",
                    "agent": self.service.config().agent_name,
                    "timestamp": chrono::Utc::now().to_rfc3339()
                }),
            ),
            "agent/card" => to_response(id, &self.service.agent_card()),
            "agent/list" => RpcResponse::success(
                id,
                json!({ "agents": self.service.registry().list() }),
            ),
            "agent/register" => match decode::<RegisterParams>(params) {
                Ok(p) => match self.service.register_remote(&p.url).await {
                    Ok(descriptor) => to_response(id, &descriptor),
                    Err(e) => {
                        warn!("Remote registration failed for {}: {:#}", p.url, e);
                        RpcResponse::error(
                            id,
                            error_codes::AGENT_INTERNAL,
                            format!("Registration failed: {:#}", e),
                        )
                    }
                },
                Err(e) => invalid_params(id, e),
            },
            "agent/unregister" => match decode::<WorkerParams>(params) {
                Ok(p) if p.id == LOCAL_WORKER_ID => {
                    invalid_params(id, "the local worker cannot be removed")
                }
                Ok(p) => {
                    let removed = self.service.registry().unregister(&p.id).is_some();
                    RpcResponse::success(id, json!({ "id": p.id, "removed": removed }))
                }
                Err(e) => invalid_params(id, e),
            },
            "agent/status" => self.handle_status(id, params),
            "quiz/generate" => self.handle_generate(id, params).await,
            "task/submit" => match decode::<TaskRequest>(params) {
                Ok(task) => to_response(id, &self.service.coordinator().submit(task).await),
                Err(e) => invalid_params(id, e),
            },
            "task/submit_to" => match decode::<SubmitToParams>(params) {
                Ok(p) => to_response(
                    id,
                    &self.service.coordinator().submit_to(p.task, &p.worker_id).await,
                ),
                Err(e) => invalid_params(id, e),
            },
            "task/history" => {
                let limit = if params.is_null() {
                    None
                } else {
                    match decode::<HistoryParams>(params) {
                        Ok(p) => p.limit,
                        Err(e) => return invalid_params(id, e),
                    }
                };
                RpcResponse::success(
                    id,
                    json!({ "tasks": self.service.coordinator().history(limit) }),
                )
            }
            method => {
                warn!("Unknown A2A method: {}", method);
                RpcResponse::error(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                )
            }
        }
    }

    fn handle_status(&self, id: Option<Value>, params: Value) -> RpcResponse {
        let p = match decode::<StatusParams>(params) {
            Ok(p) => p,
            Err(e) => return invalid_params(id, e),
        };
        let status = match p.status.parse::<WorkerStatus>() {
            Ok(status) => status,
            Err(e) => return invalid_params(id, e),
        };

        match self.service.registry().set_status(&p.id, status) {
            Ok(()) => {
                info!("Worker {} set to {}", p.id, status);
                RpcResponse::success(id, json!({ "id": p.id, "status": status }))
            }
            Err(e) => invalid_params(id, e),
        }
    }

    /// Generate through the coordinator so the run lands in task history
    async fn handle_generate(&self, id: Option<Value>, params: Value) -> RpcResponse {
        let p = match decode::<GenerateParams>(params.clone()) {
            Ok(p) => p,
            Err(e) => return invalid_params(id, e),
        };
        if let Err(e) = self.service.check(&p) {
            return invalid_params(id, e);
        }

        let result = self
            .service
            .coordinator()
            .submit(TaskRequest::new(GENERATE_QUIZ, params))
            .await;

        if let (true, Some(quiz)) = (result.success, result.payload.clone()) {
            return RpcResponse::success(id, quiz);
        }
        let message = result
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "quiz generation failed".to_string());
        RpcResponse::error_with_data(
            id,
            error_codes::AGENT_INTERNAL,
            message,
            Some(failure_data(&result)),
        )
    }
}

/// Error data of a failed generation task: the generator's own details when
/// the worker reported them, the coordinator's failure kind otherwise
fn failure_data(result: &TaskResult) -> Value {
    let mut data = match result.error.as_ref() {
        Some(TaskFailure {
            details: Some(details),
            ..
        }) => details.clone(),
        Some(failure) => json!({
            "code": failure.kind,
            "message": failure.message,
            "retryable": failure.kind.is_retryable(),
        }),
        None => json!({ "code": "internal", "retryable": true }),
    };
    data["task_id"] = json!(result.task_id);
    data["worker_id"] = json!(result.worker_id);
    data
}

fn decode<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(params)
}

fn invalid_params(id: Option<Value>, reason: impl std::fmt::Display) -> RpcResponse {
    RpcResponse::error(
        id,
        error_codes::INVALID_PARAMS,
        format!("Invalid params: {}", reason),
    )
}

fn to_response<T: serde::Serialize>(id: Option<Value>, value: &T) -> RpcResponse {
    match serde_json::to_value(value) {
        Ok(result) => RpcResponse::success(id, result),
        Err(e) => RpcResponse::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
    }
}
