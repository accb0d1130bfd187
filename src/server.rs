//! HTTP Server
//!
//! Axum router exposing quiz generation, the MCP and agent-RPC endpoints,
//! agent discovery and health, with CORS and graceful shutdown.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::a2a::A2aHandler;
use crate::discovery::WELL_KNOWN_PATH;
use crate::generation::GenerationError;
use crate::mcp::McpServer;
use crate::rpc::{self, RpcResponse};
use crate::service::QuizService;
use crate::worker::GenerateParams;

/// Shared state of the HTTP handlers
pub struct AppState {
    pub service: Arc<QuizService>,
    mcp: McpServer,
    a2a: A2aHandler,
}

impl AppState {
    pub fn new(service: Arc<QuizService>) -> Self {
        Self {
            mcp: McpServer::new(service.clone()),
            a2a: A2aHandler::new(service.clone()),
            service,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// Timestamp (ISO 8601)
    pub timestamp: String,
    /// Registered workers
    pub workers: usize,
}

/// Build the router with all routes and middleware
pub fn build_router(service: Arc<QuizService>) -> Router {
    let log_requests = service.config().log_requests;
    let state = Arc::new(AppState::new(service));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let mut router = Router::new()
        .route("/generate", post(generate_handler))
        .route("/mcp", post(mcp_handler))
        .route("/a2a", post(a2a_handler))
        .route(WELL_KNOWN_PATH, get(agent_card_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(cors);

    if log_requests {
        router = router.layer(TraceLayer::new_for_http());
    }

    router
}

/// Bind the configured address and serve until a shutdown signal
pub async fn serve(service: Arc<QuizService>) -> anyhow::Result<()> {
    let addr = service.config().socket_addr()?;
    let router = build_router(service);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server shut down gracefully");
    Ok(())
}

async fn generate_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let params: GenerateParams = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": format!("invalid request body: {}", e),
                    "code": "invalid_request",
                    "retryable": false
                })),
            )
                .into_response()
        }
    };

    match state.service.generate(&params).await {
        Ok(quiz) => Json(quiz).into_response(),
        Err(err) => {
            let status = status_for(&err);
            if status.is_server_error() {
                error!("Generation for '{}' failed: {}", params.topic, err);
            } else {
                warn!("Generation for '{}' failed: {}", params.topic, err);
            }
            let mut body = err.details();
            body["error"] = json!(err.to_string());
            (status, Json(body)).into_response()
        }
    }
}

fn status_for(err: &GenerationError) -> StatusCode {
    match err.code() {
        "invalid_request" => StatusCode::BAD_REQUEST,
        "count_not_reached" | "invalid_structure" => StatusCode::UNPROCESSABLE_ENTITY,
        "generator_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn mcp_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match decode_rpc(&body) {
        Ok(request) => request,
        Err(response) => return Json(response).into_response(),
    };

    match state.mcp.handle(request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn a2a_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match decode_rpc(&body) {
        Ok(request) => request,
        Err(response) => return Json(response).into_response(),
    };

    let notification = request.is_notification();
    let response = state.a2a.handle(request).await;
    if notification {
        StatusCode::ACCEPTED.into_response()
    } else {
        Json(response).into_response()
    }
}

fn decode_rpc(body: &[u8]) -> Result<rpc::RpcRequest, RpcResponse> {
    match std::str::from_utf8(body) {
        Ok(text) => rpc::parse_request(text),
        Err(e) => Err(RpcResponse::error(
            None,
            rpc::error_codes::PARSE_ERROR,
            format!("Parse error: {}", e),
        )),
    }
}

async fn agent_card_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::to_value(state.service.agent_card()).unwrap_or(Value::Null))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.service.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        workers: state.service.registry().len(),
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
