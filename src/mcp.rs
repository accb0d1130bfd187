//! MCP Protocol Handler
//!
//! Implements JSON-RPC 2.0 over stdio for Model Context Protocol. The same
//! dispatcher also serves `POST /mcp`.
//! Reference: https://modelcontextprotocol.io/specification

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::rpc::{self, error_codes, RpcRequest, RpcResponse};
use crate::service::QuizService;
use crate::tools::{ToolError, ToolRegistry};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// MCP Server
pub struct McpServer {
    service: Arc<QuizService>,
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(service: Arc<QuizService>) -> Self {
        Self {
            tools: ToolRegistry::new(service.clone()),
            service,
        }
    }

    /// Run the MCP server (stdio mode)
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("MCP server ready, waiting for requests...");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve newline-delimited JSON-RPC until EOF
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("Client disconnected (EOF)");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!("← {}", trimmed);

            let response = match rpc::parse_request(trimmed) {
                Ok(request) => match self.handle(request).await {
                    Some(response) => response,
                    None => continue,
                },
                Err(response) => {
                    warn!("Rejected message: {:?}", response.error);
                    response
                }
            };

            let response_json = serde_json::to_string(&response)?;
            debug!("→ {}", response_json);

            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(())
    }

    /// Handle a single request; notifications produce no response
    pub async fn handle(&self, request: RpcRequest) -> Option<RpcResponse> {
        if request.is_notification() {
            debug!("Received notification: {}", request.method);
            return None;
        }

        let id = request.id;
        let response = match request.method.as_str() {
            // Lifecycle
            "initialize" => self.handle_initialize(id),
            "shutdown" => {
                info!("Shutdown requested");
                RpcResponse::success(id, json!({}))
            }
            "ping" => RpcResponse::success(id, json!({})),

            // Tools
            "tools/list" => RpcResponse::success(id, json!({ "tools": self.tools.list_definitions() })),
            "tools/call" => self.handle_tools_call(id, request.params).await,

            // Unknown
            method => {
                warn!("Unknown method: {}", method);
                RpcResponse::error(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                )
            }
        };

        Some(response)
    }

    fn handle_initialize(&self, id: Option<Value>) -> RpcResponse {
        RpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {
                        "listChanged": false
                    }
                },
                "serverInfo": {
                    "name": self.service.config().agent_name,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Value) -> RpcResponse {
        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n,
            None => {
                return RpcResponse::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    "Missing 'name' parameter",
                )
            }
        };

        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        match self.tools.call(name, arguments).await {
            Ok(result) => RpcResponse::success(
                id,
                json!({
                    "content": [{
                        "type": "text",
                        "text": result
                    }]
                }),
            ),
            Err(ToolError::UnknownTool(tool)) => RpcResponse::error(
                id,
                error_codes::TOOL_NOT_FOUND,
                format!("Unknown tool: {}", tool),
            ),
            Err(ToolError::InvalidArguments(reason)) => RpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                format!("Invalid arguments for '{}': {}", name, reason),
            ),
            Err(ToolError::Generation(err)) => RpcResponse::error_with_data(
                id,
                error_codes::TOOL_EXECUTION_ERROR,
                format!("Tool '{}' failed: {}", name, err),
                Some(err.details()),
            ),
            Err(ToolError::Execution(err)) => RpcResponse::error(
                id,
                error_codes::TOOL_EXECUTION_ERROR,
                format!("Tool '{}' failed: {:#}", name, err),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::generator::{GeneratorError, PromptPayload, TextProducer};
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl TextProducer for Silent {
        async fn produce(&self, _prompt: &PromptPayload) -> Result<String, GeneratorError> {
            Err(GeneratorError::EmptyOutput)
        }
    }

    fn server() -> McpServer {
        let service = QuizService::new(Config::default(), Arc::new(Silent)).unwrap();
        McpServer::new(Arc::new(service))
    }

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest::new(method, params, json!(1))
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = server()
            .handle(request("initialize", json!({})))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "quizsmith-agent");
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let mut notification = request("notifications/initialized", json!({}));
        notification.id = None;
        assert!(server().handle(notification).await.is_none());
    }

    #[tokio::test]
    async fn test_tools_list_and_unknown_method() {
        let server = server();
        let response = server.handle(request("tools/list", json!({}))).await.unwrap();
        assert_eq!(response.result.unwrap()["tools"].as_array().unwrap().len(), 3);

        let response = server.handle(request("resources/list", json!({}))).await.unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tool_errors_map_to_codes() {
        let server = server();

        let response = server
            .handle(request("tools/call", json!({ "name": "nope" })))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::TOOL_NOT_FOUND);

        let response = server
            .handle(request("tools/call", json!({})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);

        let response = server
            .handle(request(
                "tools/call",
                json!({ "name": "generate_quiz", "arguments": { "topic": "moss", "num_questions": 2, "max_attempts": 1 } }),
            ))
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::TOOL_EXECUTION_ERROR);
        assert_eq!(error.data.unwrap()["code"], "count_not_reached");
    }

    #[tokio::test]
    async fn test_stdio_loop() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            "garbage\n",
        );
        let mut output = Vec::new();
        server()
            .serve(BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["error"]["code"], error_codes::PARSE_ERROR);
    }
}
