//! MCP Tool Registry
//!
//! Defines and executes the tools exposed over MCP: quiz generation, web
//! search and content extraction.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::generation::GenerationError;
use crate::service::QuizService;
use crate::worker::{self, ExtractParams, GenerateParams, SearchParams};

pub const GENERATE_QUIZ_TOOL: &str = "generate_quiz";
pub const SEARCH_WEB_TOOL: &str = "search_web";
pub const EXTRACT_CONTENT_TOOL: &str = "extract_content";

/// Tool definition for MCP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Tool failures
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

/// Tool registry
pub struct ToolRegistry {
    service: Arc<QuizService>,
}

impl ToolRegistry {
    pub fn new(service: Arc<QuizService>) -> Self {
        Self { service }
    }

    /// List all tool definitions
    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: GENERATE_QUIZ_TOOL.to_string(),
                description: "Generate a multiple-choice quiz with exactly the requested number of questions (five options A-E each)"
                    .to_string(),
                input_schema: worker::generate_quiz_schema(&self.service.defaults()),
            },
            ToolDefinition {
                name: SEARCH_WEB_TOOL.to_string(),
                description: "Search the web for quiz source material".to_string(),
                input_schema: worker::search_schema(),
            },
            ToolDefinition {
                name: EXTRACT_CONTENT_TOOL.to_string(),
                description: "Extract plain text from web pages for quiz generation".to_string(),
                input_schema: worker::extract_schema(),
            },
        ]
    }

    /// Execute a tool, returning its JSON result as text
    pub async fn call(&self, name: &str, args: Value) -> Result<String, ToolError> {
        info!("Tool call: {} with args: {}", name, args);
        let start = std::time::Instant::now();

        let result = match name {
            GENERATE_QUIZ_TOOL => {
                let params: GenerateParams = decode(args)?;
                let quiz = self.service.generate(&params).await?;
                serde_json::to_string(&quiz).map_err(anyhow::Error::from)?
            }
            SEARCH_WEB_TOOL => {
                let params: SearchParams = decode(args)?;
                let results = self
                    .service
                    .research()
                    .search(&params.query, params.max_results)
                    .await?;
                json!({ "query": params.query, "results": results }).to_string()
            }
            EXTRACT_CONTENT_TOOL => {
                let params: ExtractParams = decode(args)?;
                if params.urls.is_empty() {
                    return Err(ToolError::InvalidArguments("urls must not be empty".to_string()));
                }
                let pages = self
                    .service
                    .research()
                    .extract_many(&params.urls, params.max_content_length)
                    .await;
                json!({ "results": pages }).to_string()
            }
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };

        info!("Tool {} completed in {:?}", name, start.elapsed());
        Ok(result)
    }
}

fn decode<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
