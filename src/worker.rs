//! Local Quiz Worker
//!
//! The capabilities this process offers to the coordinator, with their input
//! schemas and parameter types.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::generation::QuizGenerator;
use crate::registry::{handler, HandlerError, HandlerTable, WorkerDescriptor};
use crate::web::{WebResearch, DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_MAX_RESULTS};

pub const GENERATE_QUIZ: &str = "generate_quiz";
pub const SEARCH_CONTENT: &str = "search_content";
pub const EXTRACT_CONTENT: &str = "extract_content";

/// Parameters of a quiz generation request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenerateParams {
    #[serde(alias = "prompt")]
    pub topic: String,
    #[serde(default, alias = "count")]
    pub num_questions: Option<usize>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractParams {
    pub urls: Vec<String>,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_max_content_length() -> usize {
    DEFAULT_MAX_CONTENT_LENGTH
}

/// Decode handler parameters, naming the capability on failure
pub fn parse_params<T: serde::de::DeserializeOwned>(capability: &str, params: Value) -> anyhow::Result<T> {
    serde_json::from_value(params)
        .map_err(|e| anyhow::anyhow!("invalid parameters for {}: {}", capability, e))
}

pub fn generate_quiz_schema(defaults: &GenerationDefaults) -> Value {
    json!({
        "type": "object",
        "properties": {
            "topic": {
                "type": "string",
                "description": "Subject of the quiz"
            },
            "num_questions": {
                "type": "integer",
                "description": "Exact number of questions",
                "minimum": 1,
                "maximum": defaults.max_questions,
                "default": defaults.num_questions
            },
            "max_attempts": {
                "type": "integer",
                "description": "Generation calls allowed",
                "minimum": 1,
                "maximum": defaults.max_attempts_limit,
                "default": defaults.max_attempts
            }
        },
        "required": ["topic"]
    })
}

pub fn search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Search query"
            },
            "max_results": {
                "type": "integer",
                "description": "Max results",
                "default": DEFAULT_MAX_RESULTS
            }
        },
        "required": ["query"]
    })
}

pub fn extract_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "urls": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Pages to extract"
            },
            "max_content_length": {
                "type": "integer",
                "description": "Characters kept per page",
                "default": DEFAULT_MAX_CONTENT_LENGTH
            }
        },
        "required": ["urls"]
    })
}

/// Defaults applied when a generation request leaves a field out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationDefaults {
    pub num_questions: usize,
    pub max_attempts: u32,
    pub max_questions: usize,
    pub max_attempts_limit: u32,
}

impl GenerationDefaults {
    /// Resolve optional fields to `(count, attempts)`
    pub fn resolve(&self, params: &GenerateParams) -> (usize, u32) {
        (
            params.num_questions.unwrap_or(self.num_questions),
            params.max_attempts.unwrap_or(self.max_attempts),
        )
    }
}

/// Descriptor and handlers of the in-process worker
pub fn local_worker(
    id: &str,
    display_name: &str,
    generator: QuizGenerator,
    research: WebResearch,
    defaults: GenerationDefaults,
) -> (WorkerDescriptor, HandlerTable) {
    let descriptor = WorkerDescriptor::new(id, display_name)
        .with_capability(
            GENERATE_QUIZ,
            generate_quiz_schema(&defaults),
        )
        .with_capability(SEARCH_CONTENT, search_schema())
        .with_capability(EXTRACT_CONTENT, extract_schema());

    let mut handlers = HandlerTable::new();

    let generator = Arc::new(generator);
    handlers.insert(
        GENERATE_QUIZ.to_string(),
        handler(move |params| {
            let generator = generator.clone();
            async move {
                let params: GenerateParams = parse_params(GENERATE_QUIZ, params)?;
                let (count, attempts) = defaults.resolve(&params);
                let quiz = generator
                    .generate(&params.topic, count, attempts)
                    .await
                    .map_err(|e| HandlerError::new(e.to_string(), e.details()))?;
                Ok(serde_json::to_value(quiz)?)
            }
        }),
    );

    let search = research.clone();
    handlers.insert(
        SEARCH_CONTENT.to_string(),
        handler(move |params| {
            let research = search.clone();
            async move {
                let params: SearchParams = parse_params(SEARCH_CONTENT, params)?;
                let results = research.search(&params.query, params.max_results).await?;
                Ok(json!({ "query": params.query, "results": results }))
            }
        }),
    );

    handlers.insert(
        EXTRACT_CONTENT.to_string(),
        handler(move |params| {
            let research = research.clone();
            async move {
                let params: ExtractParams = parse_params(EXTRACT_CONTENT, params)?;
                let pages = research
                    .extract_many(&params.urls, params.max_content_length)
                    .await;
                Ok(json!({ "results": pages }))
            }
        }),
    );

    (descriptor, handlers)
}
