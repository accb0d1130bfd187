//! Generator Adapter
//!
//! Wraps a single call to an external text-producing model. The adapter never
//! retries and never caches; retry policy belongs to the generation state
//! machine.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;

const DEFAULT_MAX_TOKENS: usize = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Generator failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeneratorError {
    #[error("prompt rendered to empty instruction text")]
    EmptyPrompt,

    #[error("generator returned empty output")]
    EmptyOutput,

    #[error("generator transport failure: {0}")]
    Transport(String),
}

impl GeneratorError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Instruction text sent to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPayload {
    pub system: String,
    pub user: String,
}

impl PromptPayload {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    /// Whether the payload carries any instruction at all
    pub fn is_blank(&self) -> bool {
        self.system.trim().is_empty() && self.user.trim().is_empty()
    }

    /// Single-string rendering (system block first)
    pub fn render(&self) -> String {
        match (self.system.trim().is_empty(), self.user.trim().is_empty()) {
            (true, _) => self.user.clone(),
            (false, true) => self.system.clone(),
            (false, false) => format!("{}\n\n{}", self.system, self.user),
        }
    }
}

/// External text producer
#[async_trait]
pub trait TextProducer: Send + Sync {
    /// Produce raw text for the prompt
    async fn produce(&self, prompt: &PromptPayload) -> Result<String, GeneratorError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

/// OpenAI-compatible chat completions client
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl OpenAiClient {
    pub fn new(api_key: Option<&str>, base_url: &str, model: &str, temperature: f32) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key: api_key.map(|s| s.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Create from config
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.openai_api_key.as_deref(),
            &config.openai_base_url,
            &config.model,
            config.temperature,
        )
    }

    /// Check if API key is configured
    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextProducer for OpenAiClient {
    async fn produce(&self, prompt: &PromptPayload) -> Result<String, GeneratorError> {
        if prompt.is_blank() {
            return Err(GeneratorError::EmptyPrompt);
        }

        let api_key = self.api_key.as_ref().ok_or_else(|| {
            GeneratorError::Transport("OPENAI_API_KEY not set - generator unavailable".to_string())
        })?;

        let mut messages = Vec::with_capacity(2);
        if !prompt.system.trim().is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: prompt.system.clone(),
            });
        }
        if !prompt.user.trim().is_empty() {
            messages.push(ChatMessage {
                role: "user",
                content: prompt.user.clone(),
            });
        }

        let request = ChatRequest {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages,
        };

        debug!(
            "Calling chat completions: model={}, prompt_len={}",
            self.model,
            prompt.user.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GeneratorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Transport(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    format!("authentication failed ({})", status)
                }
                _ => format!("API error {}: {}", status, text),
            }));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Transport(format!("invalid response body: {}", e)))?;

        let content = result
            .choices
            .into_iter()
            .filter_map(|c| c.message.content)
            .collect::<Vec<_>>()
            .join("\n");

        if let Some(usage) = &result.usage {
            info!(
                "Generator response: model={}, in={}, out={}, chars={}",
                self.model,
                usage.prompt_tokens,
                usage.completion_tokens,
                content.len()
            );
        }

        if content.trim().is_empty() {
            return Err(GeneratorError::EmptyOutput);
        }

        Ok(content)
    }
}
