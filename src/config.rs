//! Configuration management

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenAI API key (optional - generation fails with a transport error without it)
    pub openai_api_key: Option<String>,

    /// Chat completions base URL
    pub openai_base_url: String,

    /// Model id
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Tavily API key (optional - search falls back to a placeholder result)
    pub tavily_api_key: Option<String>,

    /// HTTP bind host
    pub host: String,

    /// HTTP bind port
    pub port: u16,

    /// Questions per quiz when a request does not say
    pub default_questions: usize,

    /// Generation calls allowed per run
    pub max_attempts: u32,

    /// Largest quiz a caller may request
    pub max_questions: usize,

    /// Most generation calls a caller may allow per run
    pub max_attempts_limit: u32,

    /// Default task dispatch timeout
    pub task_timeout_ms: u64,

    /// Timeout for fetching a remote agent card
    pub discovery_timeout_ms: u64,

    /// Task results kept in history
    pub history_limit: usize,

    /// Agent name in the discovery document
    pub agent_name: String,

    /// Base URL advertised in the discovery document
    pub public_url: String,

    /// Search cache TTL in seconds
    pub search_cache_ttl_secs: u64,

    /// Log every HTTP request
    pub log_requests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            tavily_api_key: None,
            host: "127.0.0.1".to_string(),
            port: 8001,
            default_questions: 20,
            max_attempts: 3,
            max_questions: 50,
            max_attempts_limit: 10,
            task_timeout_ms: 120_000,
            discovery_timeout_ms: 30_000,
            history_limit: 1000,
            agent_name: "quizsmith-agent".to_string(),
            public_url: "http://127.0.0.1:8001".to_string(),
            search_cache_ttl_secs: 900,
            log_requests: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = non_empty("QUIZ_HOST").unwrap_or(defaults.host);

        let port = match non_empty("QUIZ_PORT") {
            Some(v) => v
                .parse()
                .with_context(|| format!("QUIZ_PORT must be a port number, got '{}'", v))?,
            None => defaults.port,
        };

        let default_questions = non_empty("QUIZ_DEFAULT_QUESTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.default_questions);

        let max_attempts = non_empty("QUIZ_MAX_ATTEMPTS")
            .and_then(|v| v.parse().ok())
            .filter(|n: &u32| *n > 0)
            .unwrap_or(defaults.max_attempts);

        let max_questions = non_empty("QUIZ_MAX_QUESTIONS")
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.max_questions);

        let max_attempts_limit = non_empty("QUIZ_MAX_ATTEMPTS_LIMIT")
            .and_then(|v| v.parse().ok())
            .filter(|n: &u32| *n > 0)
            .unwrap_or(defaults.max_attempts_limit);

        let temperature = non_empty("QUIZ_TEMPERATURE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.temperature);

        let public_url = non_empty("QUIZ_PUBLIC_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://{}:{}", host, port));

        let log_requests = non_empty("QUIZ_LOG_REQUESTS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.log_requests);

        let config = Self {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: non_empty("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            model: non_empty("QUIZ_MODEL").unwrap_or(defaults.model),
            temperature,
            tavily_api_key: non_empty("TAVILY_API_KEY"),
            host,
            port,
            default_questions,
            max_attempts,
            max_questions,
            max_attempts_limit,
            task_timeout_ms: non_empty("QUIZ_TASK_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.task_timeout_ms),
            discovery_timeout_ms: non_empty("QUIZ_DISCOVERY_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.discovery_timeout_ms),
            history_limit: non_empty("QUIZ_HISTORY_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.history_limit),
            agent_name: non_empty("QUIZ_AGENT_NAME").unwrap_or(defaults.agent_name),
            public_url,
            search_cache_ttl_secs: non_empty("QUIZ_SEARCH_CACHE_TTL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.search_cache_ttl_secs),
            log_requests,
        };

        if config.default_questions == 0 || config.default_questions > config.max_questions {
            anyhow::bail!(
                "QUIZ_DEFAULT_QUESTIONS must be between 1 and {} (got {})",
                config.max_questions,
                config.default_questions
            );
        }

        if config.max_attempts > config.max_attempts_limit {
            anyhow::bail!(
                "QUIZ_MAX_ATTEMPTS must not exceed QUIZ_MAX_ATTEMPTS_LIMIT ({} > {})",
                config.max_attempts,
                config.max_attempts_limit
            );
        }

        Ok(config)
    }

    /// Address the HTTP server binds to
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn search_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.search_cache_ttl_secs)
    }
}
