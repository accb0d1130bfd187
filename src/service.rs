//! Quiz Service
//!
//! Wires the generator, research tools, registry and coordinator together and
//! registers the local worker. Every protocol surface holds an
//! `Arc<QuizService>`.

use anyhow::Result;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::Config;
use crate::coordinator::{CoordinatorConfig, TaskCoordinator};
use crate::discovery::{self, AgentCard};
use crate::generation::{GenerationError, QuizGenerator};
use crate::generator::{OpenAiClient, TextProducer};
use crate::quiz::{GenerationRequest, InvalidRequest, Quiz};
use crate::registry::{AgentRegistry, WorkerDescriptor};
use crate::web::WebResearch;
use crate::worker::{self, GenerateParams, GenerationDefaults};

/// Registry id of the in-process worker
pub const LOCAL_WORKER_ID: &str = "local";

pub struct QuizService {
    config: Arc<Config>,
    generator: QuizGenerator,
    research: WebResearch,
    registry: Arc<AgentRegistry>,
    coordinator: Arc<TaskCoordinator>,
    /// Agent card fetches
    discovery_http: Client,
    /// Task forwarding to remote agents; the dispatch timeout bounds it
    forward_http: Client,
    started: Instant,
}

impl QuizService {
    /// Build the service around any text producer
    pub fn new(config: Config, producer: Arc<dyn TextProducer>) -> Result<Self> {
        let research = WebResearch::from_config(&config);
        Self::with_research(config, producer, research)
    }

    pub fn with_research(
        config: Config,
        producer: Arc<dyn TextProducer>,
        research: WebResearch,
    ) -> Result<Self> {
        let generator = QuizGenerator::new(producer)
            .with_max_questions(config.max_questions)
            .with_max_attempts(config.max_attempts_limit);

        let registry = Arc::new(AgentRegistry::new());
        let coordinator = Arc::new(TaskCoordinator::new(
            registry.clone(),
            CoordinatorConfig {
                default_timeout: config.task_timeout(),
                history_limit: config.history_limit,
                ..Default::default()
            },
        ));

        let discovery_http = Client::builder()
            .timeout(config.discovery_timeout())
            .build()
            .unwrap_or_else(|_| Client::new());
        let forward_http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        let service = Self {
            config: Arc::new(config),
            generator,
            research,
            registry,
            coordinator,
            discovery_http,
            forward_http,
            started: Instant::now(),
        };

        let (descriptor, handlers) = worker::local_worker(
            LOCAL_WORKER_ID,
            &service.config.agent_name,
            service.generator.clone(),
            service.research.clone(),
            service.defaults(),
        );
        service.registry.register(descriptor, handlers)?;

        Ok(service)
    }

    /// Build the service with the OpenAI-compatible generator from config
    pub fn from_config(config: Config) -> Result<Self> {
        let client = OpenAiClient::from_config(&config);
        if client.is_available() {
            info!("Generator: {} via {}", client.model(), config.openai_base_url);
        } else {
            info!("OPENAI_API_KEY not set - generation requests will fail until configured");
        }
        Self::new(config, Arc::new(client))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<TaskCoordinator> {
        &self.coordinator
    }

    pub fn research(&self) -> &WebResearch {
        &self.research
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn defaults(&self) -> GenerationDefaults {
        GenerationDefaults {
            num_questions: self.config.default_questions,
            max_attempts: self.config.max_attempts,
            max_questions: self.config.max_questions,
            max_attempts_limit: self.config.max_attempts_limit,
        }
    }

    /// Resolve defaults and check a request against the configured ceilings
    pub fn check(&self, params: &GenerateParams) -> Result<GenerationRequest, InvalidRequest> {
        let (count, attempts) = self.defaults().resolve(params);
        let request = GenerationRequest::new(params.topic.as_str(), count, attempts)?;
        self.generator.check(&request)?;
        Ok(request)
    }

    /// Run one generation request in the caller's task
    pub async fn generate(&self, params: &GenerateParams) -> Result<Quiz, GenerationError> {
        let request = self.check(params)?;
        self.generator.run(request).await
    }

    /// Discovery document for this agent
    pub fn agent_card(&self) -> AgentCard {
        let local = self
            .registry
            .get(LOCAL_WORKER_ID)
            .unwrap_or_else(|| WorkerDescriptor::new(LOCAL_WORKER_ID, &self.config.agent_name));
        AgentCard::for_worker(&self.config.agent_name, &self.config.public_url, &local)
    }

    /// Fetch a remote agent's card and register it as a worker
    pub async fn register_remote(&self, url: &str) -> Result<WorkerDescriptor> {
        let card = discovery::fetch_card(&self.discovery_http, url).await?;
        if card.name == LOCAL_WORKER_ID {
            anyhow::bail!("remote agent name '{}' is reserved", card.name);
        }
        let (descriptor, handlers) = discovery::remote_worker(&self.forward_http, &card)?;
        self.registry.register(descriptor.clone(), handlers)?;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GeneratorError, PromptPayload};
    use crate::worker::GENERATE_QUIZ;
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl TextProducer for Offline {
        async fn produce(&self, _prompt: &PromptPayload) -> Result<String, GeneratorError> {
            Err(GeneratorError::Transport("offline".to_string()))
        }
    }

    fn service() -> QuizService {
        QuizService::new(Config::default(), Arc::new(Offline)).unwrap()
    }

    #[test]
    fn test_local_worker_registered() {
        let service = service();
        let local = service.registry().get(LOCAL_WORKER_ID).unwrap();
        assert!(local.has_capability(GENERATE_QUIZ));

        let card = service.agent_card();
        assert_eq!(card.name, "quizsmith-agent");
        assert_eq!(card.capabilities, local.capabilities);
        assert_eq!(card.a2a_endpoint(), Some("http://127.0.0.1:8001/a2a"));
    }

    #[tokio::test]
    async fn test_generate_error_details() {
        let service = service();
        let params = GenerateParams {
            topic: "tides".to_string(),
            num_questions: Some(3),
            max_attempts: Some(2),
        };
        let err = service.generate(&params).await.unwrap_err();
        let details = err.details();
        assert_eq!(details["code"], "generator_unavailable");
        assert_eq!(details["retryable"], true);
        assert_eq!(details["report"]["attempts"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ceiling_from_config() {
        let service = service();
        let params = GenerateParams {
            topic: "tides".to_string(),
            num_questions: Some(51),
            max_attempts: None,
        };
        let err = service.generate(&params).await.unwrap_err();
        assert_eq!(err.details()["code"], "invalid_request");
        assert!(err.details().get("report").is_none());

        let params = GenerateParams {
            topic: "tides".to_string(),
            num_questions: Some(3),
            max_attempts: Some(11),
        };
        assert!(matches!(
            service.check(&params),
            Err(InvalidRequest::TooManyAttempts { requested: 11, max: 10 })
        ));
    }
}
