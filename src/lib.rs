//! Quizsmith Agent
//!
//! Exact-count multiple-choice quiz generation, served over HTTP, MCP and an
//! agent-to-agent JSON-RPC protocol.
//!
//! # Features
//!
//! - **Count convergence**: a bounded state machine tops up short runs and
//!   trims overshoot until exactly the requested number of questions validate
//! - **Lenient extraction**: JSON is recovered from prose, code fences and
//!   several wrapper shapes
//! - **Strict validation**: five distinct options labelled A-E and an answer
//!   that names one of them
//! - **Coordination**: a worker registry with capability matching, scored
//!   selection, dispatch timeouts and bounded task history
//! - **Research**: cached web search and page text extraction
//!
//! # Architecture
//!
//! ```text
//! HTTP /generate ─┐
//! MCP (stdio|/mcp)┼──► QuizService ──► QuizGenerator ──► TextProducer (OpenAI)
//! A2A /a2a ───────┘        │                │
//!                          │                ├── extraction
//!                          │                └── schema
//!                          ├── TaskCoordinator ──► AgentRegistry
//!                          │        │                 ├── local worker
//!                          │        │                 └── remote agents (/a2a)
//!                          └── WebResearch (Tavily + moka cache)
//! ```

pub mod a2a;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod extraction;
pub mod generation;
pub mod generator;
pub mod mcp;
pub mod quiz;
pub mod registry;
pub mod rpc;
pub mod schema;
pub mod server;
pub mod service;
pub mod tools;
pub mod web;
pub mod worker;

pub use a2a::A2aHandler;
pub use cache::{CacheStats, SearchCache};
pub use config::Config;
pub use coordinator::{
    CoordinatorConfig, FailureKind, ScoringPolicy, TaskCoordinator, TaskFailure, TaskRequest,
    TaskResult,
};
pub use discovery::AgentCard;
pub use generation::{
    FailureReason, GenerationError, GenerationFailure, GenerationState, Hint, Phase,
    QuizGenerator,
};
pub use generator::{GeneratorError, OpenAiClient, PromptPayload, TextProducer};
pub use mcp::McpServer;
pub use quiz::{GenerationRequest, InvalidRequest, Label, Question, Quiz};
pub use registry::{AgentRegistry, HandlerError, RegistryError, WorkerDescriptor, WorkerStatus};
pub use rpc::{RpcError, RpcRequest, RpcResponse};
pub use server::build_router;
pub use service::QuizService;
pub use web::{ExtractedContent, SearchResult, WebResearch};
