//! Count-Convergence Generation
//!
//! Drives a non-deterministic generator until exactly `target_count`
//! structurally valid questions are collected, or attempts run out.
//!
//! ```text
//! Init ──► Generating ──► Counting ──┬── equal / more (trim) ──► Validating ──► Validated
//!                            ▲       ├── less, attempts left ──► GeneratingMore ─┐
//!                            │       └── less, exhausted ──────► Failed          │
//!                            └───────────────────────────────────────────────────┘
//! ```
//!
//! [`GenerationState::apply`] is the transition function: it performs no I/O,
//! so every path can be exercised without a generator. [`QuizGenerator`] is
//! the runner that feeds it generator and validator results.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::extraction::{self, ExtractionError};
use crate::generator::{GeneratorError, PromptPayload, TextProducer};
use crate::quiz::{GenerationRequest, InvalidRequest, Quiz};
use crate::schema::{self, ValidationError};

/// State machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Init,
    /// First generation call, asking for the full target
    Generating { requested: usize },
    Counting,
    /// Top-up call, asking only for the shortfall
    GeneratingMore { requested: usize },
    Validating,
    Validated,
    Failed,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Generating { .. } => "generating",
            Phase::Counting => "counting",
            Phase::GeneratingMore { .. } => "generating_more",
            Phase::Validating => "validating",
            Phase::Validated => "validated",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Validated | Phase::Failed)
    }
}

/// Why a single generation call produced nothing usable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptFault {
    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

impl AttemptFault {
    fn is_transport(&self) -> bool {
        matches!(self, AttemptFault::Generator(e) if e.is_transport())
    }
}

/// Input fed to the transition function
#[derive(Debug, Clone)]
pub enum StepInput {
    /// Advance a phase that needs no external result (`Init`, `Counting`)
    Tick,
    /// A generation call returned these items
    Produced(Vec<Value>),
    /// A generation call failed
    Faulted(AttemptFault),
    /// The validator accepted the collection
    Accepted(Quiz),
    /// The validator rejected the collection
    Rejected(ValidationError),
}

impl StepInput {
    fn name(&self) -> &'static str {
        match self {
            StepInput::Tick => "tick",
            StepInput::Produced(_) => "produced",
            StepInput::Faulted(_) => "faulted",
            StepInput::Accepted(_) => "accepted",
            StepInput::Rejected(_) => "rejected",
        }
    }
}

/// Input not accepted in the current phase
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("input '{input}' is not valid in phase '{phase}'")]
pub struct TransitionError {
    pub phase: &'static str,
    pub input: &'static str,
}

/// Record of one generation call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationAttempt {
    pub attempt_number: u32,
    pub requested: usize,
    pub items_produced: usize,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Mutable state of one run
#[derive(Debug, Clone)]
pub struct GenerationState {
    request: GenerationRequest,
    phase: Phase,
    items: Vec<Value>,
    attempts: u32,
    history: Vec<GenerationAttempt>,
    last_error: Option<String>,
    last_fault_phase: &'static str,
    transport_failures: u32,
    quiz: Option<Quiz>,
}

impl GenerationState {
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            request,
            phase: Phase::Init,
            items: Vec::new(),
            attempts: 0,
            history: Vec::new(),
            last_error: None,
            last_fault_phase: Phase::Init.name(),
            transport_failures: 0,
            quiz: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn history(&self) -> &[GenerationAttempt] {
        &self.history
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Apply one input and return the new phase.
    ///
    /// Terminal phases accept no further input.
    pub fn apply(&mut self, input: StepInput) -> Result<Phase, TransitionError> {
        let target = self.request.target_count;

        let next = match (self.phase, input) {
            (Phase::Init, StepInput::Tick) => {
                self.items.clear();
                self.attempts = 0;
                Phase::Generating { requested: target }
            }

            (
                Phase::Generating { requested } | Phase::GeneratingMore { requested },
                StepInput::Produced(new_items),
            ) => {
                self.attempts += 1;
                self.history.push(GenerationAttempt {
                    attempt_number: self.attempts,
                    requested,
                    items_produced: new_items.len(),
                    succeeded: true,
                    error_detail: None,
                    timestamp: Utc::now(),
                });
                self.items.extend(new_items);
                Phase::Counting
            }

            (
                Phase::Generating { requested } | Phase::GeneratingMore { requested },
                StepInput::Faulted(fault),
            ) => {
                self.attempts += 1;
                if fault.is_transport() {
                    self.transport_failures += 1;
                }
                let detail = fault.to_string();
                self.history.push(GenerationAttempt {
                    attempt_number: self.attempts,
                    requested,
                    items_produced: 0,
                    succeeded: false,
                    error_detail: Some(detail.clone()),
                    timestamp: Utc::now(),
                });
                self.last_error = Some(detail);
                self.last_fault_phase = self.phase.name();
                Phase::Counting
            }

            (Phase::Counting, StepInput::Tick) => {
                let current = self.items.len();
                if current == target {
                    Phase::Validating
                } else if current > target {
                    debug!("Trimming {} surplus questions", current - target);
                    self.items.truncate(target);
                    Phase::Validating
                } else if self.attempts < self.request.max_attempts {
                    Phase::GeneratingMore {
                        requested: target - current,
                    }
                } else {
                    self.last_fault_phase = Phase::Counting.name();
                    Phase::Failed
                }
            }

            (Phase::Validating, StepInput::Accepted(quiz)) => {
                self.quiz = Some(quiz);
                Phase::Validated
            }

            (Phase::Validating, StepInput::Rejected(err)) => {
                self.last_error = Some(err.to_string());
                self.last_fault_phase = Phase::Validating.name();
                Phase::Failed
            }

            (phase, input) => {
                return Err(TransitionError {
                    phase: phase.name(),
                    input: input.name(),
                })
            }
        };

        self.phase = next;
        Ok(next)
    }

    /// Consume a terminal state into the caller-facing outcome
    pub fn into_outcome(self) -> Result<Quiz, GenerationFailure> {
        if let (Phase::Validated, Some(quiz)) = (self.phase, self.quiz) {
            return Ok(quiz);
        }

        let exhausted = self.attempts >= self.request.max_attempts
            && self.items.len() < self.request.target_count;
        let reason = if !exhausted {
            FailureReason::ValidationFailed
        } else if self.transport_failures == self.attempts {
            FailureReason::GeneratorUnavailable
        } else {
            FailureReason::AttemptsExhausted
        };

        Err(GenerationFailure {
            topic: self.request.topic,
            target: self.request.target_count,
            achieved: self.items.len(),
            attempts: self.history,
            last_phase: self.last_fault_phase,
            last_error: self.last_error,
            reason,
            hint: reason.hint(),
        })
    }
}

/// Terminal failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Attempts ran out before the count was reached
    AttemptsExhausted,
    /// Every attempt failed to reach the generator
    GeneratorUnavailable,
    /// The count was reached but the questions are malformed
    ValidationFailed,
}

impl FailureReason {
    pub fn hint(&self) -> Hint {
        match self {
            FailureReason::AttemptsExhausted => Hint::SimplifyRequest,
            FailureReason::GeneratorUnavailable => Hint::TryAgain,
            FailureReason::ValidationFailed => Hint::RephraseTopic,
        }
    }
}

/// What the caller should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hint {
    SimplifyRequest,
    TryAgain,
    /// The generator keeps misformatting this topic
    RephraseTopic,
}

impl Hint {
    pub fn message(&self) -> &'static str {
        match self {
            Hint::SimplifyRequest => {
                "try a simpler or narrower topic, or ask for fewer questions"
            }
            Hint::TryAgain => "try again with the same request",
            Hint::RephraseTopic => {
                "rephrase the topic; the generated questions did not fit the five-option format"
            }
        }
    }
}

/// Failure report of a run that did not validate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationFailure {
    pub topic: String,
    pub target: usize,
    pub achieved: usize,
    pub attempts: Vec<GenerationAttempt>,
    pub last_phase: &'static str,
    pub last_error: Option<String>,
    pub reason: FailureReason,
    pub hint: Hint,
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "quiz generation failed after {} attempt(s): {} of {} questions (last phase: {}",
            self.attempts.len(),
            self.achieved,
            self.target,
            self.last_phase
        )?;
        if let Some(err) = &self.last_error {
            write!(f, "; last error: {}", err)?;
        }
        write!(f, "). Hint: {}", self.hint.message())
    }
}

/// Errors returned to callers of the generator
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] InvalidRequest),

    #[error("{0}")]
    Failed(Box<GenerationFailure>),

    #[error("internal state machine error: {0}")]
    Internal(#[from] TransitionError),
}

impl GenerationError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            GenerationError::InvalidRequest(_) => "invalid_request",
            GenerationError::Failed(f) => match f.reason {
                FailureReason::AttemptsExhausted => "count_not_reached",
                FailureReason::GeneratorUnavailable => "generator_unavailable",
                FailureReason::ValidationFailed => "invalid_structure",
            },
            GenerationError::Internal(_) => "internal",
        }
    }

    /// True when resubmitting the same input may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::InvalidRequest(_) => false,
            GenerationError::Failed(f) => f.hint == Hint::TryAgain,
            GenerationError::Internal(_) => true,
        }
    }

    pub fn failure(&self) -> Option<&GenerationFailure> {
        match self {
            GenerationError::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// Structured detail for protocol responses
    pub fn details(&self) -> Value {
        let mut details = json!({
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        });
        if let Some(failure) = self.failure() {
            details["hint"] = json!(failure.hint.message());
            details["report"] = json!(failure);
        }
        details
    }
}

const SYSTEM_PROMPT: &str = "You are an expert quiz author. Respond with JSON only, no prose. \
Use the shape {\"questions\": [{\"question\": string, \"options\": [5 distinct strings], \
\"answer\": one of \"A\"-\"E\", \"explanation\": string}]}. \
Options are labelled A-E in order.";

/// Prompt for one generation call
pub fn build_prompt(
    topic: &str,
    requested: usize,
    existing: usize,
    previous_error: Option<&str>,
) -> PromptPayload {
    let mut user = if existing == 0 {
        format!(
            "Create exactly {} multiple-choice questions about: {}",
            requested, topic
        )
    } else {
        format!(
            "Create exactly {} additional multiple-choice questions about: {}\n\
             {} questions already exist; do not repeat them.",
            requested, topic, existing
        )
    };

    if let Some(err) = previous_error {
        user.push_str(&format!(
            "\n\nThe previous response was rejected: {}. Return exactly {} questions.",
            err, requested
        ));
    }

    PromptPayload::new(SYSTEM_PROMPT, user)
}

/// Runs generation requests against a text producer
#[derive(Clone)]
pub struct QuizGenerator {
    producer: Arc<dyn TextProducer>,
    max_questions: usize,
    max_attempts: u32,
}

impl QuizGenerator {
    pub fn new(producer: Arc<dyn TextProducer>) -> Self {
        Self {
            producer,
            max_questions: usize::MAX,
            max_attempts: u32::MAX,
        }
    }

    /// Reject requests above this many questions
    pub fn with_max_questions(mut self, max_questions: usize) -> Self {
        self.max_questions = max_questions;
        self
    }

    /// Reject requests allowing more than this many generation calls
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Check a request against the configured ceilings
    pub fn check(&self, request: &GenerationRequest) -> Result<(), InvalidRequest> {
        if request.target_count > self.max_questions {
            return Err(InvalidRequest::TooManyQuestions {
                requested: request.target_count,
                max: self.max_questions,
            });
        }
        if request.max_attempts > self.max_attempts {
            return Err(InvalidRequest::TooManyAttempts {
                requested: request.max_attempts,
                max: self.max_attempts,
            });
        }
        Ok(())
    }

    /// Build and run a request
    pub async fn generate(
        &self,
        topic: &str,
        target_count: usize,
        max_attempts: u32,
    ) -> Result<Quiz, GenerationError> {
        let request = GenerationRequest::new(topic, target_count, max_attempts)?;
        self.run(request).await
    }

    /// Run a request to a terminal phase
    pub async fn run(&self, request: GenerationRequest) -> Result<Quiz, GenerationError> {
        self.check(&request)?;

        info!(
            "Generating {} questions about '{}' (max {} attempts)",
            request.target_count, request.topic, request.max_attempts
        );

        let mut state = GenerationState::new(request);

        while !state.phase().is_terminal() {
            let input = match state.phase() {
                Phase::Init | Phase::Counting => StepInput::Tick,
                Phase::Generating { requested } | Phase::GeneratingMore { requested } => {
                    self.attempt(&state, requested).await
                }
                Phase::Validating => {
                    let request = state.request();
                    match schema::validate(
                        &request.topic,
                        state.items(),
                        request.target_count,
                        state.attempts(),
                    ) {
                        Ok(quiz) => StepInput::Accepted(quiz),
                        Err(err) => {
                            warn!("Validation rejected collection: {}", err);
                            StepInput::Rejected(err)
                        }
                    }
                }
                Phase::Validated | Phase::Failed => break,
            };

            if let Err(err) = state.apply(input) {
                error!("Generation state machine: {}", err);
                return Err(err.into());
            }
        }

        match state.into_outcome() {
            Ok(quiz) => {
                info!(
                    "Quiz {} validated with {} questions after {} attempt(s)",
                    quiz.id,
                    quiz.len(),
                    quiz.metadata.attempts
                );
                Ok(quiz)
            }
            Err(failure) => {
                warn!("{}", failure);
                Err(GenerationError::Failed(Box::new(failure)))
            }
        }
    }

    /// One generation call: produce, then extract
    async fn attempt(&self, state: &GenerationState, requested: usize) -> StepInput {
        let prompt = build_prompt(
            &state.request().topic,
            requested,
            state.items().len(),
            state.last_error(),
        );

        debug!(
            "Attempt {}: requesting {} questions",
            state.attempts() + 1,
            requested
        );

        let outcome = match self.producer.produce(&prompt).await {
            Ok(text) => extraction::extract(&text, requested)
                .map(|c| c.items)
                .map_err(AttemptFault::from),
            Err(err) => Err(AttemptFault::from(err)),
        };

        match outcome {
            Ok(items) => {
                info!(
                    "Attempt {}: received {} of {} requested questions",
                    state.attempts() + 1,
                    items.len(),
                    requested
                );
                StepInput::Produced(items)
            }
            Err(fault) => {
                warn!("Attempt {} failed: {}", state.attempts() + 1, fault);
                StepInput::Faulted(fault)
            }
        }
    }
}
