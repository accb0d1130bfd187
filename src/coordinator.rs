//! Task Coordinator
//!
//! Routes tasks to registered workers:
//! - Filter on status and capabilities
//! - Score candidates, ties broken by registration order
//! - Dispatch with timeout, at most one result per task id
//! - Record the outcome into task history and worker performance

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::registry::{AgentRegistry, HandlerError, RegistryError, WorkerDescriptor, WorkerStatus};

/// Weights of the worker score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub base: f64,
    pub success_weight: f64,
    pub busy_penalty: f64,
    pub load_weight: f64,
    pub priority_weight: f64,
    /// Bonus for a worker whose average duration is near zero
    pub speed_weight: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            base: 1.0,
            success_weight: 2.0,
            busy_penalty: 0.5,
            load_weight: 0.25,
            priority_weight: 0.1,
            speed_weight: 1.0,
        }
    }
}

impl ScoringPolicy {
    /// Non-negative score; higher is better
    pub fn score(&self, worker: &WorkerDescriptor, priority: u8) -> f64 {
        let perf = &worker.performance;
        let busy = if worker.status == WorkerStatus::Busy {
            self.busy_penalty
        } else {
            0.0
        };
        let speed = self.speed_weight / (1.0 + perf.average_duration_ms / 1000.0);

        let score = self.base + perf.success_rate * self.success_weight - busy
            - worker.load() as f64 * self.load_weight
            + priority as f64 * self.priority_weight
            + speed;
        score.max(0.0)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Used when a task carries no timeout
    pub default_timeout: Duration,
    /// Task results kept in history
    pub history_limit: usize,
    pub scoring: ScoringPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(120),
            history_limit: 1000,
            scoring: ScoringPolicy::default(),
        }
    }
}

/// A unit of work for some worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default = "new_task_id")]
    pub id: String,
    /// Capability whose handler runs the task
    pub capability: String,
    #[serde(default)]
    pub params: Value,
    /// Further capabilities the worker must offer
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}

impl TaskRequest {
    pub fn new(capability: &str, params: Value) -> Self {
        Self {
            id: new_task_id(),
            capability: capability.to_string(),
            params,
            required_capabilities: Vec::new(),
            priority: 0,
            timeout_ms: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn requiring(mut self, capability: &str) -> Self {
        self.required_capabilities.push(capability.to_string());
        self
    }

    /// The dispatched capability plus every extra requirement
    pub fn all_required(&self) -> Vec<&str> {
        let mut required = vec![self.capability.as_str()];
        required.extend(
            self.required_capabilities
                .iter()
                .map(String::as_str)
                .filter(|c| *c != self.capability),
        );
        required
    }
}

/// Failure category of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoEligibleWorker,
    UnknownWorker,
    WorkerInactive,
    MissingCapability,
    DuplicateTask,
    DispatchTimeout,
    DispatchFailure,
}

impl FailureKind {
    /// True when the same task may succeed if submitted again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::NoEligibleWorker
                | FailureKind::WorkerInactive
                | FailureKind::DispatchTimeout
                | FailureKind::DispatchFailure
        )
    }
}

/// Error detail of a failed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Structured detail reported by the worker's handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Coordinator errors, normalized into failed [`TaskResult`]s
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("no eligible worker offers {}", .required.join(", "))]
    NoEligibleWorker { required: Vec<String> },

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("worker {0} is inactive")]
    WorkerInactive(String),

    #[error("worker {worker} does not offer {capability}")]
    MissingCapability { worker: String, capability: String },

    #[error("task {0} is already in flight")]
    DuplicateTask(String),

    #[error("task timed out after {0}ms")]
    DispatchTimeout(u64),

    #[error("worker failed: {message}")]
    DispatchFailure {
        message: String,
        details: Option<Value>,
    },
}

impl CoordinatorError {
    pub fn dispatch_failure(message: impl Into<String>) -> Self {
        CoordinatorError::DispatchFailure {
            message: message.into(),
            details: None,
        }
    }

    /// Keep a [`HandlerError`]'s details when a handler fails
    fn from_handler(err: anyhow::Error) -> Self {
        let details = err.downcast_ref::<HandlerError>().map(|e| e.details.clone());
        CoordinatorError::DispatchFailure {
            message: format!("{:#}", err),
            details,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            CoordinatorError::NoEligibleWorker { .. } => FailureKind::NoEligibleWorker,
            CoordinatorError::UnknownWorker(_) => FailureKind::UnknownWorker,
            CoordinatorError::WorkerInactive(_) => FailureKind::WorkerInactive,
            CoordinatorError::MissingCapability { .. } => FailureKind::MissingCapability,
            CoordinatorError::DuplicateTask(_) => FailureKind::DuplicateTask,
            CoordinatorError::DispatchTimeout(_) => FailureKind::DispatchTimeout,
            CoordinatorError::DispatchFailure { .. } => FailureKind::DispatchFailure,
        }
    }
}

impl From<RegistryError> for CoordinatorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownWorker(id) => CoordinatorError::UnknownWorker(id),
            RegistryError::WorkerInactive(id) => CoordinatorError::WorkerInactive(id),
            RegistryError::MissingHandler { worker, capability } => {
                CoordinatorError::MissingCapability { worker, capability }
            }
            other => CoordinatorError::dispatch_failure(other.to_string()),
        }
    }
}

impl From<&CoordinatorError> for TaskFailure {
    fn from(err: &CoordinatorError) -> Self {
        let details = match err {
            CoordinatorError::DispatchFailure { details, .. } => details.clone(),
            _ => None,
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            details,
        }
    }
}

/// Outcome of one submitted task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    /// None when the task never reached a worker
    pub worker_id: Option<String>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    fn succeeded(task_id: &str, worker_id: &str, payload: Value, duration_ms: u64) -> Self {
        Self {
            task_id: task_id.to_string(),
            success: true,
            payload: Some(payload),
            error: None,
            worker_id: Some(worker_id.to_string()),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    fn failed(
        task_id: &str,
        worker_id: Option<&str>,
        err: &CoordinatorError,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            success: false,
            payload: None,
            error: Some(err.into()),
            worker_id: worker_id.map(str::to_string),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// In-flight ids and task history, shared with dispatch supervisors
#[derive(Clone)]
struct Ledger {
    registry: Arc<AgentRegistry>,
    in_flight: Arc<Mutex<HashMap<String, String>>>,
    history: Arc<Mutex<VecDeque<TaskResult>>>,
    history_limit: usize,
}

impl Ledger {
    /// Single completion point of a dispatched task
    fn finish(
        &self,
        task_id: &str,
        worker_id: &str,
        outcome: Result<Value, CoordinatorError>,
        elapsed: Duration,
    ) -> TaskResult {
        self.in_flight.lock().remove(task_id);

        let duration_ms = elapsed.as_millis() as u64;
        self.registry
            .record_completion(worker_id, task_id, elapsed.as_secs_f64() * 1000.0, outcome.is_ok());

        let result = match outcome {
            Ok(payload) => {
                info!("Task {} completed by {} in {}ms", task_id, worker_id, duration_ms);
                TaskResult::succeeded(task_id, worker_id, payload, duration_ms)
            }
            Err(err) => {
                warn!("Task {} failed on {}: {}", task_id, worker_id, err);
                TaskResult::failed(task_id, Some(worker_id), &err, duration_ms)
            }
        };

        self.append(result.clone());
        result
    }

    fn append(&self, result: TaskResult) {
        let mut history = self.history.lock();
        history.push_back(result);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }
}

/// Task coordinator
pub struct TaskCoordinator {
    config: CoordinatorConfig,
    registry: Arc<AgentRegistry>,
    ledger: Ledger,
}

impl TaskCoordinator {
    pub fn new(registry: Arc<AgentRegistry>, config: CoordinatorConfig) -> Self {
        let ledger = Ledger {
            registry: registry.clone(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(Mutex::new(VecDeque::new())),
            history_limit: config.history_limit,
        };
        Self {
            config,
            registry,
            ledger,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Highest-scoring eligible worker; the earliest registered wins ties
    pub fn select(&self, task: &TaskRequest) -> Option<WorkerDescriptor> {
        let required = task.all_required();
        let mut best: Option<(f64, WorkerDescriptor)> = None;

        for worker in self.registry.list() {
            if worker.status == WorkerStatus::Inactive || !worker.has_capabilities(&required) {
                continue;
            }
            let score = self.config.scoring.score(&worker, task.priority);
            debug!("Candidate {} scored {:.3}", worker.id, score);

            if best.as_ref().map_or(true, |(top, _)| score > *top) {
                best = Some((score, worker));
            }
        }

        best.map(|(_, worker)| worker)
    }

    /// Submit to the best eligible worker
    pub async fn submit(&self, task: TaskRequest) -> TaskResult {
        info!("Task submitted: {} (capability: {})", task.id, task.capability);

        match self.select(&task) {
            Some(worker) => {
                info!("Task {} assigned to {}", task.id, worker.id);
                self.dispatch(task, &worker.id).await
            }
            None => {
                let err = CoordinatorError::NoEligibleWorker {
                    required: task.all_required().iter().map(|c| c.to_string()).collect(),
                };
                warn!("Task {} rejected: {}", task.id, err);
                self.reject(&task, None, err)
            }
        }
    }

    /// Submit to a named worker
    pub async fn submit_to(&self, task: TaskRequest, worker_id: &str) -> TaskResult {
        info!("Task submitted: {} (worker: {})", task.id, worker_id);

        let worker = match self.registry.get(worker_id) {
            Some(worker) => worker,
            None => {
                return self.reject(
                    &task,
                    None,
                    CoordinatorError::UnknownWorker(worker_id.to_string()),
                )
            }
        };
        if worker.status == WorkerStatus::Inactive {
            return self.reject(
                &task,
                Some(worker_id),
                CoordinatorError::WorkerInactive(worker_id.to_string()),
            );
        }
        if let Some(missing) = task.all_required().into_iter().find(|c| !worker.has_capability(c)) {
            return self.reject(
                &task,
                Some(worker_id),
                CoordinatorError::MissingCapability {
                    worker: worker_id.to_string(),
                    capability: missing.to_string(),
                },
            );
        }

        self.dispatch(task, worker_id).await
    }

    /// Most recent results last
    pub fn history(&self, limit: Option<usize>) -> Vec<TaskResult> {
        let history = self.ledger.history.lock();
        let skip = limit.map_or(0, |n| history.len().saturating_sub(n));
        history.iter().skip(skip).cloned().collect()
    }

    /// Task ids currently dispatched
    pub fn in_flight(&self) -> Vec<String> {
        self.ledger.in_flight.lock().keys().cloned().collect()
    }

    async fn dispatch(&self, task: TaskRequest, worker_id: &str) -> TaskResult {
        {
            let mut in_flight = self.ledger.in_flight.lock();
            if in_flight.contains_key(&task.id) {
                drop(in_flight);
                return self.reject(
                    &task,
                    None,
                    CoordinatorError::DuplicateTask(task.id.clone()),
                );
            }
            in_flight.insert(task.id.clone(), worker_id.to_string());
        }

        let handler = match self.registry.begin_task(worker_id, &task.id, &task.capability) {
            Ok(handler) => handler,
            Err(err) => {
                self.ledger.in_flight.lock().remove(&task.id);
                return self.reject(&task, Some(worker_id), err.into());
            }
        };

        let timeout = task
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_timeout);
        let started = Instant::now();

        let (tx, rx) = oneshot::channel();
        let work = handler(task.params.clone());
        let late_task_id = task.id.clone();
        tokio::spawn(async move {
            let result = work.await;
            if tx.send(result).is_err() {
                warn!("Late completion for task {} ignored", late_task_id);
            }
        });

        // Completion runs in its own task so a dropped caller cannot skip it
        let ledger = self.ledger.clone();
        let task_id = task.id.clone();
        let worker = worker_id.to_string();
        let supervisor = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(Ok(payload))) => Ok(payload),
                Ok(Ok(Err(err))) => Err(CoordinatorError::from_handler(err)),
                Ok(Err(_)) => Err(CoordinatorError::dispatch_failure("worker handler aborted")),
                Err(_) => {
                    warn!("Task {} timed out after {:?} on {}", task_id, timeout, worker);
                    Err(CoordinatorError::DispatchTimeout(timeout.as_millis() as u64))
                }
            };
            ledger.finish(&task_id, &worker, outcome, started.elapsed())
        });

        match supervisor.await {
            Ok(result) => result,
            Err(e) => {
                error!("Supervisor for task {} failed: {}", task.id, e);
                let err = CoordinatorError::dispatch_failure(format!("supervisor failed: {}", e));
                TaskResult::failed(
                    &task.id,
                    Some(worker_id),
                    &err,
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }

    /// Failure before any handler ran; no worker is mutated
    fn reject(&self, task: &TaskRequest, worker_id: Option<&str>, err: CoordinatorError) -> TaskResult {
        let result = TaskResult::failed(&task.id, worker_id, &err, 0);
        self.ledger.append(result.clone());
        result
    }
}
