//! Agent Registry
//!
//! Worker descriptors keyed by identity, each paired with a typed table of
//! capability handlers. Mutations take the registry lock for the whole
//! read-modify-write and never hold it across an `.await`.

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Async handler for one capability
pub type CapabilityHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Capability name to handler
pub type HandlerTable = HashMap<String, CapabilityHandler>;

/// Wrap an async closure as a [`CapabilityHandler`]
pub fn handler<F, Fut>(f: F) -> CapabilityHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |params| f(params).boxed())
}

/// Handler failure that carries structured detail into the task result
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub details: Value,
}

impl HandlerError {
    pub fn new(message: impl Into<String>, details: Value) -> Self {
        Self {
            message: message.into(),
            details,
        }
    }
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("worker id must not be empty")]
    EmptyId,

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("worker {0} is inactive")]
    WorkerInactive(String),

    #[error("unknown worker status '{0}' (expected active, busy or inactive)")]
    UnknownStatus(String),

    #[error("worker {worker} has no handler for capability '{capability}'")]
    MissingHandler { worker: String, capability: String },

    #[error("worker {0} cannot be set busy; busy follows running tasks")]
    BusyIsDerived(String),
}

/// Worker availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Active,
    Busy,
    Inactive,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Active => "active",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(WorkerStatus::Active),
            "busy" => Ok(WorkerStatus::Busy),
            "inactive" => Ok(WorkerStatus::Inactive),
            other => Err(RegistryError::UnknownStatus(other.to_string())),
        }
    }
}

/// Rolling performance statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub completed_count: u64,
    pub average_duration_ms: f64,
    /// Fraction of successful tasks, 1.0 before the first completion
    pub success_rate: f64,
}

impl Default for Performance {
    fn default() -> Self {
        Self {
            completed_count: 0,
            average_duration_ms: 0.0,
            success_rate: 1.0,
        }
    }
}

impl Performance {
    /// Fold one completion into the exact running means
    pub fn record(&mut self, duration_ms: f64, success: bool) {
        let old = self.completed_count as f64;
        let new = old + 1.0;
        let outcome = if success { 1.0 } else { 0.0 };

        self.average_duration_ms = (self.average_duration_ms * old + duration_ms) / new;
        self.success_rate = (self.success_rate * old + outcome) / new;
        self.completed_count += 1;
    }
}

/// Registered worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub id: String,
    pub display_name: String,
    /// Capability name to input schema
    pub capabilities: BTreeMap<String, Value>,
    pub status: WorkerStatus,
    #[serde(default)]
    pub current_task_ids: Vec<String>,
    #[serde(default)]
    pub performance: Performance,
    /// Base URL of a remote agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl WorkerDescriptor {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            capabilities: BTreeMap::new(),
            status: WorkerStatus::Active,
            current_task_ids: Vec::new(),
            performance: Performance::default(),
            endpoint: None,
            registered_at: Utc::now(),
        }
    }

    /// Add a capability with its input schema
    pub fn with_capability(mut self, name: &str, schema: Value) -> Self {
        self.capabilities.insert(name.to_string(), schema);
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// True when every name in `required` is offered
    pub fn has_capabilities<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.iter().all(|c| self.has_capability(c.as_ref()))
    }

    /// Number of tasks in flight
    pub fn load(&self) -> usize {
        self.current_task_ids.len()
    }
}

struct Entry {
    seq: u64,
    descriptor: WorkerDescriptor,
    handlers: HandlerTable,
}

#[derive(Default)]
struct Inner {
    workers: HashMap<String, Entry>,
    next_seq: u64,
}

/// Registry of workers and their handlers
#[derive(Default)]
pub struct AgentRegistry {
    inner: Mutex<Inner>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, replacing any prior registration with the same id.
    ///
    /// Every advertised capability needs a handler. A replaced worker moves to
    /// the end of the registration order.
    pub fn register(
        &self,
        descriptor: WorkerDescriptor,
        handlers: HandlerTable,
    ) -> Result<(), RegistryError> {
        if descriptor.id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if let Some(missing) = descriptor
            .capabilities
            .keys()
            .find(|c| !handlers.contains_key(*c))
        {
            return Err(RegistryError::MissingHandler {
                worker: descriptor.id.clone(),
                capability: missing.clone(),
            });
        }

        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let id = descriptor.id.clone();
        let capabilities = descriptor.capabilities.len();
        let replaced = inner
            .workers
            .insert(
                id.clone(),
                Entry {
                    seq,
                    descriptor,
                    handlers,
                },
            )
            .is_some();

        if replaced {
            info!("Worker re-registered: {} ({} capabilities)", id, capabilities);
        } else {
            info!("Worker registered: {} ({} capabilities)", id, capabilities);
        }
        Ok(())
    }

    /// Remove a worker
    pub fn unregister(&self, id: &str) -> Option<WorkerDescriptor> {
        let removed = self.inner.lock().workers.remove(id).map(|e| e.descriptor);
        if removed.is_some() {
            info!("Worker unregistered: {}", id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<WorkerDescriptor> {
        self.inner.lock().workers.get(id).map(|e| e.descriptor.clone())
    }

    /// All workers in registration order
    pub fn list(&self) -> Vec<WorkerDescriptor> {
        let inner = self.inner.lock();
        let mut entries: Vec<&Entry> = inner.workers.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set a worker active or inactive; `Busy` is only ever derived from tasks
    pub fn set_status(&self, id: &str, status: WorkerStatus) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .workers
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownWorker(id.to_string()))?;
        let status = match status {
            WorkerStatus::Busy => return Err(RegistryError::BusyIsDerived(id.to_string())),
            WorkerStatus::Active if !entry.descriptor.current_task_ids.is_empty() => {
                WorkerStatus::Busy
            }
            other => other,
        };
        debug!("Worker {} status: {} -> {}", id, entry.descriptor.status, status);
        entry.descriptor.status = status;
        Ok(())
    }

    /// Mark a worker busy with `task_id` and hand back its handler
    pub fn begin_task(
        &self,
        id: &str,
        task_id: &str,
        capability: &str,
    ) -> Result<CapabilityHandler, RegistryError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .workers
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownWorker(id.to_string()))?;

        if entry.descriptor.status == WorkerStatus::Inactive {
            return Err(RegistryError::WorkerInactive(id.to_string()));
        }
        let handler = entry
            .handlers
            .get(capability)
            .cloned()
            .ok_or_else(|| RegistryError::MissingHandler {
                worker: id.to_string(),
                capability: capability.to_string(),
            })?;

        entry.descriptor.status = WorkerStatus::Busy;
        entry.descriptor.current_task_ids.push(task_id.to_string());
        Ok(handler)
    }

    /// Record a finished task: the single mutation point for performance.
    ///
    /// Returns false when the worker was unregistered while the task ran.
    pub fn record_completion(
        &self,
        id: &str,
        task_id: &str,
        duration_ms: f64,
        success: bool,
    ) -> bool {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.workers.get_mut(id) else {
            warn!("Completion for task {} on unknown worker {}", task_id, id);
            return false;
        };

        let descriptor = &mut entry.descriptor;
        descriptor.current_task_ids.retain(|t| t != task_id);
        if descriptor.current_task_ids.is_empty() && descriptor.status == WorkerStatus::Busy {
            descriptor.status = WorkerStatus::Active;
        }
        descriptor.performance.record(duration_ms, success);

        debug!(
            "Worker {} performance: count={}, avg={:.1}ms, success={:.2}",
            id,
            descriptor.performance.completed_count,
            descriptor.performance.average_duration_ms,
            descriptor.performance.success_rate
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> CapabilityHandler {
        handler(|params| async move { Ok(params) })
    }

    fn worker(id: &str, caps: &[&str]) -> (WorkerDescriptor, HandlerTable) {
        let mut descriptor = WorkerDescriptor::new(id, id);
        let mut handlers = HandlerTable::new();
        for cap in caps {
            descriptor = descriptor.with_capability(cap, json!({ "type": "object" }));
            handlers.insert(cap.to_string(), echo());
        }
        (descriptor, handlers)
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("busy".parse::<WorkerStatus>().unwrap(), WorkerStatus::Busy);
        assert_eq!(
            "sleeping".parse::<WorkerStatus>(),
            Err(RegistryError::UnknownStatus("sleeping".to_string()))
        );
        assert!("Active".parse::<WorkerStatus>().is_err());
        assert_eq!(serde_json::to_value(WorkerStatus::Inactive).unwrap(), "inactive");
    }

    #[test]
    fn test_list_in_registration_order() {
        let registry = AgentRegistry::new();
        for id in ["w1", "w2", "w3"] {
            let (d, h) = worker(id, &["quiz"]);
            registry.register(d, h).unwrap();
        }
        let ids: Vec<_> = registry.list().into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec!["w1", "w2", "w3"]);
    }

    #[test]
    fn test_reregistration_replaces_descriptor() {
        let registry = AgentRegistry::new();
        let (d, h) = worker("w1", &["quiz"]);
        registry.register(d, h).unwrap();
        let (d, h) = worker("w2", &["quiz"]);
        registry.register(d, h).unwrap();

        let (d, h) = worker("w1", &["search"]);
        registry.register(d, h).unwrap();

        let w1 = registry.get("w1").unwrap();
        assert!(w1.has_capability("search"));
        assert!(!w1.has_capability("quiz"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.list()[1].id, "w1");
    }

    #[test]
    fn test_register_requires_handlers() {
        let registry = AgentRegistry::new();
        let (d, _) = worker("w1", &["quiz"]);
        let err = registry.register(d, HandlerTable::new()).unwrap_err();
        assert!(matches!(err, RegistryError::MissingHandler { .. }));

        let (mut d, h) = worker("w1", &[]);
        d.id = " ".to_string();
        assert_eq!(registry.register(d, h), Err(RegistryError::EmptyId));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_incremental_means() {
        let mut perf = Performance::default();
        perf.record(100.0, true);
        perf.record(200.0, false);
        perf.record(600.0, true);
        assert_eq!(perf.completed_count, 3);
        assert!((perf.average_duration_ms - 300.0).abs() < 1e-9);
        assert!((perf.success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_begin_and_complete_task() {
        let registry = AgentRegistry::new();
        let (d, h) = worker("w1", &["quiz"]);
        registry.register(d, h).unwrap();

        registry.begin_task("w1", "t1", "quiz").unwrap();
        registry.begin_task("w1", "t2", "quiz").unwrap();
        let w1 = registry.get("w1").unwrap();
        assert_eq!(w1.status, WorkerStatus::Busy);
        assert_eq!(w1.load(), 2);

        assert!(registry.record_completion("w1", "t1", 10.0, true));
        assert_eq!(registry.get("w1").unwrap().status, WorkerStatus::Busy);

        assert!(registry.record_completion("w1", "t2", 30.0, false));
        let w1 = registry.get("w1").unwrap();
        assert_eq!(w1.status, WorkerStatus::Active);
        assert!(w1.current_task_ids.is_empty());
        assert_eq!(w1.performance.completed_count, 2);
        assert!((w1.performance.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_inactive_worker_cannot_begin() {
        let registry = AgentRegistry::new();
        let (d, h) = worker("w1", &["quiz"]);
        registry.register(d, h).unwrap();
        registry.set_status("w1", WorkerStatus::Inactive).unwrap();

        assert!(matches!(
            registry.begin_task("w1", "t1", "quiz"),
            Err(RegistryError::WorkerInactive(_))
        ));
        assert!(registry.get("w1").unwrap().current_task_ids.is_empty());
        assert!(matches!(
            registry.begin_task("nobody", "t1", "quiz"),
            Err(RegistryError::UnknownWorker(_))
        ));
    }

    #[test]
    fn test_inactive_set_mid_flight_is_kept() {
        let registry = AgentRegistry::new();
        let (d, h) = worker("w1", &["quiz"]);
        registry.register(d, h).unwrap();

        registry.begin_task("w1", "t1", "quiz").unwrap();
        registry.set_status("w1", WorkerStatus::Inactive).unwrap();
        registry.record_completion("w1", "t1", 5.0, true);
        assert_eq!(registry.get("w1").unwrap().status, WorkerStatus::Inactive);
    }

    #[test]
    fn test_busy_cannot_be_set_by_hand() {
        let registry = AgentRegistry::new();
        let (d, h) = worker("w1", &["quiz"]);
        registry.register(d, h).unwrap();

        assert!(matches!(
            registry.set_status("w1", WorkerStatus::Busy),
            Err(RegistryError::BusyIsDerived(_))
        ));
        assert_eq!(registry.get("w1").unwrap().status, WorkerStatus::Active);

        registry.begin_task("w1", "t1", "quiz").unwrap();
        registry.set_status("w1", WorkerStatus::Inactive).unwrap();
        registry.set_status("w1", WorkerStatus::Active).unwrap();
        assert_eq!(registry.get("w1").unwrap().status, WorkerStatus::Busy);

        registry.record_completion("w1", "t1", 5.0, true);
        assert_eq!(registry.get("w1").unwrap().status, WorkerStatus::Active);
    }

    #[test]
    fn test_completion_after_unregister() {
        let registry = AgentRegistry::new();
        let (d, h) = worker("w1", &["quiz"]);
        registry.register(d, h).unwrap();
        registry.begin_task("w1", "t1", "quiz").unwrap();
        assert!(registry.unregister("w1").is_some());
        assert!(!registry.record_completion("w1", "t1", 1.0, true));
    }

    #[tokio::test]
    async fn test_handler_invocation() {
        let registry = AgentRegistry::new();
        let (d, h) = worker("w1", &["quiz"]);
        registry.register(d, h).unwrap();

        let handler = registry.begin_task("w1", "t1", "quiz").unwrap();
        let result = handler(json!({ "topic": "rust" })).await.unwrap();
        assert_eq!(result["topic"], "rust");
    }
}
