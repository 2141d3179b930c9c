//! Per-invocation execution context.

use crate::events::EventBus;
use crate::policy::PolicyStore;
use crate::types::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default width of the worker pool concurrent steps are dispatched onto.
pub const DEFAULT_WORKERS: usize = 8;

/// Mutable per-run state, owned exclusively by one execution.
///
/// Holds the initial variable bindings, the optional run deadline, and the
/// handles to shared infrastructure: the policy state store (shared across
/// executions of the same engine, by design) and the event bus. Passed by
/// value into [`Engine::execute`](crate::Engine::execute) and discarded at
/// completion.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub bindings: HashMap<String, Value>,
    /// Cancel the whole run after this long.
    pub deadline: Option<Duration>,
    /// Width of the bounded worker pool.
    pub workers: usize,
    pub policy: Arc<PolicyStore>,
    pub events: EventBus,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
            deadline: None,
            workers: DEFAULT_WORKERS,
            policy: Arc::new(PolicyStore::new()),
            events: EventBus::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Share a policy store across engines or pre-seed one in tests.
    pub fn with_policy_store(mut self, policy: Arc<PolicyStore>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Token the host can use to cancel the run from outside.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
