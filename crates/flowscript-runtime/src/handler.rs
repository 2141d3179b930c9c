//! Step handler registry.
//!
//! Step bodies are host code: names resolve at runtime through this
//! registry, modeled as injected capabilities rather than compile-time
//! bindings. Guard and branch predicates live in a separate namespace.

use crate::types::Value;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Error returned by a host step handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

/// Result of one handler invocation.
pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// Everything a step handler gets to see.
#[derive(Debug, Clone)]
pub struct StepInput {
    /// The step (or predicate) name being invoked.
    pub step: String,
    /// Context variable bindings visible at this point of the flow.
    pub bindings: Arc<HashMap<String, Value>>,
    /// Success value of the previous step in the enclosing sequence.
    pub prior: Option<Value>,
    /// Cancellation signal; long-running handlers should observe it.
    pub cancel: CancellationToken,
}

impl StepInput {
    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

/// A named unit of work supplied by the host.
pub trait StepHandler: Send + Sync {
    fn invoke(&self, input: StepInput) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter turning an async closure into a [`StepHandler`].
struct FnHandler<F>(F);

impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(StepInput) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn invoke(&self, input: StepInput) -> BoxFuture<'static, HandlerResult> {
        (self.0)(input).boxed()
    }
}

/// Opaque predicate evaluated by the host for guards and branch conditions.
pub type Predicate = dyn Fn(&StepInput) -> bool + Send + Sync;

/// Maps step and predicate names to host implementations.
#[derive(Default)]
pub struct HandlerRegistry {
    steps: HashMap<String, Arc<dyn StepHandler>>,
    predicates: HashMap<String, Arc<Predicate>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async closure as a step handler.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(StepInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.steps.insert(name.into(), Arc::new(FnHandler(handler)));
    }

    /// Register a pre-built handler object.
    pub fn register_handler(&mut self, name: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.steps.insert(name.into(), handler);
    }

    /// Register a guard/branch predicate.
    pub fn register_predicate<P>(&mut self, name: impl Into<String>, predicate: P)
    where
        P: Fn(&StepInput) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    pub fn step(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.steps.get(name).cloned()
    }

    pub fn predicate(&self, name: &str) -> Option<Arc<Predicate>> {
        self.predicates.get(name).cloned()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("predicates", &self.predicates.keys().collect::<Vec<_>>())
            .finish()
    }
}
