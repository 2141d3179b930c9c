// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! FlowScript execution engine.
//!
//! A tree-walking async interpreter over the resolved node arena. One
//! execution fans out onto a bounded worker pool for Parallel / Barrier /
//! Race children, observes cooperative cancellation through
//! `CancellationToken`s, and records an ordered [`ExecutionTrace`] of every
//! step outcome.
//!
//! All mutable cross-execution state lives in the [`PolicyStore`], passed in
//! explicitly through the [`ExecutionContext`] so engine instances never
//! cross-contaminate.

pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod handler;
pub mod policy;
pub mod trace;
pub mod types;

pub use context::ExecutionContext;
pub use engine::Engine;
pub use error::{ExecutionFailure, FlowError, Result};
pub use events::EventBus;
pub use handler::{HandlerError, HandlerRegistry, HandlerResult, StepHandler, StepInput};
pub use policy::{CircuitState, PolicyKey, PolicyStore};
pub use trace::{ExecutionTrace, TraceEntry};
pub use types::{StepResult, StepStatus, Value};
