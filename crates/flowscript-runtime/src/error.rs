//! Runtime errors.
//!
//! All of these are dynamic: scoped to one execution, propagating up the
//! node tree until a catch combinator or saga compensation handles them.
//! Uncaught, they abort the execution and come back to the caller inside
//! [`ExecutionFailure`] with the partial trace attached.

use crate::trace::ExecutionTrace;
use std::time::Duration;
use thiserror::Error;

/// Runtime result type.
pub type Result<T> = std::result::Result<T, FlowError>;

/// A dynamic error raised during one flow execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("step `{step}` failed: {message}")]
    Step { step: String, message: String },

    #[error("no handler registered for step `{0}`")]
    HandlerNotFound(String),

    #[error("no predicate registered for guard `{0}`")]
    PredicateNotFound(String),

    #[error("step `{step}` timed out after {after:?}")]
    Timeout { step: String, after: Duration },

    #[error("retry exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<FlowError>,
    },

    #[error("circuit open for step `{step}`")]
    CircuitOpen { step: String },

    #[error("guard predicate `{predicate}` rejected the transition")]
    GuardFailed { predicate: String },

    #[error("no branch case matched discriminant `{discriminant}`")]
    UnmatchedBranch { discriminant: String },

    #[error("compensation `{compensation}` failed: {message}; unwinding aborted")]
    Compensation {
        compensation: String,
        message: String,
    },

    #[error("execution cancelled")]
    Cancelled,

    #[error("unknown entry flow `{0}`")]
    UnknownFlow(String),
}

/// An aborted execution: the terminal error plus the partial trace.
#[derive(Debug, Clone, Error)]
#[error("execution aborted: {error}")]
pub struct ExecutionFailure {
    pub error: FlowError,
    pub trace: ExecutionTrace,
}
