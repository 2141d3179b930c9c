// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! AST types for FlowScript
//!
//! This crate contains all AST node definitions, modifier payloads, and
//! foundation types shared by the parser, resolver, and runtime. Flows are
//! compiled once into these immutable definitions and shared across
//! concurrent executions.

pub mod foundation;
pub mod node;
pub mod program;

pub use foundation::{BackoffStrategy, CircuitPolicy, Quantifier, RetryPolicy, Span};
pub use node::{CatchMode, Node, NodeKind, NodeMeta, RefKind, Transition};
pub use program::{Flow, Program};
