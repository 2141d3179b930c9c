// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Resolution and validation for FlowScript.
//!
//! Takes the parsed [`Program`](flowscript_ast::Program), validates every
//! `@flow` and `#label` reference, rejects reference cycles and ambiguous
//! state machines, and lowers the AST forest into a flat node arena the
//! runtime can execute. All static errors are reported here, before any
//! execution begins.

pub mod error;
pub mod program;
pub mod resolve;

pub use error::ResolveError;
pub use program::{NodeId, ResolvedKind, ResolvedNode, ResolvedProgram};
pub use resolve::resolve;
