// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! FlowScript
//!
//! Unified entry point for the FlowScript compilation pipeline and
//! execution engine. Consolidates lexing, parsing, and resolution into a
//! single API:
//!
//! ```
//! use flowscript::{compile, Engine, ExecutionContext, HandlerRegistry};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let program = compile("main: validate -> persist ! alert")
//!     .map_err(|diags| diags[0].message.clone())?;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("validate", |_input| async move { Ok(serde_json::json!(true)) });
//! // ... persist, alert ...
//!
//! let engine = Engine::new(program, Arc::new(registry));
//! let trace = engine.execute("main", ExecutionContext::new()).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub use flowscript_ast as ast;
pub use flowscript_ast::Program;
pub use flowscript_lexer::{tokenize, LexError, Token};
pub use flowscript_parser::{parse_program, ParseError, ParseErrorKind};
pub use flowscript_resolve::{resolve, NodeId, ResolveError, ResolvedKind, ResolvedProgram};
pub use flowscript_runtime::{
    Engine, EventBus, ExecutionContext, ExecutionFailure, ExecutionTrace, FlowError, HandlerError,
    HandlerRegistry, PolicyStore, StepHandler, StepInput, StepResult, StepStatus, TraceEntry,
    Value,
};

use flowscript_ast::Span;

/// A unified diagnostic from any phase of the compiler.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Human-readable error message.
    pub message: String,
    /// Source location (byte range), if available.
    pub span: Option<Span>,
    /// Severity of the diagnostic.
    pub severity: Severity,
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: None,
            severity: Severity::Error,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.span {
            Some(span) => write!(f, "{} at {}", self.message, span),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Compile FlowScript source to an executable program.
///
/// Runs the full static pipeline — tokenize, parse, resolve — and folds
/// every phase's errors into uniform [`Diagnostic`]s. Any static error
/// aborts compilation entirely; no partial execution is possible.
///
/// The returned program is immutable and cheap to share: one compiled
/// program can back any number of concurrent [`Engine`] executions.
pub fn compile(source: &str) -> Result<Arc<ResolvedProgram>, Vec<Diagnostic>> {
    let tokens = tokenize(source).map_err(|err| {
        let position = err.position as u32;
        vec![Diagnostic::error(err.to_string())
            .with_span(Span::new(position, position + err.fragment.len() as u32))]
    })?;

    let program = parse_program(&tokens).map_err(|errors| {
        errors
            .into_iter()
            .map(|err| Diagnostic::error(err.message.clone()).with_span(err.span))
            .collect::<Vec<_>>()
    })?;

    let resolved = resolve(&program).map_err(|errors| {
        errors
            .into_iter()
            .map(|err| Diagnostic::error(err.to_string()))
            .collect::<Vec<_>>()
    })?;

    Ok(Arc::new(resolved))
}
