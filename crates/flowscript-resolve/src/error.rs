//! Resolution errors.
//!
//! All of these are static: they abort compilation entirely, so no partial
//! execution is ever possible.

use flowscript_ast::Span;
use thiserror::Error;

/// A static error found while resolving a parsed program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("undefined subflow `@{name}` referenced from flow `{flow}` at {span}")]
    UnresolvedFlow {
        flow: String,
        name: String,
        span: Span,
    },

    #[error("undefined label `#{name}` in flow `{flow}` at {span}")]
    UnresolvedLabel {
        flow: String,
        name: String,
        span: Span,
    },

    #[error("label `#{name}` is defined twice in flow `{flow}` at {span}")]
    DuplicateLabel {
        flow: String,
        name: String,
        span: Span,
    },

    #[error("cyclic subflow reference: {}", path.join(" -> "))]
    CyclicReference { path: Vec<String> },

    #[error("label `#{label}` in flow `{flow}` refers back to itself")]
    CyclicLabel { flow: String, label: String },

    #[error("branch in flow `{flow}` at {span} requires at least one case")]
    BranchArity { flow: String, span: Span },

    #[error("race in flow `{flow}` at {span} requires at least two arms")]
    RaceArity { flow: String, span: Span },

    #[error("barrier in flow `{flow}` at {span} requires at least two children")]
    BarrierArity { flow: String, span: Span },

    #[error(
        "ambiguous transition in machine `{machine}`: state `{state}` handles event `{event}` twice at {span}"
    )]
    AmbiguousTransition {
        flow: String,
        machine: String,
        state: String,
        event: String,
        span: Span,
    },
}
