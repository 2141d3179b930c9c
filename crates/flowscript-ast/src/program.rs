//! Parsed program: an ordered map of named flows.

use crate::foundation::Span;
use crate::node::Node;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A named top-level flow definition, addressable via `@name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    pub root: Node,
    pub span: Span,
}

/// All flows of one compiled source, in declaration order.
///
/// Programs are immutable after parsing and shared across executions; all
/// per-run state lives in the runtime's execution context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub flows: IndexMap<String, Flow>,
}

impl Program {
    pub fn get(&self, name: &str) -> Option<&Flow> {
        self.flows.get(name)
    }

    pub fn flow_names(&self) -> impl Iterator<Item = &str> {
        self.flows.keys().map(String::as_str)
    }
}
