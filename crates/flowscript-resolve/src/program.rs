//! Resolved program: a flat, immutable node arena.
//!
//! References hold indices, never pointers, so cyclic subflow graphs stay
//! representable and the whole program can be shared across concurrent
//! executions behind an `Arc`.

use flowscript_ast::{
    CatchMode, CircuitPolicy, NodeMeta, Quantifier, RetryPolicy, Span, Transition,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One node of the flattened program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedNode {
    pub kind: ResolvedKind,
    /// Visualization and binding side-annotations, carried through from the AST.
    pub meta: NodeMeta,
    /// Compensation step registered when this node succeeds inside a saga.
    pub compensation: Option<String>,
    pub span: Span,
    /// Name of the flow this node was defined in. Keys the policy state
    /// store together with the node id.
    pub flow: String,
}

/// Node kind with children lowered to arena indices.
///
/// Mirrors [`flowscript_ast::NodeKind`] except that `Ref` has been replaced
/// by [`ResolvedKind::FlowCall`] / [`ResolvedKind::LabelJump`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolvedKind {
    Atomic {
        step: String,
    },
    Sequence {
        children: Vec<NodeId>,
    },
    Saga {
        children: Vec<NodeId>,
    },
    Parallel {
        children: Vec<NodeId>,
    },
    Barrier {
        children: Vec<NodeId>,
    },
    Race {
        children: Vec<NodeId>,
    },
    Broadcast {
        children: Vec<NodeId>,
    },
    Branch {
        cases: Vec<(String, NodeId)>,
        default: Option<NodeId>,
    },
    Loop {
        quantifier: Quantifier,
        child: NodeId,
    },
    Guard {
        predicate: String,
        child: NodeId,
    },
    Retry {
        policy: RetryPolicy,
        child: NodeId,
    },
    Timeout {
        duration: Duration,
        fallback: Option<NodeId>,
        child: NodeId,
    },
    CircuitBreaker {
        policy: CircuitPolicy,
        child: NodeId,
    },
    Debounce {
        quiescence: Duration,
        child: NodeId,
    },
    Throttle {
        interval: Duration,
        child: NodeId,
    },
    Detach {
        child: NodeId,
    },
    EventStream {
        topic: String,
        handler: NodeId,
    },
    Catch {
        mode: CatchMode,
        child: NodeId,
        handler: NodeId,
    },
    Label {
        name: String,
        child: NodeId,
    },
    /// `@name`, resolved to an index into the flow table.
    FlowCall {
        flow: usize,
    },
    /// `#name`, resolved to the arena id of the label's definition.
    LabelJump {
        target: NodeId,
    },
    StateMachine {
        name: String,
        transitions: Vec<Transition>,
    },
}

/// The immutable output of resolution, shared across executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedProgram {
    /// Flat node arena; children are referenced by [`NodeId`].
    pub nodes: Vec<ResolvedNode>,
    /// Entry node per flow, in declaration order. [`ResolvedKind::FlowCall`]
    /// indices point into this map.
    pub flows: IndexMap<String, NodeId>,
}

impl ResolvedProgram {
    pub fn node(&self, id: NodeId) -> &ResolvedNode {
        &self.nodes[id.0 as usize]
    }

    /// Entry node of a flow by name.
    pub fn entry(&self, flow: &str) -> Option<NodeId> {
        self.flows.get(flow).copied()
    }

    /// Entry node and name of a flow by table index (for `FlowCall`).
    pub fn flow_by_index(&self, index: usize) -> Option<(&str, NodeId)> {
        self.flows
            .get_index(index)
            .map(|(name, id)| (name.as_str(), *id))
    }

    /// Human-readable label for a node, used in traces and logs.
    pub fn display_name(&self, id: NodeId) -> &str {
        match &self.node(id).kind {
            ResolvedKind::Atomic { step } => step,
            ResolvedKind::Label { name, .. } => name,
            ResolvedKind::EventStream { topic, .. } => topic,
            ResolvedKind::StateMachine { name, .. } => name,
            other => other.kind_name(),
        }
    }
}

impl ResolvedKind {
    /// Short kind name for logging and trace labels.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ResolvedKind::Atomic { .. } => "atomic",
            ResolvedKind::Sequence { .. } => "sequence",
            ResolvedKind::Saga { .. } => "saga",
            ResolvedKind::Parallel { .. } => "parallel",
            ResolvedKind::Barrier { .. } => "barrier",
            ResolvedKind::Race { .. } => "race",
            ResolvedKind::Broadcast { .. } => "broadcast",
            ResolvedKind::Branch { .. } => "branch",
            ResolvedKind::Loop { .. } => "loop",
            ResolvedKind::Guard { .. } => "guard",
            ResolvedKind::Retry { .. } => "retry",
            ResolvedKind::Timeout { .. } => "timeout",
            ResolvedKind::CircuitBreaker { .. } => "circuit-breaker",
            ResolvedKind::Debounce { .. } => "debounce",
            ResolvedKind::Throttle { .. } => "throttle",
            ResolvedKind::Detach { .. } => "detach",
            ResolvedKind::EventStream { .. } => "event-stream",
            ResolvedKind::Catch { .. } => "catch",
            ResolvedKind::Label { .. } => "label",
            ResolvedKind::FlowCall { .. } => "flow-call",
            ResolvedKind::LabelJump { .. } => "label-jump",
            ResolvedKind::StateMachine { .. } => "state-machine",
        }
    }
}
