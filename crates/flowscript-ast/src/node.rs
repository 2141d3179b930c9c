//! AST node definitions.
//!
//! A flow is a tree of [`Node`]s. Every node owns its children exclusively
//! except [`NodeKind::Ref`], which holds a *name* until the resolver replaces
//! it with an index — cyclic subflow graphs stay representable without
//! ownership cycles.

use crate::foundation::{CircuitPolicy, Quantifier, RetryPolicy, Span};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One node of a flow tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    /// Visualization and binding side-annotations. Never execution wrappers.
    pub meta: NodeMeta,
    /// Compensation step registered when this node succeeds inside a saga.
    pub compensation: Option<String>,
    pub span: Span,
}

impl Node {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Self {
            kind,
            meta: NodeMeta::default(),
            compensation: None,
            span,
        }
    }

    /// Visit every child node, in declaration order.
    pub fn for_each_child<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        match &self.kind {
            NodeKind::Atomic { .. } | NodeKind::Ref(_) | NodeKind::StateMachine { .. } => {}
            NodeKind::Sequence { children }
            | NodeKind::Saga { children }
            | NodeKind::Parallel { children }
            | NodeKind::Barrier { children }
            | NodeKind::Race { children }
            | NodeKind::Broadcast { children } => {
                for child in children {
                    f(child);
                }
            }
            NodeKind::Branch { cases, default } => {
                for (_, child) in cases {
                    f(child);
                }
                if let Some(child) = default {
                    f(child);
                }
            }
            NodeKind::Loop { child, .. }
            | NodeKind::Guard { child, .. }
            | NodeKind::Retry { child, .. }
            | NodeKind::CircuitBreaker { child, .. }
            | NodeKind::Debounce { child, .. }
            | NodeKind::Throttle { child, .. }
            | NodeKind::Detach { child }
            | NodeKind::Label { child, .. } => f(child),
            NodeKind::Timeout {
                child, fallback, ..
            } => {
                f(child);
                if let Some(fb) = fallback {
                    f(fb);
                }
            }
            NodeKind::EventStream { handler, .. } => f(handler),
            NodeKind::Catch { child, handler, .. } => {
                f(child);
                f(handler);
            }
        }
    }

    /// Depth-first walk over this node and all descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        self.for_each_child(&mut |child| child.walk(&mut *f));
    }
}

/// Side-annotations carried by any node.
///
/// Groups and annotations exist for visualization exporters only and must
/// not alter execution order; `binding` names the context variable a step's
/// success value is stored under.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Swimlane/group tag from `(name): ...` or `(name: ...)`.
    pub group: Option<String>,
    /// Quoted annotation text preceding the node.
    pub annotation: Option<String>,
    /// Result binding from the `:name` postfix.
    pub binding: Option<String>,
}

impl NodeMeta {
    pub fn is_empty(&self) -> bool {
        self.group.is_none() && self.annotation.is_none() && self.binding.is_none()
    }
}

/// The variant set of the flow algebra.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A named unit of work, resolved against the host's handler registry.
    Atomic { step: String },
    /// `a -> b -> c`: strict left-to-right, error short-circuits.
    Sequence { children: Vec<Node> },
    /// A sequence in which at least one child registers a compensation.
    Saga { children: Vec<Node> },
    /// Bare fork: children start, the parent does not wait.
    Parallel { children: Vec<Node> },
    /// `[a | b]`: fork that blocks until all children settle.
    Barrier { children: Vec<Node> },
    /// `<a | b>`: first settled arm wins, losers are cancelled.
    Race { children: Vec<Node> },
    /// `a &| b`: all arms race for the first *success*; fails only if all do.
    Broadcast { children: Vec<Node> },
    /// `{ ok: a, err: b, _: c }` — dispatch on the prior step's outcome.
    Branch {
        cases: Vec<(String, Node)>,
        default: Option<Box<Node>>,
    },
    /// Quantifier wrapper (`*`, `+`, `?`, `{m,n}`).
    Loop {
        quantifier: Quantifier,
        child: Box<Node>,
    },
    /// `?[pred]` — opaque host predicate gating the child.
    Guard {
        predicate: String,
        child: Box<Node>,
    },
    /// `@n:strategy` retry wrapper.
    Retry {
        policy: RetryPolicy,
        child: Box<Node>,
    },
    /// `~dur[:fallback]` — per-attempt deadline.
    Timeout {
        duration: Duration,
        fallback: Option<Box<Node>>,
        child: Box<Node>,
    },
    /// `@@{threshold,cooldown}` — stateful failure cutoff, keyed per (flow, node).
    CircuitBreaker {
        policy: CircuitPolicy,
        child: Box<Node>,
    },
    /// `~>{dur}` — fire only after a quiescence window with no newer trigger.
    Debounce {
        quiescence: Duration,
        child: Box<Node>,
    },
    /// `~|{dur}` — fire at most once per interval, dropping the rest.
    Throttle {
        interval: Duration,
        child: Box<Node>,
    },
    /// `&` — fire-and-forget, decoupled from parent continuation and cancellation.
    Detach { child: Box<Node> },
    /// `topic >> handler` — run the handler for each event on the topic.
    EventStream {
        topic: String,
        handler: Box<Node>,
    },
    /// `!` / `!!` / `!?` error combinators.
    Catch {
        mode: CatchMode,
        child: Box<Node>,
        handler: Box<Node>,
    },
    /// `#name: ...` — in-flow named node for local reuse.
    Label { name: String, child: Box<Node> },
    /// `@name` or `#name` — unresolved reference, replaced by the resolver.
    Ref(RefKind),
    /// `$name { from: event => to ... }` — event-driven transition table.
    StateMachine {
        name: String,
        transitions: Vec<Transition>,
    },
}

impl NodeKind {
    /// Short kind name for logging and trace labels.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Atomic { .. } => "atomic",
            NodeKind::Sequence { .. } => "sequence",
            NodeKind::Saga { .. } => "saga",
            NodeKind::Parallel { .. } => "parallel",
            NodeKind::Barrier { .. } => "barrier",
            NodeKind::Race { .. } => "race",
            NodeKind::Broadcast { .. } => "broadcast",
            NodeKind::Branch { .. } => "branch",
            NodeKind::Loop { .. } => "loop",
            NodeKind::Guard { .. } => "guard",
            NodeKind::Retry { .. } => "retry",
            NodeKind::Timeout { .. } => "timeout",
            NodeKind::CircuitBreaker { .. } => "circuit-breaker",
            NodeKind::Debounce { .. } => "debounce",
            NodeKind::Throttle { .. } => "throttle",
            NodeKind::Detach { .. } => "detach",
            NodeKind::EventStream { .. } => "event-stream",
            NodeKind::Catch { .. } => "catch",
            NodeKind::Label { .. } => "label",
            NodeKind::Ref(_) => "ref",
            NodeKind::StateMachine { .. } => "state-machine",
        }
    }
}

/// Which of the three error combinators a [`NodeKind::Catch`] node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatchMode {
    /// `a ! b` — run b on a's error; b's outcome is the node's outcome.
    Catch,
    /// `a !! b` — always run b, then restore a's outcome.
    Finally,
    /// `a !? b` — run b on a's error and suppress; the node cannot fail.
    Suppress,
}

/// Unresolved reference payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefKind {
    /// `@name` — subflow invocation, evaluated fresh each call.
    Flow(String),
    /// `#name` — reuse of a label defined in the same flow.
    Label(String),
}

/// One row of a state machine's transition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub event: String,
    pub to: String,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atomic(step: &str) -> Node {
        Node::new(
            NodeKind::Atomic {
                step: step.to_string(),
            },
            Span::empty(),
        )
    }

    #[test]
    fn test_walk_visits_all_nodes() {
        let seq = Node::new(
            NodeKind::Sequence {
                children: vec![
                    atomic("a"),
                    Node::new(
                        NodeKind::Race {
                            children: vec![atomic("b"), atomic("c")],
                        },
                        Span::empty(),
                    ),
                ],
            },
            Span::empty(),
        );

        let mut seen = Vec::new();
        seq.walk(&mut |node| seen.push(node.kind.name()));
        assert_eq!(seen, vec!["sequence", "atomic", "race", "atomic", "atomic"]);
    }

    #[test]
    fn test_timeout_fallback_is_a_child() {
        let node = Node::new(
            NodeKind::Timeout {
                duration: Duration::from_secs(5),
                fallback: Some(Box::new(atomic("fb"))),
                child: Box::new(atomic("a")),
            },
            Span::empty(),
        );
        let mut count = 0;
        node.for_each_child(&mut |_| count += 1);
        assert_eq!(count, 2);
    }
}
