//! Lowering of the validated AST forest into the flat node arena.
//!
//! Children are flattened before their parent (post-order), so every child
//! id is smaller than its parent's. Forward label references are patched in
//! a fixup pass once the whole flow has been flattened.

use crate::program::{NodeId, ResolvedKind, ResolvedNode, ResolvedProgram};
use flowscript_ast::{Node, NodeKind, Program, RefKind};
use indexmap::IndexMap;
use std::collections::HashMap;

pub fn flatten(program: &Program) -> ResolvedProgram {
    let mut nodes: Vec<ResolvedNode> = Vec::new();
    let mut flows: IndexMap<String, NodeId> = IndexMap::new();

    for (flow_name, flow) in &program.flows {
        let mut labels: HashMap<String, NodeId> = HashMap::new();
        let mut fixups: Vec<(usize, String)> = Vec::new();

        let entry = flatten_node(
            &flow.root, flow_name, program, &mut nodes, &mut labels, &mut fixups,
        );

        // Patch forward label references.
        for (index, label) in fixups {
            let target = labels
                .get(&label)
                .copied()
                .expect("BUG: unresolved label survived validation");
            nodes[index].kind = ResolvedKind::LabelJump { target };
        }

        flows.insert(flow_name.clone(), entry);
    }

    ResolvedProgram { nodes, flows }
}

fn flatten_node(
    node: &Node,
    flow: &str,
    program: &Program,
    nodes: &mut Vec<ResolvedNode>,
    labels: &mut HashMap<String, NodeId>,
    fixups: &mut Vec<(usize, String)>,
) -> NodeId {
    let flatten_children = |children: &Vec<Node>,
                                nodes: &mut Vec<ResolvedNode>,
                                labels: &mut HashMap<String, NodeId>,
                                fixups: &mut Vec<(usize, String)>| {
        children
            .iter()
            .map(|child| flatten_node(child, flow, program, nodes, labels, fixups))
            .collect::<Vec<_>>()
    };

    let kind = match &node.kind {
        NodeKind::Atomic { step } => ResolvedKind::Atomic { step: step.clone() },
        NodeKind::Sequence { children } => ResolvedKind::Sequence {
            children: flatten_children(children, nodes, labels, fixups),
        },
        NodeKind::Saga { children } => ResolvedKind::Saga {
            children: flatten_children(children, nodes, labels, fixups),
        },
        NodeKind::Parallel { children } => ResolvedKind::Parallel {
            children: flatten_children(children, nodes, labels, fixups),
        },
        NodeKind::Barrier { children } => ResolvedKind::Barrier {
            children: flatten_children(children, nodes, labels, fixups),
        },
        NodeKind::Race { children } => ResolvedKind::Race {
            children: flatten_children(children, nodes, labels, fixups),
        },
        NodeKind::Broadcast { children } => ResolvedKind::Broadcast {
            children: flatten_children(children, nodes, labels, fixups),
        },
        NodeKind::Branch { cases, default } => ResolvedKind::Branch {
            cases: cases
                .iter()
                .map(|(label, child)| {
                    (
                        label.clone(),
                        flatten_node(child, flow, program, nodes, labels, fixups),
                    )
                })
                .collect(),
            default: default
                .as_ref()
                .map(|child| flatten_node(child, flow, program, nodes, labels, fixups)),
        },
        NodeKind::Loop { quantifier, child } => ResolvedKind::Loop {
            quantifier: *quantifier,
            child: flatten_node(child, flow, program, nodes, labels, fixups),
        },
        NodeKind::Guard { predicate, child } => ResolvedKind::Guard {
            predicate: predicate.clone(),
            child: flatten_node(child, flow, program, nodes, labels, fixups),
        },
        NodeKind::Retry { policy, child } => ResolvedKind::Retry {
            policy: policy.clone(),
            child: flatten_node(child, flow, program, nodes, labels, fixups),
        },
        NodeKind::Timeout {
            duration,
            fallback,
            child,
        } => ResolvedKind::Timeout {
            duration: *duration,
            fallback: fallback
                .as_ref()
                .map(|fb| flatten_node(fb, flow, program, nodes, labels, fixups)),
            child: flatten_node(child, flow, program, nodes, labels, fixups),
        },
        NodeKind::CircuitBreaker { policy, child } => ResolvedKind::CircuitBreaker {
            policy: policy.clone(),
            child: flatten_node(child, flow, program, nodes, labels, fixups),
        },
        NodeKind::Debounce { quiescence, child } => ResolvedKind::Debounce {
            quiescence: *quiescence,
            child: flatten_node(child, flow, program, nodes, labels, fixups),
        },
        NodeKind::Throttle { interval, child } => ResolvedKind::Throttle {
            interval: *interval,
            child: flatten_node(child, flow, program, nodes, labels, fixups),
        },
        NodeKind::Detach { child } => ResolvedKind::Detach {
            child: flatten_node(child, flow, program, nodes, labels, fixups),
        },
        NodeKind::EventStream { topic, handler } => ResolvedKind::EventStream {
            topic: topic.clone(),
            handler: flatten_node(handler, flow, program, nodes, labels, fixups),
        },
        NodeKind::Catch {
            mode,
            child,
            handler,
        } => ResolvedKind::Catch {
            mode: *mode,
            child: flatten_node(child, flow, program, nodes, labels, fixups),
            handler: flatten_node(handler, flow, program, nodes, labels, fixups),
        },
        NodeKind::Label { name, child } => ResolvedKind::Label {
            name: name.clone(),
            child: flatten_node(child, flow, program, nodes, labels, fixups),
        },
        NodeKind::Ref(RefKind::Flow(name)) => ResolvedKind::FlowCall {
            flow: program
                .flows
                .get_index_of(name)
                .expect("BUG: unresolved flow survived validation"),
        },
        NodeKind::Ref(RefKind::Label(name)) => match labels.get(name) {
            Some(&target) => ResolvedKind::LabelJump { target },
            None => {
                // Forward reference; patched once the flow is flattened.
                fixups.push((nodes.len(), name.clone()));
                ResolvedKind::LabelJump {
                    target: NodeId(u32::MAX),
                }
            }
        },
        NodeKind::StateMachine { name, transitions } => ResolvedKind::StateMachine {
            name: name.clone(),
            transitions: transitions.clone(),
        },
    };

    let id = NodeId(nodes.len() as u32);
    nodes.push(ResolvedNode {
        kind,
        meta: node.meta.clone(),
        compensation: node.compensation.clone(),
        span: node.span,
        flow: flow.to_string(),
    });

    if let NodeKind::Label { name, .. } = &node.kind {
        labels.insert(name.clone(), id);
    }
    id
}
