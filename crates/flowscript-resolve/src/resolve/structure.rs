//! Structural validation: arity, transition determinism, reference cycles.
//!
//! Cycle detection uses depth-first search with a recursion stack over the
//! reference graph. Direct recursion (`@self`) is never permitted: the
//! engine has no tail-call elimination and must bound stack depth.

use crate::error::ResolveError;
use flowscript_ast::{Node, NodeKind, Program, RefKind};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Minimum-children checks on Branch / Race / Barrier.
pub fn check_arity(program: &Program, errors: &mut Vec<ResolveError>) {
    for (flow_name, flow) in &program.flows {
        flow.root.walk(&mut |node| match &node.kind {
            NodeKind::Branch { cases, .. } if cases.is_empty() => {
                errors.push(ResolveError::BranchArity {
                    flow: flow_name.clone(),
                    span: node.span,
                });
            }
            NodeKind::Race { children } if children.len() < 2 => {
                errors.push(ResolveError::RaceArity {
                    flow: flow_name.clone(),
                    span: node.span,
                });
            }
            NodeKind::Barrier { children } if children.len() < 2 => {
                errors.push(ResolveError::BarrierArity {
                    flow: flow_name.clone(),
                    span: node.span,
                });
            }
            _ => {}
        });
    }
}

/// No two transitions out of the same state may share an event.
pub fn check_transitions(program: &Program, errors: &mut Vec<ResolveError>) {
    for (flow_name, flow) in &program.flows {
        flow.root.walk(&mut |node| {
            if let NodeKind::StateMachine { name, transitions } = &node.kind {
                let mut seen: HashSet<(&str, &str)> = HashSet::new();
                for transition in transitions {
                    if !seen.insert((&transition.from, &transition.event)) {
                        errors.push(ResolveError::AmbiguousTransition {
                            flow: flow_name.clone(),
                            machine: name.clone(),
                            state: transition.from.clone(),
                            event: transition.event.clone(),
                            span: transition.span,
                        });
                    }
                }
            }
        });
    }
}

/// Detect cycles in the subflow call graph.
pub fn check_flow_cycles(program: &Program, errors: &mut Vec<ResolveError>) {
    // Build call graph: flow -> flows it references (defined ones only;
    // undefined references are reported by the names pass).
    let mut graph: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for (flow_name, flow) in &program.flows {
        let mut deps = Vec::new();
        flow.root.walk(&mut |node| {
            if let NodeKind::Ref(RefKind::Flow(name)) = &node.kind {
                if program.flows.contains_key(name) && !deps.contains(&name.as_str()) {
                    deps.push(name.as_str());
                }
            }
        });
        graph.insert(flow_name.as_str(), deps);
    }

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    for flow_name in graph.keys().copied().collect::<Vec<_>>() {
        if !visited.contains(flow_name) {
            if let Some(cycle) =
                detect_cycle_dfs(flow_name, &graph, &mut visited, &mut rec_stack, Vec::new())
            {
                errors.push(ResolveError::CyclicReference {
                    path: cycle.into_iter().map(String::from).collect(),
                });
            }
        }
    }
}

/// Depth-first search returning the cycle path if one is found.
fn detect_cycle_dfs<'a>(
    current: &'a str,
    graph: &IndexMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    mut path: Vec<&'a str>,
) -> Option<Vec<&'a str>> {
    visited.insert(current);
    rec_stack.insert(current);
    path.push(current);

    if let Some(deps) = graph.get(current) {
        for dep in deps {
            if rec_stack.contains(dep) {
                // Found a cycle: report from the first occurrence of `dep`.
                let start = path.iter().position(|name| name == dep).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
            if !visited.contains(dep) {
                if let Some(cycle) =
                    detect_cycle_dfs(dep, graph, visited, rec_stack, path.clone())
                {
                    return Some(cycle);
                }
            }
        }
    }

    rec_stack.remove(current);
    None
}

/// Detect labels whose definition transitively refers back to itself.
pub fn check_label_cycles(program: &Program, errors: &mut Vec<ResolveError>) {
    for (flow_name, flow) in &program.flows {
        // Label -> labels referenced anywhere inside its definition.
        let mut graph: IndexMap<&str, Vec<&str>> = IndexMap::new();
        flow.root.walk(&mut |node| {
            if let NodeKind::Label { name, child } = &node.kind {
                let mut deps = Vec::new();
                collect_label_refs(child, &mut deps);
                graph.insert(name.as_str(), deps);
            }
        });

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        for label in graph.keys().copied().collect::<Vec<_>>() {
            if !visited.contains(label) {
                if let Some(cycle) =
                    detect_cycle_dfs(label, &graph, &mut visited, &mut rec_stack, Vec::new())
                {
                    errors.push(ResolveError::CyclicLabel {
                        flow: flow_name.clone(),
                        label: cycle.first().map(|s| s.to_string()).unwrap_or_default(),
                    });
                }
            }
        }
    }
}

fn collect_label_refs<'a>(node: &'a Node, deps: &mut Vec<&'a str>) {
    node.walk(&mut |n| {
        if let NodeKind::Ref(RefKind::Label(name)) = &n.kind {
            if !deps.contains(&name.as_str()) {
                deps.push(name.as_str());
            }
        }
    });
}
