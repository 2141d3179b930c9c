//! Reference existence checks.
//!
//! Every `@name` must name a defined flow; every `#name` must name a label
//! defined in the *same* flow (labels are flow-scoped).

use crate::error::ResolveError;
use flowscript_ast::{NodeKind, Program, RefKind};
use std::collections::HashSet;

pub fn check_references(program: &Program, errors: &mut Vec<ResolveError>) {
    for (flow_name, flow) in &program.flows {
        let mut labels: HashSet<&str> = HashSet::new();
        flow.root.walk(&mut |node| {
            if let NodeKind::Label { name, .. } = &node.kind {
                if !labels.insert(name) {
                    errors.push(ResolveError::DuplicateLabel {
                        flow: flow_name.clone(),
                        name: name.clone(),
                        span: node.span,
                    });
                }
            }
        });

        flow.root.walk(&mut |node| match &node.kind {
            NodeKind::Ref(RefKind::Flow(name)) => {
                if !program.flows.contains_key(name) {
                    errors.push(ResolveError::UnresolvedFlow {
                        flow: flow_name.clone(),
                        name: name.clone(),
                        span: node.span,
                    });
                }
            }
            NodeKind::Ref(RefKind::Label(name)) => {
                if !labels.contains(name.as_str()) {
                    errors.push(ResolveError::UnresolvedLabel {
                        flow: flow_name.clone(),
                        name: name.clone(),
                        span: node.span,
                    });
                }
            }
            _ => {}
        });
    }
}
