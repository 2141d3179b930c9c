//! Resolution pipeline.
//!
//! Runs all validation passes in order, accumulating every error before
//! giving up, then lowers the validated forest into the flat arena.

mod flatten;
mod names;
mod structure;

use crate::error::ResolveError;
use crate::program::ResolvedProgram;
use flowscript_ast::Program;

/// Resolve a parsed program.
///
/// Passes, in order: reference existence, arity and transition determinism,
/// cycle detection over subflow calls and labels, then arena flattening.
///
/// # Returns
/// - `Ok(ResolvedProgram)` ready for execution
/// - `Err(Vec<ResolveError>)` with every static error found
pub fn resolve(program: &Program) -> Result<ResolvedProgram, Vec<ResolveError>> {
    let mut errors = Vec::new();

    names::check_references(program, &mut errors);
    structure::check_arity(program, &mut errors);
    structure::check_transitions(program, &mut errors);
    structure::check_flow_cycles(program, &mut errors);
    structure::check_label_cycles(program, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(flatten::flatten(program))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ResolvedKind;
    use flowscript_parser::{parse_program, tokenize};

    fn parse(source: &str) -> Program {
        let tokens = tokenize(source).unwrap();
        parse_program(&tokens).unwrap()
    }

    fn resolve_ok(source: &str) -> ResolvedProgram {
        resolve(&parse(source)).unwrap()
    }

    fn resolve_errors(source: &str) -> Vec<ResolveError> {
        resolve(&parse(source)).unwrap_err()
    }

    #[test]
    fn resolves_simple_program() {
        let program = resolve_ok("main: a -> b\nhelper: c");
        assert_eq!(program.flows.len(), 2);
        let entry = program.entry("main").unwrap();
        assert!(matches!(
            program.node(entry).kind,
            ResolvedKind::Sequence { .. }
        ));
    }

    #[test]
    fn children_are_flattened_before_parents() {
        let program = resolve_ok("main: a -> b");
        let entry = program.entry("main").unwrap();
        let ResolvedKind::Sequence { children } = &program.node(entry).kind else {
            panic!("expected sequence");
        };
        for child in children {
            assert!(child.0 < entry.0);
        }
    }

    #[test]
    fn flow_calls_use_table_indices() {
        let program = resolve_ok("main: @helper\nhelper: work");
        let entry = program.entry("main").unwrap();
        let ResolvedKind::FlowCall { flow } = program.node(entry).kind else {
            panic!("expected flow call");
        };
        let (name, target) = program.flow_by_index(flow).unwrap();
        assert_eq!(name, "helper");
        assert!(matches!(
            &program.node(target).kind,
            ResolvedKind::Atomic { step } if step == "work"
        ));
    }

    #[test]
    fn label_jump_targets_the_label_definition() {
        let program = resolve_ok("main: #init: setup -> work -> #init");
        let entry = program.entry("main").unwrap();
        let ResolvedKind::Sequence { children } = &program.node(entry).kind else {
            panic!("expected sequence");
        };
        let ResolvedKind::LabelJump { target } = program.node(children[2]).kind else {
            panic!("expected label jump");
        };
        assert!(matches!(
            &program.node(target).kind,
            ResolvedKind::Label { name, .. } if name == "init"
        ));
    }

    #[test]
    fn forward_label_references_are_patched() {
        let program = resolve_ok("main: #done -> #done: finish");
        let entry = program.entry("main").unwrap();
        let ResolvedKind::Sequence { children } = &program.node(entry).kind else {
            panic!("expected sequence");
        };
        let ResolvedKind::LabelJump { target } = program.node(children[0]).kind else {
            panic!("expected label jump");
        };
        assert!(matches!(
            &program.node(target).kind,
            ResolvedKind::Label { name, .. } if name == "done"
        ));
    }

    #[test]
    fn undefined_flow_is_fatal() {
        let errors = resolve_errors("main: @missing");
        assert!(matches!(
            &errors[0],
            ResolveError::UnresolvedFlow { name, .. } if name == "missing"
        ));
    }

    #[test]
    fn undefined_label_is_fatal() {
        let errors = resolve_errors("main: a -> #nowhere");
        assert!(matches!(
            &errors[0],
            ResolveError::UnresolvedLabel { name, .. } if name == "nowhere"
        ));
    }

    #[test]
    fn labels_are_flow_scoped() {
        // `#init` is defined in `other`, not in `main`.
        let errors = resolve_errors("main: #init\nother: #init: setup");
        assert!(matches!(&errors[0], ResolveError::UnresolvedLabel { .. }));
    }

    #[test]
    fn duplicate_label_is_fatal() {
        let errors = resolve_errors("main: #x: a -> #x: b");
        assert!(matches!(&errors[0], ResolveError::DuplicateLabel { .. }));
    }

    #[test]
    fn direct_self_reference_is_a_cycle() {
        let errors = resolve_errors("main: work -> @main");
        assert!(matches!(
            &errors[0],
            ResolveError::CyclicReference { path } if path == &vec!["main".to_string(), "main".to_string()]
        ));
    }

    #[test]
    fn indirect_cycle_is_detected() {
        let errors = resolve_errors("a: @b\nb: @c\nc: @a");
        let ResolveError::CyclicReference { path } = &errors[0] else {
            panic!("expected cycle, got {:?}", errors);
        };
        assert_eq!(path.first(), path.last());
        assert!(path.len() >= 3);
    }

    #[test]
    fn diamond_references_are_not_cycles() {
        // Two paths to the same subflow must not be mistaken for a cycle.
        let program = resolve_ok("a: @b -> @c\nb: @d\nc: @d\nd: leaf");
        assert_eq!(program.flows.len(), 4);
    }

    #[test]
    fn label_self_reference_is_a_cycle() {
        let errors = resolve_errors("main: #again: (work -> #again)");
        assert!(matches!(
            &errors[0],
            ResolveError::CyclicLabel { label, .. } if label == "again"
        ));
    }

    #[test]
    fn single_child_barrier_is_rejected() {
        let errors = resolve_errors("main: [only]");
        assert!(matches!(&errors[0], ResolveError::BarrierArity { .. }));
    }

    #[test]
    fn ambiguous_machine_transition_is_fatal() {
        let errors =
            resolve_errors("main: $m { idle: go => busy, idle: go => stopped }");
        assert!(matches!(
            &errors[0],
            ResolveError::AmbiguousTransition { state, event, .. }
                if state == "idle" && event == "go"
        ));
    }

    #[test]
    fn deterministic_machine_resolves() {
        let program = resolve_ok("main: $m { idle: go => busy, busy: stop => idle }");
        let entry = program.entry("main").unwrap();
        assert!(matches!(
            program.node(entry).kind,
            ResolvedKind::StateMachine { .. }
        ));
    }

    #[test]
    fn all_errors_are_collected() {
        let errors = resolve_errors("main: @missing -> #nowhere -> [single]");
        assert_eq!(errors.len(), 3);
    }
}
