//! End-to-end parser tests: source text in, AST structure out.

use flowscript_ast::{CatchMode, Node, NodeKind, Program, Quantifier, RefKind};
use flowscript_parser::{parse_program, tokenize};

fn parse(source: &str) -> Program {
    let tokens = tokenize(source).expect("lexing failed");
    parse_program(&tokens).expect("parsing failed")
}

fn root<'a>(program: &'a Program, flow: &str) -> &'a Node {
    &program.flows.get(flow).expect("flow not found").root
}

#[test]
fn parses_simple_sequence() {
    let program = parse("main: validate -> persist -> notify");
    match &root(&program, "main").kind {
        NodeKind::Sequence { children } => {
            assert_eq!(children.len(), 3);
            assert!(matches!(&children[0].kind, NodeKind::Atomic { step } if step == "validate"));
            assert!(matches!(&children[2].kind, NodeKind::Atomic { step } if step == "notify"));
        }
        other => panic!("expected sequence, got {:?}", other),
    }
}

#[test]
fn parses_multiple_flows_in_order() {
    let program = parse(
        "first: a -> b\n\
         second: c\n\
         third: d -> e",
    );
    let names: Vec<_> = program.flow_names().collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[test]
fn parsing_is_deterministic() {
    let source = "main: a -> [b | c] -> <d | e> ! f\nother: @main";
    let first = parse(source);
    let second = parse(source);
    assert_eq!(first, second);
}

#[test]
fn parses_barrier_and_race_blocks() {
    let program = parse("main: [a | b -> c] -> <d | e>");
    let NodeKind::Sequence { children } = &root(&program, "main").kind else {
        panic!("expected sequence");
    };
    match &children[0].kind {
        NodeKind::Barrier { children } => {
            assert_eq!(children.len(), 2);
            assert!(matches!(children[1].kind, NodeKind::Sequence { .. }));
        }
        other => panic!("expected barrier, got {:?}", other),
    }
    assert!(matches!(&children[1].kind, NodeKind::Race { children } if children.len() == 2));
}

#[test]
fn bare_bar_is_parallel_fork() {
    let program = parse("main: a | b | c");
    assert!(
        matches!(&root(&program, "main").kind, NodeKind::Parallel { children } if children.len() == 3)
    );
}

#[test]
fn infix_forms_match_block_forms() {
    let infix = parse("main: a && b");
    let block = parse("main: [a | b]");
    assert_eq!(
        root(&infix, "main").kind.name(),
        root(&block, "main").kind.name()
    );

    let infix = parse("main: a || b");
    let block = parse("main: <a | b>");
    assert_eq!(
        root(&infix, "main").kind.name(),
        root(&block, "main").kind.name()
    );
}

#[test]
fn parses_broadcast_fanout() {
    let program = parse("main: a &| b &| c");
    assert!(
        matches!(&root(&program, "main").kind, NodeKind::Broadcast { children } if children.len() == 3)
    );
}

#[test]
fn parses_branch_with_default() {
    let program = parse("main: fetch -> { ok: store, err: alert, _: log }");
    let NodeKind::Sequence { children } = &root(&program, "main").kind else {
        panic!("expected sequence");
    };
    match &children[1].kind {
        NodeKind::Branch { cases, default } => {
            assert_eq!(cases.len(), 2);
            assert_eq!(cases[0].0, "ok");
            assert_eq!(cases[1].0, "err");
            assert!(default.is_some());
        }
        other => panic!("expected branch, got {:?}", other),
    }
}

#[test]
fn parses_subflow_and_label_references() {
    let program = parse("main: #init: setup -> #init -> @cleanup\ncleanup: teardown");
    let NodeKind::Sequence { children } = &root(&program, "main").kind else {
        panic!("expected sequence");
    };
    assert!(matches!(&children[0].kind, NodeKind::Label { name, .. } if name == "init"));
    assert!(
        matches!(&children[1].kind, NodeKind::Ref(RefKind::Label(name)) if name == "init")
    );
    assert!(
        matches!(&children[2].kind, NodeKind::Ref(RefKind::Flow(name)) if name == "cleanup")
    );
}

#[test]
fn saga_is_detected_from_compensations() {
    let program = parse("main: reserve^release -> charge^refund -> ship");
    match &root(&program, "main").kind {
        NodeKind::Saga { children } => {
            assert_eq!(children.len(), 3);
            assert_eq!(children[0].compensation.as_deref(), Some("release"));
            assert_eq!(children[1].compensation.as_deref(), Some("refund"));
            assert_eq!(children[2].compensation, None);
        }
        other => panic!("expected saga, got {:?}", other),
    }
}

#[test]
fn sequence_without_compensation_stays_sequence() {
    let program = parse("main: a -> b");
    assert!(matches!(
        &root(&program, "main").kind,
        NodeKind::Sequence { .. }
    ));
}

#[test]
fn parses_catch_modes() {
    let program = parse("main: a ! b\nfin: a !! b\nsup: a !? b");
    for (flow, mode) in [
        ("main", CatchMode::Catch),
        ("fin", CatchMode::Finally),
        ("sup", CatchMode::Suppress),
    ] {
        match &root(&program, flow).kind {
            NodeKind::Catch { mode: actual, .. } => assert_eq!(*actual, mode),
            other => panic!("expected catch, got {:?}", other),
        }
    }
}

#[test]
fn parses_quantifiers() {
    let program = parse("a: poll*\nb: drain+\nc: warmup?\nd: ping{2,5}");
    assert!(matches!(
        &root(&program, "a").kind,
        NodeKind::Loop { quantifier: Quantifier::ZeroOrMore, .. }
    ));
    assert!(matches!(
        &root(&program, "b").kind,
        NodeKind::Loop { quantifier: Quantifier::OneOrMore, .. }
    ));
    assert!(matches!(
        &root(&program, "c").kind,
        NodeKind::Loop { quantifier: Quantifier::Optional, .. }
    ));
    assert!(matches!(
        &root(&program, "d").kind,
        NodeKind::Loop { quantifier: Quantifier::Range { min: 2, max: 5 }, .. }
    ));
}

#[test]
fn parses_event_stream() {
    let program = parse("main: orders >> handle");
    match &root(&program, "main").kind {
        NodeKind::EventStream { topic, handler } => {
            assert_eq!(topic, "orders");
            assert!(matches!(&handler.kind, NodeKind::Atomic { step } if step == "handle"));
        }
        other => panic!("expected event stream, got {:?}", other),
    }
}

#[test]
fn parses_state_machine() {
    let program = parse("main: $order { pending: pay => paid, paid: ship => shipped }");
    match &root(&program, "main").kind {
        NodeKind::StateMachine { name, transitions } => {
            assert_eq!(name, "order");
            assert_eq!(transitions.len(), 2);
            assert_eq!(transitions[0].from, "pending");
            assert_eq!(transitions[0].event, "pay");
            assert_eq!(transitions[0].to, "paid");
        }
        other => panic!("expected state machine, got {:?}", other),
    }
}

#[test]
fn group_names_are_metadata_not_wrappers() {
    let grouped = parse("main: (ingest: fetch -> store)");

    // The group tag lands on the sequence itself; no wrapper node appears.
    let grouped_root = root(&grouped, "main");
    assert_eq!(grouped_root.meta.group.as_deref(), Some("ingest"));
    let NodeKind::Sequence { children } = &grouped_root.kind else {
        panic!("expected sequence, got {:?}", grouped_root.kind);
    };
    assert!(matches!(&children[0].kind, NodeKind::Atomic { step } if step == "fetch"));
    assert!(matches!(&children[1].kind, NodeKind::Atomic { step } if step == "store"));
}

#[test]
fn prefix_group_tags_following_step() {
    let program = parse("main: (setup): init -> run");
    let NodeKind::Sequence { children } = &root(&program, "main").kind else {
        panic!("expected sequence");
    };
    assert_eq!(children[0].meta.group.as_deref(), Some("setup"));
    assert_eq!(children[1].meta.group, None);
}

#[test]
fn annotations_attach_to_steps() {
    let program = parse(r#"main: "fetch the user" fetch -> store"#);
    let NodeKind::Sequence { children } = &root(&program, "main").kind else {
        panic!("expected sequence");
    };
    assert_eq!(children[0].meta.annotation.as_deref(), Some("fetch the user"));
}

#[test]
fn bindings_attach_to_outermost_wrapper() {
    let program = parse("main: fetch:user@3 -> use");
    let NodeKind::Sequence { children } = &root(&program, "main").kind else {
        panic!("expected sequence");
    };
    // Binding must sit on the retry wrapper so the sequence sees it.
    assert!(matches!(&children[0].kind, NodeKind::Retry { .. }));
    assert_eq!(children[0].meta.binding.as_deref(), Some("user"));
}

#[test]
fn comments_are_ignored() {
    let with = parse("main: a -> b // tail\n/* block */ other: c");
    let without = parse("main: a -> b\nother: c");
    assert_eq!(with.flows.len(), without.flows.len());
}
