//! Parser error reporting and recovery.

use flowscript_parser::{parse_program, tokenize, ParseError, ParseErrorKind};

fn parse_errors(source: &str) -> Vec<ParseError> {
    let tokens = tokenize(source).expect("lexing failed");
    parse_program(&tokens).expect_err("expected parse errors")
}

#[test]
fn duplicate_quantifier_is_rejected() {
    let errors = parse_errors("main: poll*+");
    assert_eq!(errors[0].kind, ParseErrorKind::DuplicateModifier);
    assert!(errors[0].message.contains("quantifier"));
}

#[test]
fn duplicate_retry_is_rejected() {
    let errors = parse_errors("main: fetch@3@5");
    assert_eq!(errors[0].kind, ParseErrorKind::DuplicateModifier);
    assert!(errors[0].message.contains("retry"));
}

#[test]
fn duplicate_timeout_is_rejected() {
    let errors = parse_errors("main: fetch~5s~10s");
    assert_eq!(errors[0].kind, ParseErrorKind::DuplicateModifier);
}

#[test]
fn duplicate_detach_is_rejected() {
    let errors = parse_errors("main: fire& &");
    assert_eq!(errors[0].kind, ParseErrorKind::DuplicateModifier);
    assert!(errors[0].message.contains("detach"));
}

#[test]
fn mixed_fork_operators_are_rejected() {
    let errors = parse_errors("main: a && b || c");
    assert_eq!(errors[0].kind, ParseErrorKind::InvalidSyntax);
    assert!(errors[0].message.contains("parenthesize"));
}

#[test]
fn single_arm_race_is_rejected() {
    let errors = parse_errors("main: <a>");
    assert_eq!(errors[0].kind, ParseErrorKind::InvalidSyntax);
    assert!(errors[0].message.contains("two arms"));
}

#[test]
fn branch_requires_a_named_case() {
    let errors = parse_errors("main: a -> { _: b }");
    assert_eq!(errors[0].kind, ParseErrorKind::InvalidSyntax);
    assert!(errors[0].message.contains("at least one named case"));
}

#[test]
fn duplicate_branch_case_is_rejected() {
    let errors = parse_errors("main: a -> { ok: b, ok: c }");
    assert_eq!(errors[0].kind, ParseErrorKind::DuplicateCase);
}

#[test]
fn duplicate_flow_name_is_rejected() {
    let errors = parse_errors("main: a\nmain: b");
    assert_eq!(errors[0].kind, ParseErrorKind::DuplicateFlow);
}

#[test]
fn unknown_retry_strategy_is_rejected() {
    let errors = parse_errors("main: fetch@3:cubic");
    assert_eq!(errors[0].kind, ParseErrorKind::InvalidSyntax);
    assert!(errors[0].message.contains("cubic"));
}

#[test]
fn zero_retry_attempts_is_rejected() {
    let errors = parse_errors("main: fetch@0");
    assert_eq!(errors[0].kind, ParseErrorKind::InvalidSyntax);
}

#[test]
fn bad_quantifier_range_is_rejected() {
    let errors = parse_errors("main: poll{5,2}");
    assert_eq!(errors[0].kind, ParseErrorKind::InvalidSyntax);
}

#[test]
fn stream_topic_must_be_bare() {
    let errors = parse_errors("main: orders@3 >> handle");
    assert_eq!(errors[0].kind, ParseErrorKind::InvalidSyntax);
    assert!(errors[0].message.contains("topic"));
}

#[test]
fn chained_streams_are_rejected() {
    let errors = parse_errors("main: orders >> handle >> audit");
    assert_eq!(errors[0].kind, ParseErrorKind::InvalidSyntax);
    assert!(errors[0].message.contains("chain"));
}

#[test]
fn unexpected_eof_is_reported() {
    let errors = parse_errors("main: a ->");
    assert_eq!(errors[0].kind, ParseErrorKind::UnexpectedEof);
}

#[test]
fn unclosed_barrier_is_reported() {
    let errors = parse_errors("main: [a | b");
    assert!(!errors.is_empty());
}

#[test]
fn recovery_collects_errors_from_multiple_flows() {
    let errors = parse_errors("first: <a>\nsecond: b@0\nthird: c -> { ok: d, ok: e }");
    assert!(errors.len() >= 2, "expected several errors, got {:?}", errors);
}

#[test]
fn recovery_still_reports_later_duplicate_flows() {
    let errors = parse_errors("main: <a>\nmain: b");
    assert!(!errors.is_empty());
}

#[test]
fn empty_machine_is_rejected() {
    let errors = parse_errors("main: $order { }");
    assert_eq!(errors[0].kind, ParseErrorKind::InvalidSyntax);
    assert!(errors[0].message.contains("transition"));
}
