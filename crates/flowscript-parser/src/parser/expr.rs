//! Combinator expression parser.
//!
//! Precedence, tightest to loosest: postfix modifiers → `>>` event streams
//! → forks (`|`, `&&`, `||`, `&|`) → catch (`!`, `!!`, `!?`) → `->`
//! sequencing. Postfix modifiers are desugared into wrapper nodes in a
//! canonical nesting order here, so written order never matters downstream.

use super::{ParseError, TokenStream};
use flowscript_ast::{
    BackoffStrategy, CatchMode, CircuitPolicy, Node, NodeKind, Quantifier, RefKind, RetryPolicy,
    Span, Transition,
};
use flowscript_lexer::Token;
use std::time::Duration;

/// Parse a full combinator expression.
///
/// `bar_forks` controls whether a bare `|` at this level is a parallel fork
/// operator (true) or a child separator owned by an enclosing `[...]` /
/// `<...>` (false). Nested delimiters reset it.
pub fn parse_expr(stream: &mut TokenStream, bar_forks: bool) -> Result<Node, ParseError> {
    parse_sequence(stream, bar_forks)
}

fn parse_sequence(stream: &mut TokenStream, bar_forks: bool) -> Result<Node, ParseError> {
    let start = stream.current_pos();
    let first = parse_catch(stream, bar_forks)?;
    if !stream.check(&Token::Arrow) {
        return Ok(first);
    }

    let mut children = vec![first];
    while stream.check(&Token::Arrow) {
        stream.advance();
        children.push(parse_catch(stream, bar_forks)?);
    }

    // A sequence in which any step registers a compensation is a saga.
    let kind = if children.iter().any(|c| c.compensation.is_some()) {
        NodeKind::Saga { children }
    } else {
        NodeKind::Sequence { children }
    };
    Ok(Node::new(kind, stream.span_from(start)))
}

fn parse_catch(stream: &mut TokenStream, bar_forks: bool) -> Result<Node, ParseError> {
    let start = stream.current_pos();
    let mut node = parse_fork(stream, bar_forks)?;
    loop {
        let mode = match stream.peek() {
            Some(Token::Bang) => CatchMode::Catch,
            Some(Token::BangBang) => CatchMode::Finally,
            Some(Token::BangQuest) => CatchMode::Suppress,
            _ => break,
        };
        stream.advance();
        let handler = parse_fork(stream, bar_forks)?;
        node = Node::new(
            NodeKind::Catch {
                mode,
                child: Box::new(node),
                handler: Box::new(handler),
            },
            stream.span_from(start),
        );
    }
    Ok(node)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForkOp {
    Parallel,
    Barrier,
    Race,
    Broadcast,
}

fn fork_op(token: Option<&Token>, bar_forks: bool) -> Option<ForkOp> {
    match token {
        Some(Token::AndAnd) => Some(ForkOp::Barrier),
        Some(Token::OrOr) => Some(ForkOp::Race),
        Some(Token::AndBar) => Some(ForkOp::Broadcast),
        Some(Token::Bar) if bar_forks => Some(ForkOp::Parallel),
        _ => None,
    }
}

fn parse_fork(stream: &mut TokenStream, bar_forks: bool) -> Result<Node, ParseError> {
    let start = stream.current_pos();
    let first = parse_stream_expr(stream, bar_forks)?;

    let op = match fork_op(stream.peek(), bar_forks) {
        Some(op) => op,
        None => return Ok(first),
    };

    let mut children = vec![first];
    while fork_op(stream.peek(), bar_forks) == Some(op) {
        stream.advance();
        children.push(parse_stream_expr(stream, bar_forks)?);
    }

    // `A && B || C` is ambiguous; force parentheses.
    if fork_op(stream.peek(), bar_forks).is_some() {
        return Err(ParseError::invalid_syntax(
            "mixed fork operators at the same level; parenthesize to disambiguate",
            stream.current_span(),
        ));
    }

    let kind = match op {
        ForkOp::Parallel => NodeKind::Parallel { children },
        ForkOp::Barrier => NodeKind::Barrier { children },
        ForkOp::Race => NodeKind::Race { children },
        ForkOp::Broadcast => NodeKind::Broadcast { children },
    };
    Ok(Node::new(kind, stream.span_from(start)))
}

/// Parse `topic >> handler` event streams, or fall through to postfix.
fn parse_stream_expr(stream: &mut TokenStream, _bar_forks: bool) -> Result<Node, ParseError> {
    let start = stream.current_pos();
    let node = parse_postfix(stream)?;
    if !stream.check(&Token::StreamOp) {
        return Ok(node);
    }
    stream.advance();

    let node_span = node.span;
    let topic = match node {
        Node {
            kind: NodeKind::Atomic { step },
            meta,
            compensation: None,
            ..
        } if meta.is_empty() => step,
        _ => {
            return Err(ParseError::invalid_syntax(
                "left side of `>>` must be a bare topic name",
                node_span,
            ));
        }
    };

    let handler = parse_postfix(stream)?;
    if stream.check(&Token::StreamOp) {
        return Err(ParseError::invalid_syntax(
            "event streams do not chain; wrap the handler instead",
            stream.current_span(),
        ));
    }
    Ok(Node::new(
        NodeKind::EventStream {
            topic,
            handler: Box::new(handler),
        },
        stream.span_from(start),
    ))
}

fn set_once<T>(
    slot: &mut Option<T>,
    value: T,
    modifier: &str,
    span: Span,
) -> Result<(), ParseError> {
    if slot.is_some() {
        return Err(ParseError::duplicate_modifier(modifier, span));
    }
    *slot = Some(value);
    Ok(())
}

/// Parse a primary and every postfix modifier attached to it, then build
/// wrapper nodes in canonical nesting order (innermost first):
///
/// ```text
/// step → Guard → Timeout → Retry → CircuitBreaker → Debounce → Throttle → Loop → Detach
/// ```
///
/// Timeout inside Retry gives each attempt a fresh deadline; the breaker
/// observes the outcome of the whole retry sequence.
fn parse_postfix(stream: &mut TokenStream) -> Result<Node, ParseError> {
    let start = stream.current_pos();
    let base = parse_primary(stream)?;

    let mut quantifier: Option<Quantifier> = None;
    let mut guard: Option<String> = None;
    let mut retry: Option<RetryPolicy> = None;
    let mut timeout: Option<(Duration, Option<Node>)> = None;
    let mut breaker: Option<CircuitPolicy> = None;
    let mut debounce: Option<Duration> = None;
    let mut throttle: Option<Duration> = None;
    let mut compensation: Option<String> = None;
    let mut binding: Option<String> = None;
    let mut detach = false;

    loop {
        let span = stream.current_span();
        match stream.peek() {
            Some(Token::Star) => {
                stream.advance();
                set_once(&mut quantifier, Quantifier::ZeroOrMore, "quantifier", span)?;
            }
            Some(Token::Plus) => {
                stream.advance();
                set_once(&mut quantifier, Quantifier::OneOrMore, "quantifier", span)?;
            }
            Some(Token::Question) => {
                if matches!(stream.peek_nth(1), Some(Token::LBracket)) {
                    stream.advance();
                    stream.advance();
                    let predicate = expect_ident(stream, "guard predicate")?;
                    stream.expect(Token::RBracket)?;
                    set_once(&mut guard, predicate, "guard", span)?;
                } else {
                    stream.advance();
                    set_once(&mut quantifier, Quantifier::Optional, "quantifier", span)?;
                }
            }
            Some(Token::LBrace) if matches!(stream.peek_nth(1), Some(Token::Integer(_))) => {
                stream.advance();
                let min = expect_integer(stream, "quantifier minimum")?;
                stream.expect(Token::Comma)?;
                let max = expect_integer(stream, "quantifier maximum")?;
                stream.expect(Token::RBrace)?;
                if max == 0 || min > max {
                    return Err(ParseError::invalid_syntax(
                        "quantifier range requires m <= n and n >= 1",
                        stream.span_from(start),
                    ));
                }
                set_once(
                    &mut quantifier,
                    Quantifier::Range { min, max },
                    "quantifier",
                    span,
                )?;
            }
            Some(Token::At) if matches!(stream.peek_nth(1), Some(Token::Integer(_))) => {
                stream.advance();
                let policy = parse_retry_policy(stream)?;
                set_once(&mut retry, policy, "retry", span)?;
            }
            Some(Token::AtAt) => {
                stream.advance();
                stream.expect(Token::LBrace)?;
                let failure_threshold = expect_integer(stream, "failure threshold")?;
                stream.expect(Token::Comma)?;
                let cooldown = expect_duration(stream, "cooldown duration")?;
                stream.expect(Token::RBrace)?;
                if failure_threshold == 0 {
                    return Err(ParseError::invalid_syntax(
                        "circuit breaker threshold must be at least 1",
                        span,
                    ));
                }
                set_once(
                    &mut breaker,
                    CircuitPolicy {
                        failure_threshold,
                        cooldown,
                    },
                    "circuit breaker",
                    span,
                )?;
            }
            Some(Token::Tilde) => {
                stream.advance();
                let duration = expect_duration(stream, "timeout duration")?;
                let fallback = if stream.check(&Token::Colon) {
                    stream.advance();
                    Some(parse_primary(stream)?)
                } else {
                    None
                };
                set_once(&mut timeout, (duration, fallback), "timeout", span)?;
            }
            Some(Token::DebounceOp) => {
                stream.advance();
                stream.expect(Token::LBrace)?;
                let quiescence = expect_duration(stream, "debounce window")?;
                stream.expect(Token::RBrace)?;
                set_once(&mut debounce, quiescence, "debounce", span)?;
            }
            Some(Token::ThrottleOp) => {
                stream.advance();
                stream.expect(Token::LBrace)?;
                let interval = expect_duration(stream, "throttle interval")?;
                stream.expect(Token::RBrace)?;
                set_once(&mut throttle, interval, "throttle", span)?;
            }
            Some(Token::Caret) => {
                stream.advance();
                let step = expect_ident(stream, "compensation step")?;
                set_once(&mut compensation, step, "compensation", span)?;
            }
            Some(Token::Colon) if matches!(stream.peek_nth(1), Some(Token::Ident(_))) => {
                stream.advance();
                let name = expect_ident(stream, "binding name")?;
                set_once(&mut binding, name, "binding", span)?;
            }
            Some(Token::Amp) => {
                stream.advance();
                if detach {
                    return Err(ParseError::duplicate_modifier("detach", span));
                }
                detach = true;
            }
            _ => break,
        }
    }

    let mut node = base;
    if let Some(predicate) = guard {
        node = Node::new(
            NodeKind::Guard {
                predicate,
                child: Box::new(node),
            },
            stream.span_from(start),
        );
    }
    if let Some((duration, fallback)) = timeout {
        node = Node::new(
            NodeKind::Timeout {
                duration,
                fallback: fallback.map(Box::new),
                child: Box::new(node),
            },
            stream.span_from(start),
        );
    }
    if let Some(policy) = retry {
        node = Node::new(
            NodeKind::Retry {
                policy,
                child: Box::new(node),
            },
            stream.span_from(start),
        );
    }
    if let Some(policy) = breaker {
        node = Node::new(
            NodeKind::CircuitBreaker {
                policy,
                child: Box::new(node),
            },
            stream.span_from(start),
        );
    }
    if let Some(quiescence) = debounce {
        node = Node::new(
            NodeKind::Debounce {
                quiescence,
                child: Box::new(node),
            },
            stream.span_from(start),
        );
    }
    if let Some(interval) = throttle {
        node = Node::new(
            NodeKind::Throttle {
                interval,
                child: Box::new(node),
            },
            stream.span_from(start),
        );
    }
    if let Some(quantifier) = quantifier {
        node = Node::new(
            NodeKind::Loop {
                quantifier,
                child: Box::new(node),
            },
            stream.span_from(start),
        );
    }
    if compensation.is_some() {
        node.compensation = compensation;
    }
    if binding.is_some() {
        node.meta.binding = binding;
    }
    if detach {
        node = Node::new(
            NodeKind::Detach {
                child: Box::new(node),
            },
            stream.span_from(start),
        );
    }
    Ok(node)
}

/// Parse the payload of `@n[:strategy[(base[,multiplier])]]`.
///
/// The leading `@` is already consumed; the count is known to be next.
fn parse_retry_policy(stream: &mut TokenStream) -> Result<RetryPolicy, ParseError> {
    let max_attempts = expect_integer(stream, "retry attempt count")?;
    if max_attempts == 0 {
        return Err(ParseError::invalid_syntax(
            "retry requires at least one attempt",
            stream.current_span(),
        ));
    }

    let mut policy = RetryPolicy {
        max_attempts,
        ..RetryPolicy::default()
    };

    if stream.check(&Token::Colon) && matches!(stream.peek_nth(1), Some(Token::Ident(_))) {
        stream.advance();
        let span = stream.current_span();
        let name = expect_ident(stream, "retry strategy")?;
        policy.strategy = match name.as_str() {
            "fixed" => BackoffStrategy::Fixed,
            "linear" => BackoffStrategy::Linear,
            "exp" => BackoffStrategy::Exponential,
            other => {
                return Err(ParseError::invalid_syntax(
                    format!(
                        "unknown retry strategy `{}` (expected fixed, linear, or exp)",
                        other
                    ),
                    span,
                ));
            }
        };

        if stream.check(&Token::LParen) {
            stream.advance();
            policy.base_delay = expect_duration(stream, "retry base delay")?;
            if stream.check(&Token::Comma) {
                stream.advance();
                policy.multiplier = expect_integer(stream, "retry multiplier")? as f64;
            }
            stream.expect(Token::RParen)?;
        }
    }
    Ok(policy)
}

fn parse_primary(stream: &mut TokenStream) -> Result<Node, ParseError> {
    let start = stream.current_pos();
    match stream.peek() {
        Some(Token::Annotation(_)) => {
            let text = match stream.advance() {
                Some(Token::Annotation(s)) => s.to_string(),
                _ => unreachable!("peeked annotation"),
            };
            let mut node = parse_primary(stream)?;
            if node.meta.annotation.is_none() {
                node.meta.annotation = Some(text);
            }
            Ok(node)
        }
        Some(Token::Ident(_)) => {
            let step = expect_ident(stream, "step name")?;
            Ok(Node::new(
                NodeKind::Atomic { step },
                stream.span_from(start),
            ))
        }
        Some(Token::At) => {
            stream.advance();
            let name = expect_ident(stream, "subflow name")?;
            Ok(Node::new(
                NodeKind::Ref(RefKind::Flow(name)),
                stream.span_from(start),
            ))
        }
        Some(Token::Hash) => {
            stream.advance();
            let name = expect_ident(stream, "label name")?;
            if stream.check(&Token::Colon) {
                stream.advance();
                let child = parse_postfix(stream)?;
                Ok(Node::new(
                    NodeKind::Label {
                        name,
                        child: Box::new(child),
                    },
                    stream.span_from(start),
                ))
            } else {
                Ok(Node::new(
                    NodeKind::Ref(RefKind::Label(name)),
                    stream.span_from(start),
                ))
            }
        }
        Some(Token::LParen) => parse_group(stream, start),
        Some(Token::LBracket) => parse_barrier(stream, start),
        Some(Token::Lt) => parse_race(stream, start),
        Some(Token::LBrace) => parse_branch(stream, start),
        Some(Token::Dollar) => parse_machine(stream, start),
        other => Err(ParseError::unexpected_token(
            other,
            "at start of step",
            stream.current_span(),
        )),
    }
}

/// Parse `( ... )`: plain grouping, `(name: expr)` inline group, or
/// `(name): step` prefix group.
///
/// Group names are metadata for visualization exporters; they never add an
/// execution wrapper.
fn parse_group(stream: &mut TokenStream, start: usize) -> Result<Node, ParseError> {
    stream.advance(); // LParen

    // `(name): step` — tag the following postfix expression.
    if matches!(stream.peek(), Some(Token::Ident(_)))
        && matches!(stream.peek_nth(1), Some(Token::RParen))
        && matches!(stream.peek_nth(2), Some(Token::Colon))
    {
        let name = expect_ident(stream, "group name")?;
        stream.advance(); // RParen
        stream.advance(); // Colon
        let mut node = parse_postfix(stream)?;
        if node.meta.group.is_none() {
            node.meta.group = Some(name);
        }
        node.span = stream.span_from(start);
        return Ok(node);
    }

    // `(name: expr)` — tag the enclosed expression.
    if matches!(stream.peek(), Some(Token::Ident(_)))
        && matches!(stream.peek_nth(1), Some(Token::Colon))
    {
        let name = expect_ident(stream, "group name")?;
        stream.advance(); // Colon
        let mut node = parse_expr(stream, true)?;
        stream.expect(Token::RParen)?;
        if node.meta.group.is_none() {
            node.meta.group = Some(name);
        }
        node.span = stream.span_from(start);
        return Ok(node);
    }

    // Plain grouping, no metadata.
    let node = parse_expr(stream, true)?;
    stream.expect(Token::RParen)?;
    Ok(node)
}

fn parse_barrier(stream: &mut TokenStream, start: usize) -> Result<Node, ParseError> {
    stream.advance(); // LBracket
    let mut children = vec![parse_expr(stream, false)?];
    while stream.check(&Token::Bar) {
        stream.advance();
        children.push(parse_expr(stream, false)?);
    }
    stream.expect(Token::RBracket)?;
    Ok(Node::new(
        NodeKind::Barrier { children },
        stream.span_from(start),
    ))
}

fn parse_race(stream: &mut TokenStream, start: usize) -> Result<Node, ParseError> {
    stream.advance(); // Lt
    let mut children = vec![parse_expr(stream, false)?];
    while stream.check(&Token::Bar) {
        stream.advance();
        children.push(parse_expr(stream, false)?);
    }
    stream.expect(Token::Gt)?;
    if children.len() < 2 {
        return Err(ParseError::invalid_syntax(
            "race requires at least two arms",
            stream.span_from(start),
        ));
    }
    Ok(Node::new(
        NodeKind::Race { children },
        stream.span_from(start),
    ))
}

fn parse_branch(stream: &mut TokenStream, start: usize) -> Result<Node, ParseError> {
    stream.advance(); // LBrace
    let mut cases: Vec<(String, Node)> = Vec::new();
    let mut default: Option<Box<Node>> = None;

    loop {
        if stream.check(&Token::RBrace) {
            break;
        }
        if stream.check(&Token::Underscore) {
            let span = stream.current_span();
            stream.advance();
            stream.expect(Token::Colon)?;
            let node = parse_expr(stream, true)?;
            if default.is_some() {
                return Err(ParseError::duplicate_case("_", span));
            }
            default = Some(Box::new(node));
        } else {
            let span = stream.current_span();
            let label = expect_ident(stream, "branch case label")?;
            stream.expect(Token::Colon)?;
            let node = parse_expr(stream, true)?;
            if cases.iter().any(|(existing, _)| existing == &label) {
                return Err(ParseError::duplicate_case(&label, span));
            }
            cases.push((label, node));
        }
        if stream.check(&Token::Comma) {
            stream.advance();
        } else {
            break;
        }
    }
    stream.expect(Token::RBrace)?;

    if cases.is_empty() {
        return Err(ParseError::invalid_syntax(
            "branch requires at least one named case",
            stream.span_from(start),
        ));
    }
    Ok(Node::new(
        NodeKind::Branch { cases, default },
        stream.span_from(start),
    ))
}

fn parse_machine(stream: &mut TokenStream, start: usize) -> Result<Node, ParseError> {
    stream.advance(); // Dollar
    let name = expect_ident(stream, "state machine name")?;
    stream.expect(Token::LBrace)?;

    let mut transitions = Vec::new();
    loop {
        if stream.check(&Token::RBrace) {
            break;
        }
        let tstart = stream.current_pos();
        let from = expect_ident(stream, "source state")?;
        stream.expect(Token::Colon)?;
        let event = expect_ident(stream, "event name")?;
        stream.expect(Token::FatArrow)?;
        let to = expect_ident(stream, "target state")?;
        transitions.push(Transition {
            from,
            event,
            to,
            span: stream.span_from(tstart),
        });
        if stream.check(&Token::Comma) {
            stream.advance();
        }
    }
    stream.expect(Token::RBrace)?;

    if transitions.is_empty() {
        return Err(ParseError::invalid_syntax(
            "state machine requires at least one transition",
            stream.span_from(start),
        ));
    }
    Ok(Node::new(
        NodeKind::StateMachine { name, transitions },
        stream.span_from(start),
    ))
}

fn expect_ident(stream: &mut TokenStream, context: &str) -> Result<String, ParseError> {
    match stream.peek() {
        Some(Token::Ident(s)) => {
            let s = s.to_string();
            stream.advance();
            Ok(s)
        }
        other => Err(ParseError::unexpected_token(
            other,
            &format!("(expected {})", context),
            stream.current_span(),
        )),
    }
}

fn expect_integer(stream: &mut TokenStream, context: &str) -> Result<u32, ParseError> {
    match stream.peek() {
        Some(Token::Integer(n)) => {
            let n = *n;
            stream.advance();
            Ok(n)
        }
        other => Err(ParseError::unexpected_token(
            other,
            &format!("(expected {})", context),
            stream.current_span(),
        )),
    }
}

fn expect_duration(stream: &mut TokenStream, context: &str) -> Result<Duration, ParseError> {
    match stream.peek() {
        Some(Token::DurationLit(d)) => {
            let d = *d;
            stream.advance();
            Ok(d)
        }
        other => Err(ParseError::unexpected_token(
            other,
            &format!("(expected {})", context),
            stream.current_span(),
        )),
    }
}
