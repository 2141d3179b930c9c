// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Lexical analysis for FlowScript.
//!
//! Tokenization of FlowScript source using logos.
//!
//! # Design
//!
//! - `Token` — all FlowScript token types (operators, sigils, literals,
//!   identifiers)
//! - Multi-character operators win over their prefixes by longest match
//!   (`!!` before `!`, `&|` before `&`, `@@` before `@`)
//! - Comments and newlines are stripped during lexing (not tokens)
//! - Quoted strings are captured verbatim as `Annotation` tokens
//! - Token strings defined once in `TOKEN_STRINGS` (single source of truth
//!   for Display)

use logos::Logos;
use std::ops::Range;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;

/// FlowScript token.
///
/// Token strings for operators, sigils, and delimiters are defined once in
/// the `TOKEN_STRINGS` table and indexed by discriminant for Display.
///
/// # Layout
///
/// Uses `#[repr(u16)]` to guarantee discriminant values are stable and
/// can be safely used to index into `TOKEN_STRINGS`.
#[derive(Logos, Debug, Clone, PartialEq)]
#[repr(u16)]
#[logos(skip r"[ \t\r\n]+")] // Skip whitespace, newlines included
#[logos(skip r"//[^\n]*")] // Skip // comments
#[logos(skip r"/\*([^*]|\*[^/])*\*/")] // Skip /* */ comments
pub enum Token {
    // === Combinators ===
    /// Sequence `->`
    #[token("->")]
    Arrow,
    /// Infix barrier `&&`
    #[token("&&")]
    AndAnd,
    /// Infix race `||`
    #[token("||")]
    OrOr,
    /// Broadcast fan-out `&|`
    #[token("&|")]
    AndBar,
    /// Finally `!!`
    #[token("!!")]
    BangBang,
    /// Catch-and-suppress `!?`
    #[token("!?")]
    BangQuest,
    /// Debounce `~>`
    #[token("~>")]
    DebounceOp,
    /// Throttle `~|`
    #[token("~|")]
    ThrottleOp,
    /// Event stream `>>`
    #[token(">>")]
    StreamOp,
    /// State transition `=>`
    #[token("=>")]
    FatArrow,
    /// Circuit breaker `@@`
    #[token("@@")]
    AtAt,
    /// Catch `!`
    #[token("!")]
    Bang,
    /// Quantifier / guard prefix `?`
    #[token("?")]
    Question,
    /// Quantifier `*`
    #[token("*")]
    Star,
    /// Quantifier `+`
    #[token("+")]
    Plus,
    /// Detach `&`
    #[token("&")]
    Amp,
    /// Fork / barrier separator `|`
    #[token("|")]
    Bar,
    /// Timeout `~`
    #[token("~")]
    Tilde,

    // === Sigils ===
    /// Subflow / retry sigil `@`
    #[token("@")]
    At,
    /// Label sigil `#`
    #[token("#")]
    Hash,
    /// State machine sigil `$`
    #[token("$")]
    Dollar,
    /// Compensation sigil `^`
    #[token("^")]
    Caret,

    // === Punctuation ===
    /// `:`
    #[token(":")]
    Colon,
    /// `,`
    #[token(",")]
    Comma,
    /// Branch default `_`
    #[token("_")]
    Underscore,

    // === Delimiters ===
    /// `(`
    #[token("(")]
    LParen,
    /// `)`
    #[token(")")]
    RParen,
    /// `{`
    #[token("{")]
    LBrace,
    /// `}`
    #[token("}")]
    RBrace,
    /// `[`
    #[token("[")]
    LBracket,
    /// `]`
    #[token("]")]
    RBracket,
    /// Race open `<`
    #[token("<")]
    Lt,
    /// Race close `>`
    #[token(">")]
    Gt,

    // === Literals (not in TOKEN_STRINGS) ===
    /// Duration literal: integer plus `ms`/`s`/`m`/`h` suffix.
    #[regex(r"[0-9]+(ms|s|m|h)", parse_duration)]
    DurationLit(Duration),

    /// Integer literal.
    ///
    /// Parse failure (overflow) makes logos emit a generic error token.
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<u32>().ok())]
    Integer(u32),

    /// Quoted annotation text, captured verbatim with escapes resolved.
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Annotation(Rc<str>),

    /// Identifier. A solitary `_` lexes as [`Token::Underscore`] instead.
    ///
    /// Hyphens are excluded so `a->b` never lexes as `a-` `>` `b`.
    #[regex(r"[A-Za-z][A-Za-z0-9_]*|_[A-Za-z0-9_]+", |lex| Rc::from(lex.slice()))]
    Ident(Rc<str>),
}

/// Parse a duration literal like `500ms`, `5s`, `2m`, `1h`.
fn parse_duration(lex: &mut logos::Lexer<Token>) -> Option<Duration> {
    let slice = lex.slice();
    let split = slice.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = slice.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(n)),
        "s" => Some(Duration::from_secs(n)),
        "m" => Some(Duration::from_secs(n * 60)),
        "h" => Some(Duration::from_secs(n * 3600)),
        _ => None,
    }
}

/// Strip surrounding quotes and resolve `\"`, `\\`, `\n`, `\t` escapes.
fn unescape(quoted: &str) -> Option<Rc<str>> {
    let inner = &quoted[1..quoted.len() - 1];
    if !inner.contains('\\') {
        return Some(Rc::from(inner));
    }
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('"') => result.push('"'),
                Some('\\') => result.push('\\'),
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => return None, // Trailing backslash
            }
        } else {
            result.push(c);
        }
    }
    Some(Rc::from(result.as_str()))
}

/// Lexing failure: an unrecognized character sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized input at byte {position}: `{fragment}`")]
pub struct LexError {
    /// Byte offset of the offending fragment.
    pub position: usize,
    /// The source text that failed to lex.
    pub fragment: String,
}

/// Tokenize FlowScript source into tokens paired with their byte spans.
///
/// Comments and whitespace are dropped. Fails on the first unrecognized
/// character.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Range<usize>)>, LexError> {
    let mut tokens = Vec::new();
    for (result, span) in Token::lexer(source).spanned() {
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(LexError {
                    position: span.start,
                    fragment: source[span].to_string(),
                });
            }
        }
    }
    Ok(tokens)
}

/// Token string lookup table.
///
/// Maps discriminant indices to their string representation for simple
/// tokens. The `#[token("...")]` attributes above must match these strings;
/// this table consolidates Display logic to avoid a large match.
const TOKEN_STRINGS: &[&str] = &[
    "->",
    "&&",
    "||",
    "&|",
    "!!",
    "!?",
    "~>",
    "~|",
    ">>",
    "=>",
    "@@",
    "!",
    "?",
    "*",
    "+",
    "&",
    "|",
    "~", // combinators
    "@",
    "#",
    "$",
    "^", // sigils
    ":",
    ",",
    "_", // punctuation
    "(",
    ")",
    "{",
    "}",
    "[",
    "]",
    "<",
    ">", // delimiters
];

impl Token {
    /// Get the index into TOKEN_STRINGS for simple tokens.
    ///
    /// # Safety
    ///
    /// Safe due to `#[repr(u16)]` on Token ensuring stable discriminants.
    fn token_string_index(&self) -> usize {
        let discriminant = unsafe { *(self as *const Token as *const u16) };
        discriminant as usize
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Literals with data (not in TOKEN_STRINGS table)
            Token::Integer(n) => write!(f, "{}", n),
            Token::DurationLit(d) => write!(f, "{}", format_duration(*d)),
            Token::Annotation(s) => write!(f, "\"{}\"", s),
            Token::Ident(id) => write!(f, "{}", id),

            // Simple tokens, indexed by discriminant
            _ => {
                let idx = self.token_string_index();
                let s = TOKEN_STRINGS
                    .get(idx)
                    .expect("BUG: token discriminant out of bounds for TOKEN_STRINGS");
                write!(f, "{}", s)
            }
        }
    }
}

/// Render a duration in the shortest source form that round-trips.
fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        return format!("{}ms", ms);
    }
    let secs = d.as_secs();
    if secs % 3600 == 0 && secs != 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 && secs != 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test helper: lex source and panic on any error.
    fn lex(source: &str) -> Vec<Token> {
        Token::lexer(source)
            .collect::<Result<Vec<_>, _>>()
            .expect("lexing failed - invalid token encountered")
    }

    /// Test helper: create an identifier token.
    fn ident(s: &str) -> Token {
        Token::Ident(Rc::from(s))
    }

    #[test]
    fn test_sequence_operator() {
        let tokens = lex("validate -> persist -> notify");
        assert_eq!(
            tokens,
            vec![
                ident("validate"),
                Token::Arrow,
                ident("persist"),
                Token::Arrow,
                ident("notify"),
            ]
        );
    }

    #[test]
    fn test_longest_match_wins() {
        // Every multi-char operator beats its one-char prefix.
        let tokens = lex("!! !? ! && &| & || | ~> ~| ~ @@ @ >> =>");
        assert_eq!(
            tokens,
            vec![
                Token::BangBang,
                Token::BangQuest,
                Token::Bang,
                Token::AndAnd,
                Token::AndBar,
                Token::Amp,
                Token::OrOr,
                Token::Bar,
                Token::DebounceOp,
                Token::ThrottleOp,
                Token::Tilde,
                Token::AtAt,
                Token::At,
                Token::StreamOp,
                Token::FatArrow,
            ]
        );
    }

    #[test]
    fn test_durations() {
        let tokens = lex("500ms 5s 2m 1h");
        assert_eq!(
            tokens,
            vec![
                Token::DurationLit(Duration::from_millis(500)),
                Token::DurationLit(Duration::from_secs(5)),
                Token::DurationLit(Duration::from_secs(120)),
                Token::DurationLit(Duration::from_secs(3600)),
            ]
        );
    }

    #[test]
    fn test_integer_vs_duration() {
        let tokens = lex("3 30s");
        assert_eq!(
            tokens,
            vec![
                Token::Integer(3),
                Token::DurationLit(Duration::from_secs(30)),
            ]
        );
    }

    #[test]
    fn test_underscore_and_idents() {
        let tokens = lex("_ _fallback fetchUser snake_case");
        assert_eq!(
            tokens,
            vec![
                Token::Underscore,
                ident("_fallback"),
                ident("fetchUser"),
                ident("snake_case"),
            ]
        );
    }

    #[test]
    fn test_arrow_without_spaces() {
        let tokens = lex("a->b");
        assert_eq!(tokens, vec![ident("a"), Token::Arrow, ident("b")]);
    }

    #[test]
    fn test_annotation_strings() {
        let tokens = lex(r#""fetch the user" step"#);
        assert_eq!(
            tokens,
            vec![Token::Annotation(Rc::from("fetch the user")), ident("step")]
        );
    }

    #[test]
    fn test_annotation_escapes() {
        let tokens = lex(r#""say \"hi\"\n""#);
        assert_eq!(tokens, vec![Token::Annotation(Rc::from("say \"hi\"\n"))]);
    }

    #[test]
    fn test_line_comments() {
        let tokens = lex("a // trailing comment\n-> b");
        assert_eq!(tokens, vec![ident("a"), Token::Arrow, ident("b")]);
    }

    #[test]
    fn test_block_comments() {
        let tokens = lex("a /* multi\nline */ -> b");
        assert_eq!(tokens, vec![ident("a"), Token::Arrow, ident("b")]);
    }

    #[test]
    fn test_retry_and_breaker_postfix() {
        let tokens = lex("charge@3:exp @@{2,30s}");
        assert_eq!(
            tokens,
            vec![
                ident("charge"),
                Token::At,
                Token::Integer(3),
                Token::Colon,
                ident("exp"),
                Token::AtAt,
                Token::LBrace,
                Token::Integer(2),
                Token::Comma,
                Token::DurationLit(Duration::from_secs(30)),
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn test_full_definition_line() {
        let tokens = lex("checkout: validate -> <pay | fallback> ! alert");
        assert_eq!(
            tokens,
            vec![
                ident("checkout"),
                Token::Colon,
                ident("validate"),
                Token::Arrow,
                Token::Lt,
                ident("pay"),
                Token::Bar,
                ident("fallback"),
                Token::Gt,
                Token::Bang,
                ident("alert"),
            ]
        );
    }

    #[test]
    fn test_tokenize_spans() {
        let tokens = tokenize("a -> b").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].1, 0..1);
        assert_eq!(tokens[1].1, 2..4);
        assert_eq!(tokens[2].1, 5..6);
    }

    #[test]
    fn test_lexer_error_detection() {
        let err = tokenize("a -> %").unwrap_err();
        assert_eq!(err.position, 5);
        assert_eq!(err.fragment, "%");
    }

    #[test]
    fn test_display_round_trip() {
        assert_eq!(Token::Arrow.to_string(), "->");
        assert_eq!(Token::AtAt.to_string(), "@@");
        assert_eq!(Token::DebounceOp.to_string(), "~>");
        assert_eq!(Token::Gt.to_string(), ">");
        assert_eq!(
            Token::DurationLit(Duration::from_millis(1500)).to_string(),
            "1500ms"
        );
        assert_eq!(Token::DurationLit(Duration::from_secs(90)).to_string(), "90s");
        assert_eq!(ident("fetch").to_string(), "fetch");
    }
}
