//! Parse error types.

use flowscript_ast::Span;
use flowscript_lexer::Token;
use std::fmt;

/// Parse error with source location and context.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// Kind of parse error
    pub kind: ParseErrorKind,
    /// Source location where the error occurred
    pub span: Span,
    /// Human-readable error message
    pub message: String,
}

/// Category of parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A specific token was expected but a different one was found.
    UnexpectedToken,
    /// Input ended while a construct was incomplete.
    UnexpectedEof,
    /// Tokens are present but violate the grammar.
    InvalidSyntax,
    /// The same modifier kind was attached to one step twice.
    DuplicateModifier,
    /// A branch declared the same case label twice.
    DuplicateCase,
    /// Two top-level flows share a name.
    DuplicateFlow,
}

impl ParseError {
    /// Create an "expected token" error.
    pub fn expected_token(expected: &Token, found: Option<&Token>, span: Span) -> Self {
        let message = match found {
            Some(token) => format!("expected `{}`, found `{}`", expected, token),
            None => format!("expected `{}`, found end of input", expected),
        };
        Self {
            kind: if found.is_none() {
                ParseErrorKind::UnexpectedEof
            } else {
                ParseErrorKind::UnexpectedToken
            },
            span,
            message,
        }
    }

    /// Create an "unexpected token" error.
    pub fn unexpected_token(found: Option<&Token>, context: &str, span: Span) -> Self {
        let message = match found {
            Some(token) => format!("unexpected `{}` {}", token, context),
            None => format!("unexpected end of input {}", context),
        };
        Self {
            kind: if found.is_none() {
                ParseErrorKind::UnexpectedEof
            } else {
                ParseErrorKind::UnexpectedToken
            },
            span,
            message,
        }
    }

    /// Create an "invalid syntax" error.
    pub fn invalid_syntax(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::InvalidSyntax,
            span,
            message: message.into(),
        }
    }

    /// Create a "duplicate modifier" error.
    pub fn duplicate_modifier(modifier: &str, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::DuplicateModifier,
            span,
            message: format!("step already carries a {} modifier", modifier),
        }
    }

    /// Create a "duplicate case" error.
    pub fn duplicate_case(label: &str, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::DuplicateCase,
            span,
            message: format!("branch case `{}` is declared twice", label),
        }
    }

    /// Create a "duplicate flow" error.
    pub fn duplicate_flow(name: &str, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::DuplicateFlow,
            span,
            message: format!("flow `{}` is defined twice", name),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

impl std::error::Error for ParseError {}
