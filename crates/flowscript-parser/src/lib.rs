// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Hand-written recursive descent parser for FlowScript.
//!
//! Consumes the token stream produced by `flowscript-lexer` and builds the
//! AST defined in `flowscript-ast`. Postfix modifiers are desugared into
//! wrapper nodes in a canonical nesting order at parse time, so downstream
//! passes never reason about modifier order.

pub mod parser;

pub use parser::{parse_program, ParseError, ParseErrorKind};

// Re-export lexer
pub use flowscript_lexer::{tokenize, LexError, Token};
