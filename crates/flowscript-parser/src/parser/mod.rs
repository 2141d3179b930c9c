//! Recursive descent parser for FlowScript.
//!
//! ## Architecture
//!
//! - `stream`: TokenStream wrapper with lookahead
//! - `error`: ParseError types
//! - `expr`: combinator expression parser (sequence → catch → fork →
//!   stream → postfix → primary)
//!
//! A program is a list of `name: expr` flow definitions. Newlines are
//! insignificant; a definition ends where the next definition (or EOF)
//! begins. On error the parser synchronizes to the next plausible
//! definition start and keeps going, so all errors are reported in one
//! pass.

mod error;
mod expr;
mod stream;

pub use error::{ParseError, ParseErrorKind};
use stream::TokenStream;

use flowscript_ast::{Flow, Program};
use flowscript_lexer::Token;
use std::ops::Range;

/// Parse a token stream into a program.
///
/// # Returns
/// - `Ok(Program)` if parsing succeeds
/// - `Err(Vec<ParseError>)` with every error found, if any
pub fn parse_program(tokens: &[(Token, Range<usize>)]) -> Result<Program, Vec<ParseError>> {
    let mut stream = TokenStream::new(tokens);
    let mut program = Program::default();
    let mut errors = Vec::new();

    while !stream.at_end() {
        match parse_definition(&mut stream) {
            Ok(flow) => {
                if program.flows.contains_key(&flow.name) {
                    errors.push(ParseError::duplicate_flow(&flow.name, flow.span));
                } else {
                    program.flows.insert(flow.name.clone(), flow);
                }
            }
            Err(e) => {
                errors.push(e);
                stream.synchronize();
            }
        }
    }

    if errors.is_empty() {
        Ok(program)
    } else {
        Err(errors)
    }
}

/// Parse one `name: expr` flow definition.
fn parse_definition(stream: &mut TokenStream) -> Result<Flow, ParseError> {
    let start = stream.current_pos();

    let name = match stream.peek() {
        Some(Token::Ident(name)) => {
            let name = name.to_string();
            stream.advance();
            name
        }
        other => {
            return Err(ParseError::unexpected_token(
                other,
                "at start of flow definition",
                stream.current_span(),
            ));
        }
    };
    stream.expect(Token::Colon)?;

    let root = expr::parse_expr(stream, true)?;
    Ok(Flow {
        span: stream.span_from(start),
        name,
        root,
    })
}
