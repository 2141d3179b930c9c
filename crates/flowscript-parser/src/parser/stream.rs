//! Token stream wrapper for the hand-written parser.

use flowscript_ast::Span;
use flowscript_lexer::Token;
use std::ops::Range;

/// Token stream with lookahead and position tracking.
///
/// Each token is paired with its byte span from the source, enabling
/// accurate error message locations.
pub struct TokenStream<'src> {
    tokens: &'src [(Token, Range<usize>)],
    pos: usize,
}

impl<'src> TokenStream<'src> {
    /// Create a new token stream from tokens with their byte spans.
    pub fn new(tokens: &'src [(Token, Range<usize>)]) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Peek at the current token without consuming it.
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    /// Peek at the nth token ahead without consuming.
    pub fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(tok, _)| tok)
    }

    /// Consume and return the current token.
    pub fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(tok, _)| tok.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Check if the current token matches the expected token's discriminant.
    pub fn check(&self, expected: &Token) -> bool {
        matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    /// Expect a specific token and advance past it.
    pub fn expect(&mut self, expected: Token) -> Result<Span, super::ParseError> {
        if self.check(&expected) {
            let start = self.pos;
            self.advance();
            Ok(self.span_from(start))
        } else {
            Err(super::ParseError::expected_token(
                &expected,
                self.peek(),
                self.current_span(),
            ))
        }
    }

    /// Check if we've reached the end of the token stream.
    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Get the current position in the token stream.
    pub fn current_pos(&self) -> usize {
        self.pos
    }

    /// Create a byte span from a starting token position to the last
    /// consumed token.
    pub fn span_from(&self, start: usize) -> Span {
        let start_byte = self
            .tokens
            .get(start)
            .map(|(_, span)| span.start)
            .unwrap_or_else(|| self.end_offset());

        let end_byte = if self.pos > start {
            self.tokens
                .get(self.pos - 1)
                .map(|(_, span)| span.end)
                .unwrap_or(start_byte)
        } else {
            start_byte
        };

        Span::new(start_byte as u32, end_byte as u32)
    }

    /// Get a span for the current token (or a zero-width span at EOF).
    pub fn current_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, span)) => Span::new(span.start as u32, span.end as u32),
            None => {
                let end = self.end_offset() as u32;
                Span::new(end, end)
            }
        }
    }

    fn end_offset(&self) -> usize {
        self.tokens.last().map(|(_, span)| span.end).unwrap_or(0)
    }

    /// Synchronize to the next plausible flow definition for error recovery.
    ///
    /// Skips tokens until an `ident :` pair appears at delimiter depth zero,
    /// consuming at least one token so recovery always makes progress.
    pub fn synchronize(&mut self) {
        self.advance();
        let mut depth: i32 = 0;
        while !self.at_end() {
            match self.peek() {
                Some(Token::LParen) | Some(Token::LBrace) | Some(Token::LBracket) => depth += 1,
                Some(Token::RParen) | Some(Token::RBrace) | Some(Token::RBracket) => {
                    depth = (depth - 1).max(0);
                }
                Some(Token::Ident(_))
                    if depth == 0 && matches!(self.peek_nth(1), Some(Token::Colon)) =>
                {
                    break;
                }
                _ => {}
            }
            self.advance();
        }
    }
}
