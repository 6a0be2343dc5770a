// This module implements the parser that turns a token sequence into an arena-owned Program.
// Statements are parsed by recursive descent with a flat dispatch on the leading token
// (stmt.rs); expressions use precedence climbing over null and left denotations (expr.rs).
// The parser never stops at the first syntax error. expect() hands back the token it found
// wrapped in Recovered together with the diagnostic describing the mismatch, the diagnostic
// is recorded in the unit's sink, and parsing continues with best-effort structure. Malformed
// expressions and statements leave Invalid placeholders in the tree. Every statement-list
// loop checks that an iteration consumed at least one token and skips one otherwise, so
// recovery always terminates. Nesting of statements and expressions is capped at
// MAX_NESTING_DEPTH; past it the parser reports one diagnostic, skips the over-deep
// construct and leaves an Invalid placeholder, so the tree every later pass walks
// recursively stays shallow. The only hard failure is arena exhaustion, which aborts the
// unit through ArenaResult.

//! Token stream to AST.

mod expr;
mod stmt;

pub use expr::{binding_power, BindingPower};

use crate::arena::{Arena, ArenaResult};
use crate::ast::{Expr, Program, Stmt, Type};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, SourceContext};
use crate::lexer::{Token, TokenKind};

/// Deepest statement and expression nesting the parser accepts.
pub const MAX_NESTING_DEPTH: usize = 256;

/// A best-effort parse result paired with the diagnostic, if any, that was
/// raised while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered<T> {
    pub value: T,
    pub diagnostic: Option<Diagnostic>,
}

impl<T> Recovered<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            diagnostic: None,
        }
    }

    pub fn with_diagnostic(value: T, diagnostic: Diagnostic) -> Self {
        Self {
            value,
            diagnostic: Some(diagnostic),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostic.is_none()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Recovered<U> {
        Recovered {
            value: f(self.value),
            diagnostic: self.diagnostic,
        }
    }

    /// Record the diagnostic, if any, and keep going with the value.
    pub fn report(self, sink: &mut Diagnostics) -> T {
        if let Some(diagnostic) = self.diagnostic {
            sink.push(diagnostic);
        }
        self.value
    }
}

/// Parser state for one token sequence.
pub struct Parser<'t, 'a> {
    tokens: &'t [Token<'t>],
    pos: usize,
    arena: &'a Arena,
    path: &'t str,
    diagnostics: &'t mut Diagnostics,
    eof: Token<'t>,
    depth: usize,
}

impl<'t, 'a> Parser<'t, 'a> {
    pub fn new(
        tokens: &'t [Token<'t>],
        arena: &'a Arena,
        path: &'t str,
        diagnostics: &'t mut Diagnostics,
    ) -> Self {
        let eof = match tokens.last() {
            Some(last) if last.kind == TokenKind::Eof => *last,
            Some(last) => Token {
                kind: TokenKind::Eof,
                text: "",
                line: last.line,
                column: last.end_column(),
                leading_whitespace: 0,
            },
            None => Token {
                kind: TokenKind::Eof,
                text: "",
                line: 1,
                column: 1,
                leading_whitespace: 0,
            },
        };

        Self {
            tokens,
            pos: 0,
            arena,
            path,
            diagnostics,
            eof,
            depth: 0,
        }
    }

    /// Parse statements until `eof`.
    pub fn parse_program(&mut self) -> ArenaResult<Program<'a>> {
        let arena = self.arena;
        let mut statements = arena.vec();

        while !self.at_end() {
            let start = self.pos;
            statements.push(self.parse_stmt()?)?;
            self.ensure_progress(start);
        }

        let statements = statements.into_slice();
        log::debug!(
            "{}: parsed {} top-level statements, {} diagnostics",
            self.path,
            statements.len(),
            self.diagnostics.len()
        );
        Ok(Program { statements })
    }

    // Cursor

    fn current(&self) -> Token<'t> {
        self.tokens.get(self.pos).copied().unwrap_or(self.eof)
    }

    fn peek(&self, offset: usize) -> Token<'t> {
        self.tokens.get(self.pos + offset).copied().unwrap_or(self.eof)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn at_end(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    fn advance(&mut self) -> Token<'t> {
        let token = self.current();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    /// Consume the current token if it has the given kind.
    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Enter one more nesting level, or return false at the limit.
    fn descend(&mut self) -> bool {
        if self.depth >= MAX_NESTING_DEPTH {
            return false;
        }
        self.depth += 1;
        true
    }

    /// Skip the rest of an over-deep construct: everything up to a `;` or
    /// `,` outside brackets, or the first unmatched closing bracket.
    fn skip_nested(&mut self) {
        let mut open = 0usize;
        loop {
            match self.current().kind {
                TokenKind::Eof => break,
                TokenKind::LParen | TokenKind::LBrace => open += 1,
                TokenKind::RParen | TokenKind::RBrace => {
                    if open == 0 {
                        break;
                    }
                    open -= 1;
                }
                TokenKind::Semicolon | TokenKind::Comma if open == 0 => break,
                _ => {}
            }
            self.advance();
        }
    }

    fn ensure_progress(&mut self, start: usize) {
        if self.pos == start && !self.at_end() {
            let skipped = self.advance();
            log::trace!("skipping {} to make progress", skipped);
        }
    }

    // Diagnostics

    /// Position used for a complaint about the current token. A token that is
    /// missing at the end of a line is reported just past the previous token.
    fn error_position(&self) -> (usize, usize) {
        let current = self.current();
        if self.pos > 0 {
            if let Some(previous) = self.tokens.get(self.pos - 1) {
                if current.kind == TokenKind::Eof || current.line > previous.line {
                    return (previous.line, previous.end_column());
                }
            }
        }
        (current.line, current.column)
    }

    fn diagnostic(&self, message: impl Into<String>) -> Diagnostic {
        let (line, column) = self.error_position();
        Diagnostic::new(
            DiagnosticKind::Parser,
            self.path,
            message,
            SourceContext::Tokens(self.tokens),
            line,
            column,
        )
    }

    fn error(&mut self, message: impl Into<String>) {
        let diagnostic = self.diagnostic(message);
        self.diagnostics.push(diagnostic);
    }

    /// Match `kind`, or produce a diagnostic and hand back the unexpected
    /// token without consuming it.
    pub fn expect(&mut self, kind: TokenKind, message: &str) -> Recovered<Token<'t>> {
        if self.check(kind) {
            Recovered::clean(self.advance())
        } else {
            Recovered::with_diagnostic(self.current(), self.diagnostic(message))
        }
    }

    fn expect_token(&mut self, kind: TokenKind, message: &str) -> Token<'t> {
        self.expect(kind, message).report(self.diagnostics)
    }

    /// Expect an identifier and copy it into the arena; empty on mismatch.
    fn expect_name(&mut self, message: &str) -> ArenaResult<&'a str> {
        let recovered = self.expect(TokenKind::Identifier, message);
        let name = if recovered.is_clean() {
            recovered.value.text
        } else {
            ""
        };
        recovered.report(self.diagnostics);
        self.text(name)
    }

    // Arena

    fn text(&self, text: &str) -> ArenaResult<&'a str> {
        let arena: &'a Arena = self.arena;
        arena.alloc_str(text)
    }

    fn expr(&self, expr: Expr<'a>) -> ArenaResult<&'a Expr<'a>> {
        let node: &'a Expr<'a> = self.arena.alloc(expr)?;
        Ok(node)
    }

    fn stmt(&self, stmt: Stmt<'a>) -> ArenaResult<&'a Stmt<'a>> {
        let node: &'a Stmt<'a> = self.arena.alloc(stmt)?;
        Ok(node)
    }

    fn symbol_type(&self, name: &str) -> ArenaResult<&'a Type<'a>> {
        let name = self.text(name)?;
        let node: &'a Type<'a> = self.arena.alloc(Type::Symbol(name))?;
        Ok(node)
    }
}

/// Parse a full token sequence into a [`Program`].
///
/// Syntax errors are recorded in `diagnostics`; only arena exhaustion is
/// returned as an error.
pub fn parse<'a>(
    tokens: &[Token<'_>],
    arena: &'a Arena,
    path: &str,
    diagnostics: &mut Diagnostics,
) -> ArenaResult<Program<'a>> {
    Parser::new(tokens, arena, path, diagnostics).parse_program()
}

/// Parse a single expression from the start of `tokens`.
pub fn parse_expression<'a>(
    tokens: &[Token<'_>],
    arena: &'a Arena,
    path: &str,
    diagnostics: &mut Diagnostics,
) -> ArenaResult<&'a Expr<'a>> {
    let mut parser = Parser::new(tokens, arena, path, diagnostics);
    let expr = parser.parse_expr(BindingPower::Default)?;
    if !parser.at_end() {
        parser.error(format!(
            "Unexpected '{}' after the expression",
            parser.current().text
        ));
    }
    Ok(expr)
}
