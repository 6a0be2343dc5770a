// This module implements the hand-rolled tokenizer for xi source text. The Lexer walks the
// source bytes with a single cursor plus the current line and column, and scan_token()
// produces one Token per call until it reaches the end of input, after which it yields eof
// forever. Whitespace and `//` comments are skipped but counted, and the count is attached
// to the next token so diagnostics can rebuild a source line from the token stream.
// Identifiers are reclassified through an exact-match keyword table, `@` names through
// the directive table, and operators are resolved by trying the two-character table before
// the one-character table. A character nothing matches becomes an `unknown` token and a
// lexical diagnostic; scanning carries on past it.

//! Tokenizer for xi source text.

pub mod token;

pub use token::{Token, TokenKind};

use crate::diagnostics::{DiagnosticKind, Diagnostics, SourceContext};
use token::{lookup_directive, lookup_double, lookup_keyword, lookup_single};

/// Streaming tokenizer over one source buffer.
pub struct Lexer<'src> {
    source: &'src str,
    bytes: &'src [u8],
    path: String,
    current: usize,
    start: usize,
    line: usize,
    column: usize,
    /// Byte offset where each line seen so far begins.
    line_starts: Vec<usize>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, path: &str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            path: path.to_string(),
            current: 0,
            start: 0,
            line: 1,
            column: 1,
            line_starts: vec![0],
        }
    }

    /// Current line of the cursor.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Raw text of a 1-based source line, without its terminator.
    pub fn line_text(&self, line: usize) -> &'src str {
        let index = line.saturating_sub(1);
        let (start, skip) = match self.line_starts.get(index) {
            Some(start) => (*start, 0),
            None => {
                let last = self.line_starts.len() - 1;
                (self.line_starts[last], index - last)
            }
        };
        self.source
            .get(start..)
            .and_then(|rest| rest.lines().nth(skip))
            .unwrap_or("")
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn peek(&self, n: usize) -> u8 {
        self.bytes.get(self.current + n).copied().unwrap_or(0)
    }

    fn advance(&mut self) -> u8 {
        let c = self.peek(0);
        self.current += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
            self.line_starts.push(self.current);
        } else if c & 0xC0 != 0x80 {
            // UTF-8 continuation bytes do not start a new column
            self.column += 1;
        }
        c
    }

    /// Skip blanks, newlines, and line comments; return the blanks counted on
    /// the line the next token starts on.
    fn skip_whitespace(&mut self) -> usize {
        let mut count = 0;
        loop {
            match self.peek(0) {
                b' ' | b'\t' | b'\r' => {
                    self.advance();
                    count += 1;
                }
                b'\n' => {
                    self.advance();
                    count = 0;
                }
                b'/' if self.peek(1) == b'/' => {
                    while !self.is_at_end() && self.peek(0) != b'\n' {
                        self.advance();
                        count += 1;
                    }
                }
                _ => return count,
            }
        }
    }

    fn make_token(
        &self,
        kind: TokenKind,
        leading_whitespace: usize,
        line: usize,
        column: usize,
    ) -> Token<'src> {
        Token {
            kind,
            text: &self.source[self.start..self.current],
            line,
            column,
            leading_whitespace,
        }
    }

    fn report(&self, diagnostics: &mut Diagnostics, message: String, line: usize, column: usize) {
        diagnostics.report(
            DiagnosticKind::Lexical,
            &self.path,
            message,
            SourceContext::Line(self.line_text(line)),
            line,
            column,
        );
    }

    /// Scan the next token. Returns `Eof` forever once the input is exhausted.
    pub fn scan_token(&mut self, diagnostics: &mut Diagnostics) -> Token<'src> {
        let whitespace = self.skip_whitespace();
        self.start = self.current;
        let (line, column) = (self.line, self.column);

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof, whitespace, line, column);
        }

        let c = self.advance();

        if c.is_ascii_digit() {
            return self.number(whitespace, line, column);
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            return self.identifier(whitespace, line, column);
        }
        if c == b'"' {
            return self.string(diagnostics, whitespace, line, column);
        }
        if c == b'@' && self.peek(0).is_ascii_alphabetic() {
            return self.directive(diagnostics, whitespace, line, column);
        }

        if let Some(kind) = lookup_double(c, self.peek(0)) {
            self.advance();
            return self.make_token(kind, whitespace, line, column);
        }
        if let Some(kind) = lookup_single(c) {
            return self.make_token(kind, whitespace, line, column);
        }

        while !self.is_at_end() && self.peek(0) & 0xC0 == 0x80 {
            self.advance();
        }
        let token = self.make_token(TokenKind::Unknown, whitespace, line, column);
        self.report(
            diagnostics,
            format!("Token not found '{}'", token.text),
            line,
            column,
        );
        token
    }

    fn number(&mut self, whitespace: usize, line: usize, column: usize) -> Token<'src> {
        while self.peek(0).is_ascii_digit() {
            self.advance();
        }

        if self.peek(0) == b'.' {
            self.advance();
            while self.peek(0).is_ascii_digit() {
                self.advance();
            }
        }

        self.make_token(TokenKind::Number, whitespace, line, column)
    }

    fn consume_word(&mut self) {
        while self.peek(0).is_ascii_alphanumeric() || self.peek(0) == b'_' {
            self.advance();
        }
    }

    fn identifier(&mut self, whitespace: usize, line: usize, column: usize) -> Token<'src> {
        self.consume_word();
        let kind = lookup_keyword(&self.source[self.start..self.current])
            .unwrap_or(TokenKind::Identifier);
        self.make_token(kind, whitespace, line, column)
    }

    fn directive(
        &mut self,
        diagnostics: &mut Diagnostics,
        whitespace: usize,
        line: usize,
        column: usize,
    ) -> Token<'src> {
        self.consume_word();
        match lookup_directive(&self.source[self.start..self.current]) {
            Some(kind) => self.make_token(kind, whitespace, line, column),
            None => {
                let token = self.make_token(TokenKind::Unknown, whitespace, line, column);
                self.report(
                    diagnostics,
                    format!("Unknown directive '{}'", token.text),
                    line,
                    column,
                );
                token
            }
        }
    }

    fn string(
        &mut self,
        diagnostics: &mut Diagnostics,
        whitespace: usize,
        line: usize,
        column: usize,
    ) -> Token<'src> {
        loop {
            if self.is_at_end() || self.peek(0) == b'\n' {
                self.report(
                    diagnostics,
                    "Unterminated string literal".to_string(),
                    line,
                    column,
                );
                return self.make_token(TokenKind::Unknown, whitespace, line, column);
            }

            let escape_column = self.column;
            match self.advance() {
                b'"' => return self.make_token(TokenKind::String, whitespace, line, column),
                b'\\' => {
                    if self.is_at_end() || self.peek(0) == b'\n' {
                        continue;
                    }
                    let escaped = self.advance();
                    if !matches!(escaped, b'n' | b't' | b'r' | b'0' | b'\\' | b'"') {
                        self.report(
                            diagnostics,
                            format!("Unknown escape sequence '\\{}'", escaped as char),
                            self.line,
                            escape_column,
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

/// Scan `source` through its `eof` token.
pub fn tokenize<'src>(
    source: &'src str,
    path: &str,
    diagnostics: &mut Diagnostics,
) -> Vec<Token<'src>> {
    let mut lexer = Lexer::new(source, path);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.scan_token(diagnostics);
        tokens.push(token);
        if token.kind == TokenKind::Eof {
            break;
        }
    }
    log::debug!("{}: {} tokens", path, tokens.len());
    tokens
}

/// Decode a raw string lexeme (quotes included) into its value.
///
/// Unknown escapes are kept verbatim; the lexer has already reported them.
pub fn unescape(raw: &str) -> String {
    let inner = raw.strip_prefix('"').unwrap_or(raw);
    let inner = inner.strip_suffix('"').unwrap_or(inner);

    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => value.push('\n'),
            Some('t') => value.push('\t'),
            Some('r') => value.push('\r'),
            Some('0') => value.push('\0'),
            Some('\\') => value.push('\\'),
            Some('"') => value.push('"'),
            Some(other) => {
                value.push('\\');
                value.push(other);
            }
            None => value.push('\\'),
        }
    }
    value
}
