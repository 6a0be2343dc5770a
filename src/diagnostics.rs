// This module collects the problems found while compiling one unit and renders them as
// source excerpts. Lexical and parse problems are never fatal by themselves: the lexer and
// parser record a Diagnostic and keep going, and the session checks the sink between
// phases. Each diagnostic is rendered once, at report time, into a fixed layout: a header
// with the error class, a location line, the offending source line and a caret under the
// reported column, then the note. The source line comes either from the raw text (lexer)
// or is rebuilt from the tokens on that line using their leading whitespace (parser), so
// the parser never needs the source buffer.

//! Diagnostic records, rendering, and the per-unit sink.

use crate::lexer::Token;
use std::fmt::{self, Write};

/// Error class shown in the diagnostic header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    Lexical,
    Parser,
    Lowering,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Lexical => write!(f, "Lexical"),
            DiagnosticKind::Parser => write!(f, "Parser"),
            DiagnosticKind::Lowering => write!(f, "Lowering"),
        }
    }
}

/// Where the excerpt line comes from.
#[derive(Debug, Clone, Copy)]
pub enum SourceContext<'a> {
    /// The raw text of the reported line.
    Line(&'a str),
    /// Tokens of the unit; the reported line is rebuilt from them.
    Tokens(&'a [Token<'a>]),
    /// No excerpt.
    None,
}

/// A single rendered problem report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub rendered: String,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        path: &str,
        message: impl Into<String>,
        context: SourceContext<'_>,
        line: usize,
        column: usize,
    ) -> Self {
        let message = message.into();
        let rendered = match render(kind, path, &message, context, line, column) {
            Ok(text) => text,
            Err(_) => format!(
                "Error in {} at line {}, pos {}: {}",
                path, line, column, message
            ),
        };

        Self {
            kind,
            path: path.to_string(),
            line,
            column,
            message,
            rendered,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// Rebuild the text of `line` from the tokens that start on it.
pub fn line_from_tokens(tokens: &[Token<'_>], line: usize) -> String {
    let mut text = String::new();
    for token in tokens.iter().filter(|t| t.line == line) {
        text.extend(std::iter::repeat(' ').take(token.leading_whitespace));
        text.push_str(token.text);
    }
    text
}

fn render(
    kind: DiagnosticKind,
    path: &str,
    message: &str,
    context: SourceContext<'_>,
    line: usize,
    column: usize,
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "error: {}", kind)?;

    let excerpt = match context {
        SourceContext::Line(text) => Some(text.to_string()),
        SourceContext::Tokens(tokens) => Some(line_from_tokens(tokens, line)),
        SourceContext::None => None,
    };

    match excerpt {
        Some(text) => {
            writeln!(out, "  --> [{}::{}]({})", line, column, path)?;
            writeln!(out, "   |")?;
            writeln!(out, " {:02}| {}", line, text)?;
            // Lexical reports point with blanks, parser reports with a tilde run.
            let fill = if kind == DiagnosticKind::Lexical { ' ' } else { '~' };
            let pad: String = std::iter::repeat(fill).take(column.saturating_sub(1)).collect();
            writeln!(out, "   |{}^", pad)?;
        }
        None => writeln!(out, "  --> ({})", path)?,
    }

    write!(out, "note: {}", message)?;
    Ok(out)
}

/// Accumulates the diagnostics of one compilation unit.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    printed: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render and record a diagnostic.
    pub fn report(
        &mut self,
        kind: DiagnosticKind,
        path: &str,
        message: impl Into<String>,
        context: SourceContext<'_>,
        line: usize,
        column: usize,
    ) {
        self.push(Diagnostic::new(kind, path, message, context, line, column));
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        log::debug!(
            "{} diagnostic at {}:{}: {}",
            diagnostic.kind,
            diagnostic.line,
            diagnostic.column,
            diagnostic.message
        );
        self.entries.push(diagnostic);
    }

    /// Print the count and every diagnostic not printed yet to stderr.
    ///
    /// Returns whether any diagnostic has been recorded. A diagnostic is
    /// printed at most once however often this is called.
    pub fn has_errors(&mut self) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        if self.printed < self.entries.len() {
            eprintln!("Total Errors: {}", self.entries.len());
            for diagnostic in &self.entries[self.printed..] {
                eprintln!("{}", diagnostic);
            }
            self.printed = self.entries.len();
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn count_of(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// All diagnostics, blank-line separated.
    pub fn render_all(&self) -> String {
        self.entries
            .iter()
            .map(|d| d.rendered.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
