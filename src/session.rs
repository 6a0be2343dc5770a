// This module provides the per-unit compilation session. CompilationSession borrows the
// arena that will own the unit's AST and owns everything else that is scoped to one
// compilation: the options, the diagnostics sink, and the statistics. Each phase is a
// method (tokenize, parse, lower), and the gating between phases lives here: a phase that
// recorded diagnostics of its own kind stops the pipeline with a CompileError carrying the
// count, so lexical problems never reach the parser and parse problems never reach
// lowering. A lowering failure is recorded as a Lowering diagnostic before it is returned,
// so the sink always holds every problem the driver has to print. The session itself never
// prints; the driver decides when to call Diagnostics::has_errors.

//! Per-unit compilation session.
//!
//! ```ignore
//! let arena = Arena::with_config(options.arena);
//! let mut session = CompilationSession::new(&arena, options);
//! let module = session.compile_to_ir(&source)?;
//! ```

use crate::arena::{Arena, ArenaConfig, ArenaStats};
use crate::ast::Program;
use crate::codegen::{self, LowerStats};
use crate::diagnostics::{DiagnosticKind, Diagnostics, SourceContext};
use crate::error::{CompileError, CompileResult};
use crate::ir::{IrBuilder, Module, ModuleBuilder};
use crate::lexer::{self, Token};
use crate::parser;
use hashbrown::HashMap;
use std::fmt;

/// Options for one compilation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Path shown in diagnostics.
    pub source_path: String,
    pub arena: ArenaConfig,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            source_path: "<input>".to_string(),
            arena: ArenaConfig::default(),
        }
    }
}

impl CompileOptions {
    pub fn new(source_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            ..Self::default()
        }
    }
}

/// Statistics gathered over one session.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub tokens: usize,
    pub statements: usize,
    pub functions_lowered: usize,
    pub blocks: usize,
    pub instructions: usize,
    pub diagnostics: usize,
    pub arena: ArenaStats,
    pub instruction_counts: HashMap<&'static str, usize>,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Tokens scanned: {}", self.tokens)?;
        writeln!(f, "  Top-level statements: {}", self.statements)?;
        writeln!(f, "  Functions lowered: {}", self.functions_lowered)?;
        writeln!(f, "  Basic blocks: {}", self.blocks)?;
        writeln!(f, "  Instructions: {}", self.instructions)?;
        writeln!(f, "  Diagnostics: {}", self.diagnostics)?;
        writeln!(f, "  Arena: {}", self.arena)?;

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

            for (opcode, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", opcode, count)?;
            }
        }

        Ok(())
    }
}

/// One compilation unit: arena borrow, options, diagnostics and stats.
pub struct CompilationSession<'arena> {
    arena: &'arena Arena,
    options: CompileOptions,
    diagnostics: Diagnostics,
    stats: SessionStats,
}

impl<'arena> CompilationSession<'arena> {
    pub fn new(arena: &'arena Arena, options: CompileOptions) -> Self {
        Self {
            arena,
            options,
            diagnostics: Diagnostics::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn arena(&self) -> &'arena Arena {
        self.arena
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn path(&self) -> &str {
        &self.options.source_path
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Stop the pipeline if the front-end phase `kind` recorded problems.
    fn check(&self, kind: DiagnosticKind) -> CompileResult<()> {
        let count = self.diagnostics.count_of(kind);
        match kind {
            _ if count == 0 => Ok(()),
            DiagnosticKind::Lexical => Err(CompileError::Lexical { count }),
            _ => Err(CompileError::Parse { count }),
        }
    }

    /// Scan `source`. Lexical problems are recorded, not returned.
    pub fn tokenize<'src>(&mut self, source: &'src str) -> Vec<Token<'src>> {
        let tokens = lexer::tokenize(source, &self.options.source_path, &mut self.diagnostics);
        self.stats.tokens += tokens.len();
        self.stats.diagnostics = self.diagnostics.len();
        tokens
    }

    /// Parse `tokens` into the session arena.
    ///
    /// Syntax errors are recorded, not returned; only arena exhaustion is.
    pub fn parse(&mut self, tokens: &[Token<'_>]) -> CompileResult<Program<'arena>> {
        let program = parser::parse(
            tokens,
            self.arena,
            &self.options.source_path,
            &mut self.diagnostics,
        )?;
        self.stats.statements += program.statements.len();
        self.stats.arena = self.arena.stats();
        self.stats.diagnostics = self.diagnostics.len();
        Ok(program)
    }

    /// Tokenize and parse, stopping after the first phase with problems.
    pub fn front_end(&mut self, source: &str) -> CompileResult<Program<'arena>> {
        let tokens = self.tokenize(source);
        self.check(DiagnosticKind::Lexical)?;
        let program = self.parse(&tokens)?;
        self.check(DiagnosticKind::Parser)?;
        Ok(program)
    }

    /// Lower `program` into `builder`, recording a failure as a diagnostic.
    pub fn lower<B: IrBuilder>(
        &mut self,
        program: &Program<'_>,
        builder: &mut B,
    ) -> CompileResult<LowerStats> {
        match codegen::lower(program, builder) {
            Ok(stats) => {
                self.stats.functions_lowered += stats.functions;
                Ok(stats)
            }
            Err(err) => {
                self.diagnostics.report(
                    DiagnosticKind::Lowering,
                    &self.options.source_path,
                    err.to_string(),
                    SourceContext::None,
                    0,
                    0,
                );
                self.stats.diagnostics = self.diagnostics.len();
                Err(CompileError::Lowering(err))
            }
        }
    }

    /// Lower a parsed program into the in-crate IR.
    pub fn lower_to_ir(&mut self, program: &Program<'_>) -> CompileResult<Module> {
        let mut builder = ModuleBuilder::new(&module_name(&self.options.source_path));
        self.lower(program, &mut builder)?;
        let module = builder.finish();

        self.stats.blocks += module.block_count();
        self.stats.instructions += module.instruction_count();
        for (opcode, count) in module.instruction_counts() {
            *self.stats.instruction_counts.entry(opcode).or_insert(0) += count;
        }
        log::info!(
            "{}: {} functions, {} blocks, {} instructions",
            self.options.source_path,
            module.functions.len(),
            module.block_count(),
            module.instruction_count()
        );
        Ok(module)
    }

    /// Run every phase into the in-crate IR.
    pub fn compile_to_ir(&mut self, source: &str) -> CompileResult<Module> {
        let program = self.front_end(source)?;
        self.lower_to_ir(&program)
    }
}

/// Default module name: the file stem of `path`.
pub fn module_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("main")
        .to_string()
}
