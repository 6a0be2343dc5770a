//! xi - a small imperative language compiled into a control-flow-graph IR.
//!
//! The pipeline runs one compilation unit at a time: the tokenizer turns
//! source text into tokens, the Pratt parser builds an arena-owned AST, and
//! lowering emits typed functions of basic blocks through the [`ir::IrBuilder`]
//! contract. Problems are collected as rendered diagnostics and checked between
//! phases.
//!
//! # Primary Usage
//!
//! ```ignore
//! use xi::arena::Arena;
//! use xi::session::{CompilationSession, CompileOptions};
//! use xi::ir::Interpreter;
//!
//! let arena = Arena::new();
//! let mut session = CompilationSession::new(&arena, CompileOptions::new("demo.xi"));
//! let module = session.compile_to_ir("fn add(a: int, b: int) int { return a + b; }")?;
//! assert_eq!(Interpreter::new(&module).call_int("add", &[2, 3])?, 5);
//! ```
//!
//! # Architecture
//!
//! - [`lexer`] - Tokenizer and token tables
//! - [`parser`] - Recursive descent statements, precedence-climbing expressions
//! - [`ast`] - Arena-owned syntax tree and its printer
//! - [`arena`] - Per-unit bump arena with an optional allocation limit
//! - [`diagnostics`] - Rendered problem reports and the per-unit sink
//! - [`codegen`] - AST to CFG lowering over any [`ir::IrBuilder`]
//! - [`ir`] - In-crate CFG IR, its builder, and a reference interpreter
//! - [`llvm`] - LLVM backend for the builder contract (`llvm` feature)
//! - [`session`] - Phase orchestration and statistics

pub mod arena;
pub mod ast;
pub mod codegen;
pub mod diagnostics;
pub mod error;
pub mod eval;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod session;

#[cfg(feature = "llvm")]
pub mod llvm;

pub use arena::{Arena, ArenaConfig, ArenaError, ArenaVec};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{CompileError, CompileResult, LowerError};
pub use ir::{Interpreter, IrBuilder, Module, ModuleBuilder};
pub use session::{CompilationSession, CompileOptions, SessionStats};
