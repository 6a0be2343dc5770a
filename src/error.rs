// This module defines the error types above the diagnostic layer. Lexical and parse
// problems are diagnostics, not errors: they are recorded in the sink and only turn into a
// CompileError (carrying the count) when the session gates the next phase. LowerError is
// the lowering pass's own enum; lowering stops at the first one, the session records it as
// a Lowering diagnostic and wraps it. CompileError is what the driver sees, and its
// exit_code() gives each failure class a distinct process status so calling tooling can
// branch on it. Builder, arena, interpreter and evaluator errors convert in with `?`.

//! Error types for lowering and for the compile driver.

use crate::arena::ArenaError;
use crate::eval::EvalError;
use crate::ir::{BuildError, InterpError};
use thiserror::Error;

/// Errors raised while lowering an AST into IR.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LowerError {
    #[error("Unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("Call to unknown function '{name}'")]
    UnresolvedCallee { name: String },

    #[error("Function '{name}' expects {expected} arguments, found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Unknown type '{name}'")]
    UnknownType { name: String },

    #[error("Cannot assign to {target}")]
    InvalidAssignTarget { target: String },

    #[error("Type mismatch in {context}: {detail}")]
    TypeMismatch {
        context: &'static str,
        detail: String,
    },

    #[error("Expression '{expr}' produces no value")]
    VoidValue { expr: String },

    #[error("Function '{name}' has no return type")]
    MissingReturnType { name: String },

    #[error("Function '{function}' must return a value")]
    MissingReturnValue { function: String },

    #[error("Function '{function}' returns nil but a value was given")]
    UnexpectedReturnValue { function: String },

    #[error("Variable '{name}' cannot have type nil")]
    VoidBinding { name: String },

    #[error("Function '{name}' is declared inside another function")]
    NestedFunction { name: String },

    #[error("Function '{name}' is defined more than once")]
    DuplicateFunction { name: String },

    #[error("Module name given twice ('{first}' and '{second}')")]
    DuplicateModule { first: String, second: String },

    #[error("Invalid number literal '{text}'")]
    InvalidNumber { text: String },

    #[error("Cannot print {what}")]
    UnsupportedPrint { what: String },

    #[error("Operator '{op}' is not supported on {ty}")]
    UnsupportedOperator { op: &'static str, ty: String },

    #[error("Malformed {what} reached lowering")]
    Malformed { what: String },

    #[error(transparent)]
    Backend(#[from] BuildError),
}

/// Result type alias for lowering.
pub type LowerResult<T> = Result<T, LowerError>;

/// Driver-level failure of one compilation unit.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("{count} lexical error(s)")]
    Lexical { count: usize },

    #[error("{count} parse error(s)")]
    Parse { count: usize },

    #[error("Lowering failed: {0}")]
    Lowering(LowerError),

    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error("Execution failed: {0}")]
    Execution(#[from] InterpError),

    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompileError {
    /// Process exit status for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            CompileError::Io(_) => 1,
            CompileError::Lexical { .. } => 2,
            CompileError::Parse { .. } => 3,
            CompileError::Lowering(_) => 4,
            CompileError::Arena(_) => 5,
            CompileError::Execution(_) | CompileError::Evaluation(_) => 6,
        }
    }
}

impl From<LowerError> for CompileError {
    fn from(err: LowerError) -> Self {
        CompileError::Lowering(err)
    }
}

/// Result type alias for the driver.
pub type CompileResult<T> = Result<T, CompileError>;
