// A tree-walking evaluator for arithmetic programs: number literals, the five arithmetic
// operators, unary minus and plus, and groups, all in double precision. A program's value
// is the value of its last expression statement (0 for an empty program). It predates the
// lowering pass and is kept as a cross-check for it: `xic --eval` prints the value.

//! Double-precision evaluation of arithmetic programs.

use crate::ast::{BinaryOperator, Expr, NodeKind, Program, Stmt, UnaryOperator};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Cannot evaluate a {kind} node")]
    Unsupported { kind: NodeKind },

    #[error("Cannot evaluate operator '{op}'")]
    UnsupportedOperator { op: &'static str },

    #[error("Invalid number literal '{text}'")]
    InvalidNumber { text: String },
}

/// Evaluate every statement of `program`, returning the last value.
pub fn evaluate(program: &Program<'_>) -> Result<f64, EvalError> {
    let mut last = 0.0;
    for stmt in program.statements {
        last = match stmt {
            Stmt::Expr(expr) => evaluate_expr(expr)?,
            other => return Err(EvalError::Unsupported { kind: other.kind() }),
        };
    }
    Ok(last)
}

pub fn evaluate_expr(expr: &Expr<'_>) -> Result<f64, EvalError> {
    match expr {
        Expr::Number(text) => text.parse().map_err(|_| EvalError::InvalidNumber {
            text: text.to_string(),
        }),
        Expr::Group(inner) => evaluate_expr(inner),
        Expr::Unary { op, operand } => {
            let value = evaluate_expr(operand)?;
            match op {
                UnaryOperator::Negate => Ok(-value),
                UnaryOperator::Plus => Ok(value),
                UnaryOperator::Not => Err(EvalError::UnsupportedOperator { op: op.symbol() }),
            }
        }
        Expr::Binary { left, op, right } => {
            let lhs = evaluate_expr(left)?;
            let rhs = evaluate_expr(right)?;
            match op {
                BinaryOperator::Add => Ok(lhs + rhs),
                BinaryOperator::Sub => Ok(lhs - rhs),
                BinaryOperator::Mul => Ok(lhs * rhs),
                BinaryOperator::Div => Ok(lhs / rhs),
                // Same sign rules as C fmod.
                BinaryOperator::Rem => Ok(lhs % rhs),
                other => Err(EvalError::UnsupportedOperator { op: other.symbol() }),
            }
        }
        other => Err(EvalError::Unsupported { kind: other.kind() }),
    }
}
