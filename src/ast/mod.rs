// This module defines the abstract syntax tree produced by the parser. Every node lives in
// the compilation unit's Arena and refers to its children through shared references with
// the arena lifetime, so the tree is immutable once built and is released in one piece
// when the arena goes away. Variable-length children (argument lists, parameters, block
// bodies) are arena slices that keep source order. Program is the root and is a separate
// struct, so it can never appear nested inside another statement. Operators are resolved
// from tokens into small closed enums at parse time; type annotations stay nominal and are
// resolved to primitives only during lowering.

//! Arena-resident AST for xi programs.

mod printer;

use crate::lexer::TokenKind;
use std::fmt;

/// Discriminant shared by every node family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Program,
    Module,
    Function,
    Block,
    ExprStmt,
    Var,
    Return,
    Loop,
    If,
    Print,
    Number,
    String,
    Identifier,
    Binary,
    Unary,
    Prefix,
    Postfix,
    Group,
    Call,
    Assign,
    SymbolType,
    Invalid,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Program => "program",
            NodeKind::Module => "module",
            NodeKind::Function => "function",
            NodeKind::Block => "block",
            NodeKind::ExprStmt => "expr_stmt",
            NodeKind::Var => "var",
            NodeKind::Return => "return",
            NodeKind::Loop => "loop",
            NodeKind::If => "if",
            NodeKind::Print => "print",
            NodeKind::Number => "number",
            NodeKind::String => "string",
            NodeKind::Identifier => "identifier",
            NodeKind::Binary => "binary",
            NodeKind::Unary => "unary",
            NodeKind::Prefix => "prefix",
            NodeKind::Postfix => "postfix",
            NodeKind::Group => "group",
            NodeKind::Call => "call",
            NodeKind::Assign => "assign",
            NodeKind::SymbolType => "symbol_type",
            NodeKind::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl BinaryOperator {
    pub fn from_token(kind: TokenKind) -> Option<Self> {
        Some(match kind {
            TokenKind::Plus => BinaryOperator::Add,
            TokenKind::Minus => BinaryOperator::Sub,
            TokenKind::Star => BinaryOperator::Mul,
            TokenKind::Slash => BinaryOperator::Div,
            TokenKind::Percent => BinaryOperator::Rem,
            TokenKind::EqualEqual => BinaryOperator::Equal,
            TokenKind::BangEqual => BinaryOperator::NotEqual,
            TokenKind::Less => BinaryOperator::Less,
            TokenKind::LessEqual => BinaryOperator::LessEqual,
            TokenKind::Greater => BinaryOperator::Greater,
            TokenKind::GreaterEqual => BinaryOperator::GreaterEqual,
            TokenKind::AndAnd => BinaryOperator::And,
            TokenKind::OrOr => BinaryOperator::Or,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Rem => "%",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Less => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::Less
                | BinaryOperator::LessEqual
                | BinaryOperator::Greater
                | BinaryOperator::GreaterEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Negate,
    Plus,
    Not,
}

impl UnaryOperator {
    pub fn from_token(kind: TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Minus => Some(UnaryOperator::Negate),
            TokenKind::Plus => Some(UnaryOperator::Plus),
            TokenKind::Bang => Some(UnaryOperator::Not),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOperator::Negate => "-",
            UnaryOperator::Plus => "+",
            UnaryOperator::Not => "!",
        }
    }
}

/// `++` / `--`, used by both prefix and postfix forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOperator {
    Increment,
    Decrement,
}

impl StepOperator {
    pub fn from_token(kind: TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Increment => Some(StepOperator::Increment),
            TokenKind::Decrement => Some(StepOperator::Decrement),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            StepOperator::Increment => "++",
            StepOperator::Decrement => "--",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOperator {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
}

impl AssignOperator {
    pub fn from_token(kind: TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Equals => Some(AssignOperator::Assign),
            TokenKind::PlusEquals => Some(AssignOperator::AddAssign),
            TokenKind::MinusEquals => Some(AssignOperator::SubAssign),
            TokenKind::StarEquals => Some(AssignOperator::MulAssign),
            TokenKind::SlashEquals => Some(AssignOperator::DivAssign),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            AssignOperator::Assign => "=",
            AssignOperator::AddAssign => "+=",
            AssignOperator::SubAssign => "-=",
            AssignOperator::MulAssign => "*=",
            AssignOperator::DivAssign => "/=",
        }
    }

    /// The arithmetic a compound assignment applies before storing.
    pub fn binary(self) -> Option<BinaryOperator> {
        match self {
            AssignOperator::Assign => None,
            AssignOperator::AddAssign => Some(BinaryOperator::Add),
            AssignOperator::SubAssign => Some(BinaryOperator::Sub),
            AssignOperator::MulAssign => Some(BinaryOperator::Mul),
            AssignOperator::DivAssign => Some(BinaryOperator::Div),
        }
    }
}

/// Expression nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expr<'a> {
    /// Numeric literal, kept as source text.
    Number(&'a str),
    /// String literal, escapes already decoded.
    String(&'a str),
    Identifier(&'a str),
    Binary {
        left: &'a Expr<'a>,
        op: BinaryOperator,
        right: &'a Expr<'a>,
    },
    Unary {
        op: UnaryOperator,
        operand: &'a Expr<'a>,
    },
    Prefix {
        op: StepOperator,
        target: &'a Expr<'a>,
    },
    Postfix {
        op: StepOperator,
        target: &'a Expr<'a>,
    },
    Group(&'a Expr<'a>),
    Call {
        callee: &'a Expr<'a>,
        args: &'a [&'a Expr<'a>],
    },
    /// The target is only checked to be an identifier during lowering.
    Assign {
        op: AssignOperator,
        target: &'a Expr<'a>,
        value: &'a Expr<'a>,
    },
    /// Placeholder left behind by a malformed expression.
    Invalid,
}

impl<'a> Expr<'a> {
    pub fn kind(&self) -> NodeKind {
        match self {
            Expr::Number(_) => NodeKind::Number,
            Expr::String(_) => NodeKind::String,
            Expr::Identifier(_) => NodeKind::Identifier,
            Expr::Binary { .. } => NodeKind::Binary,
            Expr::Unary { .. } => NodeKind::Unary,
            Expr::Prefix { .. } => NodeKind::Prefix,
            Expr::Postfix { .. } => NodeKind::Postfix,
            Expr::Group(_) => NodeKind::Group,
            Expr::Call { .. } => NodeKind::Call,
            Expr::Assign { .. } => NodeKind::Assign,
            Expr::Invalid => NodeKind::Invalid,
        }
    }

    /// Strip any number of enclosing groups.
    pub fn ungrouped(&'a self) -> &'a Expr<'a> {
        let mut expr = self;
        while let Expr::Group(inner) = expr {
            expr = inner;
        }
        expr
    }
}

/// Nominal type annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type<'a> {
    Symbol(&'a str),
}

impl<'a> Type<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Type::Symbol(name) => *name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        NodeKind::SymbolType
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Param<'a> {
    pub name: &'a str,
    pub ty: &'a Type<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionDecl<'a> {
    pub name: &'a str,
    /// `None` only when the parser already reported the missing type.
    pub return_type: Option<&'a Type<'a>>,
    pub params: &'a [Param<'a>],
    /// Always a `Stmt::Block`.
    pub body: &'a Stmt<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopStmt<'a> {
    /// Whether the header carried an `name = init` clause.
    pub is_counted: bool,
    pub init: Option<&'a Expr<'a>>,
    pub condition: Option<&'a Expr<'a>>,
    pub step: Option<&'a Expr<'a>>,
    pub body: &'a Stmt<'a>,
}

/// Statement nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stmt<'a> {
    Module(&'a str),
    Function(&'a FunctionDecl<'a>),
    Block(&'a [&'a Stmt<'a>]),
    Expr(&'a Expr<'a>),
    Var {
        name: &'a str,
        ty: &'a Type<'a>,
        init: Option<&'a Expr<'a>>,
    },
    Return(Option<&'a Expr<'a>>),
    Loop(&'a LoopStmt<'a>),
    If {
        condition: &'a Expr<'a>,
        then_block: &'a Stmt<'a>,
        else_block: Option<&'a Stmt<'a>>,
    },
    Print {
        fd: &'a Expr<'a>,
        newline: bool,
        args: &'a [&'a Expr<'a>],
    },
    /// Placeholder for a statement the parser could not recover.
    Invalid,
}

impl<'a> Stmt<'a> {
    pub fn kind(&self) -> NodeKind {
        match self {
            Stmt::Module(_) => NodeKind::Module,
            Stmt::Function(_) => NodeKind::Function,
            Stmt::Block(_) => NodeKind::Block,
            Stmt::Expr(_) => NodeKind::ExprStmt,
            Stmt::Var { .. } => NodeKind::Var,
            Stmt::Return(_) => NodeKind::Return,
            Stmt::Loop(_) => NodeKind::Loop,
            Stmt::If { .. } => NodeKind::If,
            Stmt::Print { .. } => NodeKind::Print,
            Stmt::Invalid => NodeKind::Invalid,
        }
    }
}

/// Root of a parsed unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Program<'a> {
    pub statements: &'a [&'a Stmt<'a>],
}

impl<'a> Program<'a> {
    pub fn kind(&self) -> NodeKind {
        NodeKind::Program
    }

    pub fn functions(&self) -> impl Iterator<Item = &'a FunctionDecl<'a>> + 'a {
        let statements = self.statements;
        statements.iter().filter_map(|stmt| match stmt {
            Stmt::Function(decl) => Some(*decl),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    #[test]
    fn test_operator_tables() {
        assert_eq!(
            BinaryOperator::from_token(TokenKind::Percent),
            Some(BinaryOperator::Rem)
        );
        assert_eq!(BinaryOperator::from_token(TokenKind::Equals), None);
        assert!(BinaryOperator::LessEqual.is_comparison());
        assert!(BinaryOperator::Or.is_logical());
        assert_eq!(
            AssignOperator::from_token(TokenKind::StarEquals).and_then(AssignOperator::binary),
            Some(BinaryOperator::Mul)
        );
        assert_eq!(AssignOperator::Assign.binary(), None);
    }

    #[test]
    fn test_kinds_and_ungrouped() {
        let arena = Arena::new();
        let one = arena.alloc(Expr::Number("1")).unwrap();
        let group = arena.alloc(Expr::Group(one)).unwrap();
        let outer = arena.alloc(Expr::Group(group)).unwrap();

        assert_eq!(outer.kind(), NodeKind::Group);
        assert_eq!(outer.ungrouped().kind(), NodeKind::Number);
        assert_eq!(Stmt::Return(None).kind().to_string(), "return");
    }
}
