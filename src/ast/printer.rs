//! Text rendering for the AST: S-expressions for expressions, an indented
//! tree for statements (`xic --emit ast`).

use super::{Expr, FunctionDecl, LoopStmt, Program, Stmt, Type};
use std::fmt;

impl fmt::Display for Expr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(text) => f.write_str(text),
            Expr::String(value) => write!(f, "{:?}", value),
            Expr::Identifier(name) => f.write_str(name),
            Expr::Binary { left, op, right } => write!(f, "({} {} {})", op.symbol(), left, right),
            Expr::Unary { op, operand } => write!(f, "({} {})", op.symbol(), operand),
            Expr::Prefix { op, target } => write!(f, "(pre{} {})", op.symbol(), target),
            Expr::Postfix { op, target } => write!(f, "(post{} {})", op.symbol(), target),
            Expr::Group(inner) => write!(f, "(group {})", inner),
            Expr::Call { callee, args } => {
                write!(f, "(call {}", callee)?;
                for arg in args.iter() {
                    write!(f, " {}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Assign { op, target, value } => {
                write!(f, "({} {} {})", op.symbol(), target, value)
            }
            Expr::Invalid => f.write_str("<invalid>"),
        }
    }
}

impl fmt::Display for Type<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    write!(f, "{:width$}", "", width = depth * 2)
}

fn write_function(f: &mut fmt::Formatter<'_>, decl: &FunctionDecl<'_>, depth: usize) -> fmt::Result {
    indent(f, depth)?;
    write!(f, "fn {}(", decl.name)?;
    for (i, param) in decl.params.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}: {}", param.name, param.ty)?;
    }
    f.write_str(")")?;
    if let Some(ty) = decl.return_type {
        write!(f, " {}", ty)?;
    }
    writeln!(f)?;
    write_stmt(f, decl.body, depth + 1)
}

fn write_loop(f: &mut fmt::Formatter<'_>, stmt: &LoopStmt<'_>, depth: usize) -> fmt::Result {
    indent(f, depth)?;
    writeln!(f, "{}", if stmt.is_counted { "loop counted" } else { "loop" })?;
    let clauses = [("init", stmt.init), ("cond", stmt.condition), ("step", stmt.step)];
    for (label, clause) in clauses {
        if let Some(expr) = clause {
            indent(f, depth + 1)?;
            writeln!(f, "{} {}", label, expr)?;
        }
    }
    write_stmt(f, stmt.body, depth + 1)
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt<'_>, depth: usize) -> fmt::Result {
    match stmt {
        Stmt::Function(decl) => return write_function(f, decl, depth),
        Stmt::Loop(stmt) => return write_loop(f, stmt, depth),
        _ => {}
    }

    indent(f, depth)?;
    match stmt {
        Stmt::Module(name) => writeln!(f, "module {}", name),
        Stmt::Block(body) => {
            writeln!(f, "block")?;
            for inner in body.iter() {
                write_stmt(f, inner, depth + 1)?;
            }
            Ok(())
        }
        Stmt::Expr(expr) => writeln!(f, "expr {}", expr),
        Stmt::Var { name, ty, init } => {
            write!(f, "var {}: {}", name, ty)?;
            match init {
                Some(init) => writeln!(f, " = {}", init),
                None => writeln!(f),
            }
        }
        Stmt::Return(Some(value)) => writeln!(f, "return {}", value),
        Stmt::Return(None) => writeln!(f, "return"),
        Stmt::If {
            condition,
            then_block,
            else_block,
        } => {
            writeln!(f, "if {}", condition)?;
            write_stmt(f, then_block, depth + 1)?;
            if let Some(else_block) = else_block {
                indent(f, depth + 1)?;
                writeln!(f, "else")?;
                write_stmt(f, else_block, depth + 2)?;
            }
            Ok(())
        }
        Stmt::Print { fd, newline, args } => {
            write!(f, "{} fd={}", if *newline { "println" } else { "print" }, fd)?;
            for arg in args.iter() {
                write!(f, " {}", arg)?;
            }
            writeln!(f)
        }
        Stmt::Invalid => writeln!(f, "invalid"),
        Stmt::Function(_) | Stmt::Loop(_) => Ok(()),
    }
}

impl fmt::Display for Stmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}

impl fmt::Display for Program<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program")?;
        for stmt in self.statements.iter() {
            write_stmt(f, stmt, 1)?;
        }
        Ok(())
    }
}
