// This module lowers a parsed Program into IR through any IrBuilder. A pre-pass walks the
// top level once: it names the module from `@module`, and declares every function with its
// resolved signature so calls can precede definitions. Function bodies are then lowered
// in source order; any other top-level statements become the body of an implicit `main`.
// Every local binding (parameters, `var` declarations, counted-loop counters) lives in a
// stack cell allocated in the entry block; reads load and writes store. The symbol table is
// function-flat: loops and ifs share their function's table, and a repeated `var` rebinds
// the name to a fresh cell. Loops always get condition, body, step and after blocks, ifs
// get then, else and after blocks, and a fallthrough branch is only emitted into a block
// that is not already terminated. Printing goes through the two runtime externs declared
// on first use. Lowering stops at the first error.

//! Lowering from the AST into IR.

pub mod types;

use crate::ast::{AssignOperator, BinaryOperator, Expr, FunctionDecl, LoopStmt, Program, StepOperator, Stmt, UnaryOperator};
use crate::error::{LowerError, LowerResult};
use crate::ir::{BinaryOp, CmpPredicate, IrBuilder, IrType};
use crate::runtime::{
    ITOA_BUFFER_LEN, ITOA_PARAMS, ITOA_RET, ITOA_SYMBOL, WRITE_PARAMS, WRITE_RET, WRITE_SYMBOL,
};
use hashbrown::HashMap;
use std::fmt;

pub use types::{resolve_name, resolve_type, source_name};

/// Name of the function that receives top-level statements.
pub const ENTRY_FUNCTION: &str = "main";

/// Counters gathered while lowering one program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LowerStats {
    pub functions: usize,
    pub statements: usize,
    pub loops: usize,
    pub branches: usize,
    pub prints: usize,
    /// Top-level statements were gathered into `main`.
    pub implicit_main: bool,
}

impl fmt::Display for LowerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} functions, {} statements, {} loops, {} ifs, {} prints",
            self.functions, self.statements, self.loops, self.branches, self.prints
        )
    }
}

/// Lower `program` into `builder`.
pub fn lower<B: IrBuilder>(program: &Program<'_>, builder: &mut B) -> LowerResult<LowerStats> {
    let mut lowering = Lowering::new(builder);
    lowering.program(program)?;
    log::debug!("lowered program: {}", lowering.stats);
    Ok(lowering.stats)
}

#[derive(Debug, Clone)]
struct Signature<F> {
    function: F,
    params: Vec<IrType>,
    ret: IrType,
}

#[derive(Debug, Clone, Copy)]
struct Local<V> {
    cell: V,
    ty: IrType,
}

#[derive(Debug, Clone, Copy)]
struct Runtime<F> {
    itoa: F,
    write: F,
}

/// Per-function state, re-seeded for every function.
struct Frame<F, V> {
    function: F,
    name: String,
    ret: IrType,
    locals: HashMap<String, Local<V>>,
    itoa_buffer: Option<V>,
}

struct Lowering<'b, B: IrBuilder> {
    builder: &'b mut B,
    functions: HashMap<String, Signature<B::Function>>,
    runtime: Option<Runtime<B::Function>>,
    module_name: Option<String>,
    frame: Option<Frame<B::Function, B::Value>>,
    stats: LowerStats,
}

impl<'b, B: IrBuilder> Lowering<'b, B> {
    fn new(builder: &'b mut B) -> Self {
        Self {
            builder,
            functions: HashMap::new(),
            runtime: None,
            module_name: None,
            frame: None,
            stats: LowerStats::default(),
        }
    }

    fn program(&mut self, program: &Program<'_>) -> LowerResult<()> {
        let mut top_level = Vec::new();
        for stmt in program.statements {
            match stmt {
                Stmt::Module(name) => self.module(name)?,
                Stmt::Function(decl) => self.declare(decl)?,
                other => top_level.push(*other),
            }
        }

        if !top_level.is_empty() && self.functions.contains_key(ENTRY_FUNCTION) {
            return Err(LowerError::DuplicateFunction {
                name: ENTRY_FUNCTION.to_string(),
            });
        }

        for decl in program.functions() {
            self.function(decl)?;
        }

        if !top_level.is_empty() {
            self.implicit_main(&top_level)?;
        }
        Ok(())
    }

    fn module(&mut self, name: &str) -> LowerResult<()> {
        if let Some(first) = &self.module_name {
            return Err(LowerError::DuplicateModule {
                first: first.clone(),
                second: name.to_string(),
            });
        }
        self.builder.set_module_name(name);
        self.module_name = Some(name.to_string());
        Ok(())
    }

    fn declare(&mut self, decl: &FunctionDecl<'_>) -> LowerResult<()> {
        if self.functions.contains_key(decl.name) {
            return Err(LowerError::DuplicateFunction {
                name: decl.name.to_string(),
            });
        }

        let ret = match decl.return_type {
            Some(ty) => resolve_type(ty)?,
            None => {
                return Err(LowerError::MissingReturnType {
                    name: decl.name.to_string(),
                })
            }
        };

        let mut params = Vec::with_capacity(decl.params.len());
        for param in decl.params {
            let ty = resolve_type(param.ty)?;
            if ty == IrType::Void {
                return Err(LowerError::VoidBinding {
                    name: param.name.to_string(),
                });
            }
            params.push(ty);
        }

        let function = self.builder.declare_function(decl.name, &params, ret)?;
        log::trace!("declared {}({:?}) {}", decl.name, params, ret);
        self.functions.insert(
            decl.name.to_string(),
            Signature {
                function,
                params,
                ret,
            },
        );
        Ok(())
    }

    fn signature(&self, name: &str) -> LowerResult<Signature<B::Function>> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| LowerError::UnresolvedCallee {
                name: name.to_string(),
            })
    }

    fn enter(&mut self, name: &str, signature: &Signature<B::Function>) -> LowerResult<()> {
        let entry = self.builder.append_block(signature.function, "entry")?;
        self.builder.position_at_end(entry);
        self.frame = Some(Frame {
            function: signature.function,
            name: name.to_string(),
            ret: signature.ret,
            locals: HashMap::new(),
            itoa_buffer: None,
        });
        Ok(())
    }

    fn function(&mut self, decl: &FunctionDecl<'_>) -> LowerResult<()> {
        log::debug!("lowering function {}", decl.name);
        let signature = self.signature(decl.name)?;
        self.enter(decl.name, &signature)?;

        for (index, (param, ty)) in decl.params.iter().zip(&signature.params).enumerate() {
            let cell = self.builder.alloca(*ty, param.name)?;
            let value = self.builder.param(signature.function, index)?;
            self.builder.store(value, cell)?;
            self.bind(param.name, Local { cell, ty: *ty })?;
        }

        match decl.body {
            Stmt::Block(stmts) => self.block(stmts)?,
            other => self.stmt(other)?,
        }
        self.leave()
    }

    fn implicit_main(&mut self, stmts: &[&Stmt<'_>]) -> LowerResult<()> {
        log::debug!("lowering {} top-level statements into {}", stmts.len(), ENTRY_FUNCTION);
        let function = self.builder.declare_function(ENTRY_FUNCTION, &[], IrType::I64)?;
        let signature = Signature {
            function,
            params: Vec::new(),
            ret: IrType::I64,
        };
        self.functions.insert(ENTRY_FUNCTION.to_string(), signature.clone());
        self.enter(ENTRY_FUNCTION, &signature)?;
        self.stats.implicit_main = true;

        let Some((last, rest)) = stmts.split_last() else {
            return self.leave();
        };
        self.block(rest)?;

        if !self.terminated() {
            match last {
                // The program's value is its last expression statement.
                Stmt::Expr(expr) => {
                    self.stats.statements += 1;
                    let value = self.expr(expr)?;
                    if let Some(value) = value {
                        if self.builder.value_type(value).is_int() && !self.terminated() {
                            let result = self.coerce(value, IrType::I64, "return")?;
                            self.builder.ret(Some(result))?;
                        }
                    }
                }
                other => self.stmt(other)?,
            }
        }
        self.leave()
    }

    /// Close the current function with a default return if needed.
    fn leave(&mut self) -> LowerResult<()> {
        let ret = self.frame()?.ret;
        if !self.terminated() {
            let value = match ret {
                IrType::Void => None,
                IrType::Ptr => Some(self.builder.const_string(b"")?),
                ty => Some(self.builder.const_zero(ty)?),
            };
            self.builder.ret(value)?;
        }
        self.frame = None;
        self.stats.functions += 1;
        Ok(())
    }

    fn frame(&self) -> LowerResult<&Frame<B::Function, B::Value>> {
        self.frame.as_ref().ok_or_else(|| LowerError::Malformed {
            what: "statement outside a function".to_string(),
        })
    }

    fn frame_mut(&mut self) -> LowerResult<&mut Frame<B::Function, B::Value>> {
        self.frame.as_mut().ok_or_else(|| LowerError::Malformed {
            what: "statement outside a function".to_string(),
        })
    }

    fn terminated(&self) -> bool {
        self.builder
            .insert_block()
            .map_or(true, |block| self.builder.has_terminator(block))
    }

    fn bind(&mut self, name: &str, local: Local<B::Value>) -> LowerResult<()> {
        self.frame_mut()?.locals.insert(name.to_string(), local);
        Ok(())
    }

    fn lookup(&self, name: &str) -> LowerResult<Local<B::Value>> {
        self.frame()?
            .locals
            .get(name)
            .copied()
            .ok_or_else(|| LowerError::UnknownVariable {
                name: name.to_string(),
            })
    }

    fn branch_to(&mut self, target: B::Block) -> LowerResult<()> {
        if !self.terminated() {
            self.builder.br(target)?;
        }
        Ok(())
    }

    // Statements

    fn block(&mut self, stmts: &[&Stmt<'_>]) -> LowerResult<()> {
        for (index, stmt) in stmts.iter().enumerate() {
            if self.terminated() {
                log::debug!("skipping {} unreachable statement(s)", stmts.len() - index);
                break;
            }
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt<'_>) -> LowerResult<()> {
        self.stats.statements += 1;
        match stmt {
            Stmt::Block(stmts) => self.block(stmts),
            Stmt::Expr(expr) => self.expr(expr).map(|_| ()),
            Stmt::Var { name, ty, init } => self.var(name, resolve_type(ty)?, *init),
            Stmt::Return(value) => self.ret(*value),
            Stmt::Loop(l) => self.lower_loop(l),
            Stmt::If {
                condition,
                then_block,
                else_block,
            } => self.lower_if(condition, then_block, *else_block),
            Stmt::Print { fd, newline, args } => self.print(fd, *newline, args),
            Stmt::Function(decl) => Err(LowerError::NestedFunction {
                name: decl.name.to_string(),
            }),
            Stmt::Module(_) => Err(LowerError::Malformed {
                what: "module declaration inside a function".to_string(),
            }),
            Stmt::Invalid => Err(LowerError::Malformed {
                what: "statement".to_string(),
            }),
        }
    }

    fn var(&mut self, name: &str, ty: IrType, init: Option<&Expr<'_>>) -> LowerResult<()> {
        if ty == IrType::Void {
            return Err(LowerError::VoidBinding {
                name: name.to_string(),
            });
        }

        let value = match init {
            Some(expr) => {
                let value = self.value(expr)?;
                self.coerce(value, ty, "var initializer")?
            }
            None if ty == IrType::Ptr => self.builder.const_string(b"")?,
            None => self.builder.const_zero(ty)?,
        };

        let cell = self.builder.alloca(ty, name)?;
        self.builder.store(value, cell)?;
        self.bind(name, Local { cell, ty })
    }

    fn ret(&mut self, value: Option<&Expr<'_>>) -> LowerResult<()> {
        let (ret, function) = {
            let frame = self.frame()?;
            (frame.ret, frame.name.clone())
        };

        match (value, ret) {
            (Some(_), IrType::Void) => Err(LowerError::UnexpectedReturnValue { function }),
            (None, IrType::Void) => Ok(self.builder.ret(None)?),
            (None, _) => Err(LowerError::MissingReturnValue { function }),
            (Some(expr), ty) => {
                let value = self.value(expr)?;
                let value = self.coerce(value, ty, "return")?;
                Ok(self.builder.ret(Some(value))?)
            }
        }
    }

    /// Bind an unbound counted-loop counter (`i = 0`) to a fresh `int` cell.
    fn declare_counter(&mut self, init: &Expr<'_>) -> LowerResult<()> {
        if let Expr::Assign {
            op: AssignOperator::Assign,
            target,
            ..
        } = init.ungrouped()
        {
            if let Expr::Identifier(name) = target.ungrouped() {
                if !self.frame()?.locals.contains_key(*name) {
                    let cell = self.builder.alloca(IrType::I64, name)?;
                    self.bind(name, Local {
                        cell,
                        ty: IrType::I64,
                    })?;
                }
            }
        }
        Ok(())
    }

    fn lower_loop(&mut self, l: &LoopStmt<'_>) -> LowerResult<()> {
        self.stats.loops += 1;
        if let Some(init) = l.init {
            if l.is_counted {
                self.declare_counter(init)?;
            }
            self.expr(init)?;
        }

        let function = self.frame()?.function;
        let cond_block = self.builder.append_block(function, "loop.cond")?;
        let body_block = self.builder.append_block(function, "loop.body")?;
        let step_block = self.builder.append_block(function, "loop.step")?;
        let after_block = self.builder.append_block(function, "loop.after")?;

        self.builder.br(cond_block)?;
        self.builder.position_at_end(cond_block);
        let condition = match l.condition {
            Some(expr) => {
                let value = self.value(expr)?;
                self.truthy(value)?
            }
            None => self.builder.const_int(IrType::I1, 1)?,
        };
        self.builder.cond_br(condition, body_block, after_block)?;

        self.builder.position_at_end(body_block);
        match l.body {
            Stmt::Block(stmts) => self.block(stmts)?,
            other => self.stmt(other)?,
        }
        self.branch_to(step_block)?;

        self.builder.position_at_end(step_block);
        if let Some(step) = l.step {
            self.expr(step)?;
        }
        self.builder.br(cond_block)?;

        self.builder.position_at_end(after_block);
        Ok(())
    }

    fn lower_if(
        &mut self,
        condition: &Expr<'_>,
        then_stmt: &Stmt<'_>,
        else_stmt: Option<&Stmt<'_>>,
    ) -> LowerResult<()> {
        self.stats.branches += 1;
        let value = self.value(condition)?;
        let condition = self.truthy(value)?;

        let function = self.frame()?.function;
        let then_block = self.builder.append_block(function, "if.then")?;
        let else_block = self.builder.append_block(function, "if.else")?;
        let after_block = self.builder.append_block(function, "if.after")?;
        self.builder.cond_br(condition, then_block, else_block)?;

        self.builder.position_at_end(then_block);
        self.stmt(then_stmt)?;
        self.branch_to(after_block)?;

        self.builder.position_at_end(else_block);
        if let Some(stmt) = else_stmt {
            self.stmt(stmt)?;
        }
        self.branch_to(after_block)?;

        self.builder.position_at_end(after_block);
        Ok(())
    }

    fn runtime(&mut self) -> LowerResult<Runtime<B::Function>> {
        if let Some(runtime) = self.runtime {
            return Ok(runtime);
        }
        let runtime = Runtime {
            itoa: self.builder.declare_function(ITOA_SYMBOL, &ITOA_PARAMS, ITOA_RET)?,
            write: self.builder.declare_function(WRITE_SYMBOL, &WRITE_PARAMS, WRITE_RET)?,
        };
        self.runtime = Some(runtime);
        Ok(runtime)
    }

    fn itoa_buffer(&mut self) -> LowerResult<B::Value> {
        if let Some(buffer) = self.frame()?.itoa_buffer {
            return Ok(buffer);
        }
        let buffer = self.builder.alloca_bytes(ITOA_BUFFER_LEN, "itoa.buf")?;
        self.frame_mut()?.itoa_buffer = Some(buffer);
        Ok(buffer)
    }

    fn write_bytes(&mut self, runtime: Runtime<B::Function>, fd: B::Value, bytes: &[u8]) -> LowerResult<()> {
        let data = self.builder.const_string(bytes)?;
        let len = self.builder.const_int(IrType::I64, bytes.len() as i64)?;
        self.builder.call(runtime.write, &[fd, data, len], "")?;
        Ok(())
    }

    fn print(&mut self, fd: &Expr<'_>, newline: bool, args: &[&Expr<'_>]) -> LowerResult<()> {
        self.stats.prints += 1;
        let runtime = self.runtime()?;
        let fd = self.value(fd)?;
        let fd = self.coerce(fd, IrType::I64, "print file descriptor")?;

        for (index, arg) in args.iter().enumerate() {
            if index > 0 {
                self.write_bytes(runtime, fd, b" ")?;
            }

            if let Expr::String(text) = arg.ungrouped() {
                self.write_bytes(runtime, fd, text.as_bytes())?;
                continue;
            }

            let value = self.value(arg)?;
            let ty = self.builder.value_type(value);
            if !ty.is_int() {
                return Err(LowerError::UnsupportedPrint {
                    what: format!("a {} value", source_name(ty)),
                });
            }
            let value = self.coerce(value, IrType::I64, "print")?;
            let buffer = self.itoa_buffer()?;
            let len = self
                .builder
                .call(runtime.itoa, &[value, buffer], "len")?
                .ok_or_else(|| LowerError::Malformed {
                    what: format!("{} signature", ITOA_SYMBOL),
                })?;
            self.builder.call(runtime.write, &[fd, buffer, len], "")?;
        }

        if newline {
            self.write_bytes(runtime, fd, b"\n")?;
        }
        Ok(())
    }

    // Expressions

    /// Lower an expression that must produce a value.
    fn value(&mut self, expr: &Expr<'_>) -> LowerResult<B::Value> {
        self.expr(expr)?.ok_or_else(|| LowerError::VoidValue {
            expr: expr.to_string(),
        })
    }

    /// Lower an expression; `None` for a call to a `nil` function.
    fn expr(&mut self, expr: &Expr<'_>) -> LowerResult<Option<B::Value>> {
        let value = match expr {
            Expr::Number(text) => self.number(text)?,
            Expr::String(text) => self.builder.const_string(text.as_bytes())?,
            Expr::Identifier(name) => {
                let local = self.lookup(name)?;
                self.builder.load(local.ty, local.cell, name)?
            }
            Expr::Group(inner) => return self.expr(inner),
            Expr::Binary { left, op, right } => self.binary(left, *op, right)?,
            Expr::Unary { op, operand } => self.unary(*op, operand)?,
            Expr::Prefix { op, target } => self.step(*op, target, true)?,
            Expr::Postfix { op, target } => self.step(*op, target, false)?,
            Expr::Assign { op, target, value } => self.assign(*op, target, value)?,
            Expr::Call { callee, args } => return self.call(callee, args),
            Expr::Invalid => {
                return Err(LowerError::Malformed {
                    what: "expression".to_string(),
                })
            }
        };
        Ok(Some(value))
    }

    fn number(&mut self, text: &str) -> LowerResult<B::Value> {
        let invalid = || LowerError::InvalidNumber {
            text: text.to_string(),
        };
        if text.contains('.') {
            let value: f64 = text.parse().map_err(|_| invalid())?;
            Ok(self.builder.const_float(value)?)
        } else {
            let value: i64 = text.parse().map_err(|_| invalid())?;
            Ok(self.builder.const_int(IrType::I64, value)?)
        }
    }

    /// Test a value against zero, yielding `i1`.
    fn truthy(&mut self, value: B::Value) -> LowerResult<B::Value> {
        let ty = self.builder.value_type(value);
        let zero = match ty {
            IrType::I1 => return Ok(value),
            IrType::I8 | IrType::I64 | IrType::F64 => self.builder.const_zero(ty)?,
            other => {
                return Err(LowerError::TypeMismatch {
                    context: "condition",
                    detail: format!("{} is not a number", source_name(other)),
                })
            }
        };
        Ok(self.builder.compare(CmpPredicate::Ne, value, zero, "tobool")?)
    }

    /// Convert `value` to `to`, allowing integer width changes only.
    fn coerce(&mut self, value: B::Value, to: IrType, context: &'static str) -> LowerResult<B::Value> {
        let from = self.builder.value_type(value);
        if from == to {
            return Ok(value);
        }
        if from.is_int() && to == IrType::I1 {
            return self.truthy(value);
        }
        if from.is_int() && to.is_int() {
            return Ok(self.builder.int_cast(value, to, "conv")?);
        }
        Err(LowerError::TypeMismatch {
            context,
            detail: format!("cannot convert {} to {}", source_name(from), source_name(to)),
        })
    }

    /// Bring two operands to one type, widening mixed integers to `i64`.
    fn unify(
        &mut self,
        lhs: B::Value,
        rhs: B::Value,
        context: &'static str,
    ) -> LowerResult<(B::Value, B::Value, IrType)> {
        let (lt, rt) = (self.builder.value_type(lhs), self.builder.value_type(rhs));
        if lt == rt {
            return Ok((lhs, rhs, lt));
        }
        if lt.is_int() && rt.is_int() {
            let lhs = self.builder.int_cast(lhs, IrType::I64, "widen")?;
            let rhs = self.builder.int_cast(rhs, IrType::I64, "widen")?;
            return Ok((lhs, rhs, IrType::I64));
        }
        Err(LowerError::TypeMismatch {
            context,
            detail: format!("{} and {}", source_name(lt), source_name(rt)),
        })
    }

    fn binary(&mut self, left: &Expr<'_>, op: BinaryOperator, right: &Expr<'_>) -> LowerResult<B::Value> {
        let lhs = self.value(left)?;
        let rhs = self.value(right)?;

        if op.is_logical() {
            let lhs = self.truthy(lhs)?;
            let rhs = self.truthy(rhs)?;
            let bitwise = if op == BinaryOperator::And { BinaryOp::And } else { BinaryOp::Or };
            return Ok(self.builder.binary(bitwise, lhs, rhs, op.symbol())?);
        }
        self.arithmetic(op, lhs, rhs)
    }

    /// Arithmetic or comparison over already-lowered operands.
    fn arithmetic(&mut self, op: BinaryOperator, lhs: B::Value, rhs: B::Value) -> LowerResult<B::Value> {
        let (lhs, rhs, ty) = self.unify(lhs, rhs, op.symbol())?;
        let unsupported = || LowerError::UnsupportedOperator {
            op: op.symbol(),
            ty: source_name(ty).to_string(),
        };
        if !(ty.is_int() || ty == IrType::F64) {
            return Err(unsupported());
        }
        let float = ty == IrType::F64;

        let predicate = match op {
            BinaryOperator::Equal => Some(CmpPredicate::Eq),
            BinaryOperator::NotEqual => Some(CmpPredicate::Ne),
            BinaryOperator::Less => Some(CmpPredicate::Slt),
            BinaryOperator::LessEqual => Some(CmpPredicate::Sle),
            BinaryOperator::Greater => Some(CmpPredicate::Sgt),
            BinaryOperator::GreaterEqual => Some(CmpPredicate::Sge),
            _ => None,
        };
        if let Some(pred) = predicate {
            return Ok(self.builder.compare(pred, lhs, rhs, "cmp")?);
        }

        let inst = match (op, float) {
            (BinaryOperator::Add, false) => BinaryOp::Add,
            (BinaryOperator::Sub, false) => BinaryOp::Sub,
            (BinaryOperator::Mul, false) => BinaryOp::Mul,
            (BinaryOperator::Div, false) => BinaryOp::SDiv,
            (BinaryOperator::Rem, false) => BinaryOp::SRem,
            (BinaryOperator::Add, true) => BinaryOp::FAdd,
            (BinaryOperator::Sub, true) => BinaryOp::FSub,
            (BinaryOperator::Mul, true) => BinaryOp::FMul,
            (BinaryOperator::Div, true) => BinaryOp::FDiv,
            _ => return Err(unsupported()),
        };
        Ok(self.builder.binary(inst, lhs, rhs, inst.name())?)
    }

    fn unary(&mut self, op: UnaryOperator, operand: &Expr<'_>) -> LowerResult<B::Value> {
        let value = self.value(operand)?;
        let ty = self.builder.value_type(value);
        if !(ty.is_int() || ty == IrType::F64) {
            return Err(LowerError::UnsupportedOperator {
                op: op.symbol(),
                ty: source_name(ty).to_string(),
            });
        }

        match op {
            UnaryOperator::Plus => Ok(value),
            UnaryOperator::Negate => Ok(self.builder.negate(value, "neg")?),
            UnaryOperator::Not => {
                let zero = self.builder.const_zero(ty)?;
                Ok(self.builder.compare(CmpPredicate::Eq, value, zero, "not")?)
            }
        }
    }

    /// Resolve an assignment target to its cell.
    fn target(&self, target: &Expr<'_>) -> LowerResult<(String, Local<B::Value>)> {
        match target.ungrouped() {
            Expr::Identifier(name) => Ok((name.to_string(), self.lookup(name)?)),
            other => Err(LowerError::InvalidAssignTarget {
                target: other.to_string(),
            }),
        }
    }

    /// `++x`/`--x` yield the new value, `x++`/`x--` the old one.
    fn step(&mut self, op: StepOperator, target: &Expr<'_>, prefix: bool) -> LowerResult<B::Value> {
        let (name, local) = self.target(target)?;
        let old = self.builder.load(local.ty, local.cell, &name)?;
        let one = match local.ty {
            IrType::F64 => self.builder.const_float(1.0)?,
            ty if ty.is_int() => self.builder.const_int(ty, 1)?,
            ty => {
                return Err(LowerError::UnsupportedOperator {
                    op: op.symbol(),
                    ty: source_name(ty).to_string(),
                })
            }
        };
        let arithmetic = match op {
            StepOperator::Increment => BinaryOperator::Add,
            StepOperator::Decrement => BinaryOperator::Sub,
        };
        let new = self.arithmetic(arithmetic, old, one)?;
        let new = self.coerce(new, local.ty, "increment")?;
        self.builder.store(new, local.cell)?;
        Ok(if prefix { new } else { old })
    }

    fn assign(&mut self, op: AssignOperator, target: &Expr<'_>, value: &Expr<'_>) -> LowerResult<B::Value> {
        let (name, local) = self.target(target)?;
        let mut value = self.value(value)?;
        if let Some(arithmetic) = op.binary() {
            let old = self.builder.load(local.ty, local.cell, &name)?;
            value = self.arithmetic(arithmetic, old, value)?;
        }
        let value = self.coerce(value, local.ty, "assignment")?;
        self.builder.store(value, local.cell)?;
        Ok(value)
    }

    fn call(&mut self, callee: &Expr<'_>, args: &[&Expr<'_>]) -> LowerResult<Option<B::Value>> {
        let name = match callee.ungrouped() {
            Expr::Identifier(name) => *name,
            other => {
                return Err(LowerError::UnresolvedCallee {
                    name: other.to_string(),
                })
            }
        };
        let signature = self.signature(name)?;
        if signature.params.len() != args.len() {
            return Err(LowerError::ArityMismatch {
                name: name.to_string(),
                expected: signature.params.len(),
                found: args.len(),
            });
        }

        let mut values = Vec::with_capacity(args.len());
        for (arg, ty) in args.iter().zip(&signature.params) {
            let value = self.value(arg)?;
            values.push(self.coerce(value, *ty, "call argument")?);
        }
        let call_name = if signature.ret == IrType::Void { "" } else { "call" };
        Ok(self.builder.call(signature.function, &values, call_name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::diagnostics::Diagnostics;
    use crate::ir::{Interpreter, Module, ModuleBuilder};
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn lower_source(source: &str) -> LowerResult<Module> {
        let arena = Arena::new();
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize(source, "test.xi", &mut diagnostics);
        let program = parse(&tokens, &arena, "test.xi", &mut diagnostics).unwrap();
        assert!(diagnostics.is_empty(), "{}", diagnostics.render_all());

        let mut builder = ModuleBuilder::new("test");
        lower(&program, &mut builder)?;
        Ok(builder.finish())
    }

    fn run_main(source: &str) -> i64 {
        let module = lower_source(source).unwrap();
        Interpreter::new(&module).call_int("main", &[]).unwrap()
    }

    #[test]
    fn test_implicit_main_returns_last_expression() {
        assert_eq!(run_main("5 * 3 * (3 + 5) / 5"), 24);
        assert_eq!(run_main("var x: int = 4; x * x;"), 16);
        assert_eq!(run_main("var x: int = 4;"), 0);
    }

    #[test]
    fn test_forward_call_and_recursion() {
        let source = "
            fn main() int { return fact(5); }
            fn fact(n: int) int {
                if (n <= 1) { return 1; }
                return n * fact(n - 1);
            }
        ";
        assert_eq!(run_main(source), 120);
    }

    #[test]
    fn test_if_without_fallthrough_has_no_double_terminator() {
        let module = lower_source(
            "fn sign(x: int) int { if (x < 0) { return 0 - 1; } else { return 1; } }",
        )
        .unwrap();
        let function = module.function("sign").unwrap();
        for block in function.block_ids() {
            let terminators = function.blocks[block.0 as usize]
                .insts
                .iter()
                .filter(|id| function.values[id.0 as usize].inst.is_terminator())
                .count();
            assert_eq!(terminators, 1);
        }
        let mut interp = Interpreter::new(&module);
        assert_eq!(interp.call_int("sign", &[-4]).unwrap(), -1);
        assert_eq!(interp.call_int("sign", &[9]).unwrap(), 1);
    }

    #[test]
    fn test_compound_assignment_and_steps() {
        let source = "
            var a: int = 10;
            a += 5;
            a -= 3;
            a *= 2;
            a /= 4;
            var b: int = a++;
            var c: int = ++a;
            a * 100 + b * 10 + c;
        ";
        // a: 10 -> 15 -> 12 -> 24 -> 6; b = 6, a = 7; c = 8, a = 8
        assert_eq!(run_main(source), 868);
    }

    #[test]
    fn test_logical_and_narrow_types() {
        let source = "
            var flag: bool = 3 > 2 && !(1 == 2);
            var ch: char = 65;
            var total: int = ch + flag;
            total;
        ";
        assert_eq!(run_main(source), 66);
    }

    #[test]
    fn test_lowering_errors() {
        assert_eq!(
            lower_source("y + 1;").unwrap_err(),
            LowerError::UnknownVariable {
                name: "y".to_string()
            }
        );
        assert!(matches!(
            lower_source("fn f(a: int) int { return a; } f(1, 2);").unwrap_err(),
            LowerError::ArityMismatch { expected: 1, found: 2, .. }
        ));
        assert!(matches!(
            lower_source("missing(1);").unwrap_err(),
            LowerError::UnresolvedCallee { .. }
        ));
        assert!(matches!(
            lower_source("var p: point = 1;").unwrap_err(),
            LowerError::UnknownType { .. }
        ));
        assert!(matches!(
            lower_source("var x: int = 1; (x + 1) = 2;").unwrap_err(),
            LowerError::InvalidAssignTarget { .. }
        ));
        assert!(matches!(
            lower_source("var f: float = 1.5; f + 1;").unwrap_err(),
            LowerError::TypeMismatch { .. }
        ));
        assert!(matches!(
            lower_source("fn main() int { return 0; } 1;").unwrap_err(),
            LowerError::DuplicateFunction { .. }
        ));
        assert!(matches!(
            lower_source("@module a; @module b;").unwrap_err(),
            LowerError::DuplicateModule { .. }
        ));
        assert!(matches!(
            lower_source("fn f() nil { return 1; }").unwrap_err(),
            LowerError::UnexpectedReturnValue { .. }
        ));
    }

    #[test]
    fn test_unreachable_statements_are_skipped() {
        let module = lower_source("fn f() int { return 1; return 2; }").unwrap();
        let function = module.function("f").unwrap();
        assert_eq!(function.blocks.len(), 1);
        assert_eq!(function.instruction_count(), 1);
    }

    #[test]
    fn test_module_name_and_runtime_declarations() {
        let module = lower_source("@module demo; println(1, 7);").unwrap();
        assert_eq!(module.name, "demo");
        assert!(module.function(ITOA_SYMBOL).unwrap().is_declaration);
        assert!(module.function(WRITE_SYMBOL).unwrap().is_declaration);

        let module = lower_source("1 + 1;").unwrap();
        assert!(module.function(WRITE_SYMBOL).is_none());
    }
}
