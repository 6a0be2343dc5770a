// This module defines the in-crate control-flow-graph IR that lowering targets by default.
// The layout is index based: a Module owns functions and static data, each Function owns
// flat tables of values and basic blocks, and instructions are values whose ids are listed
// in block order. Constants, parameters and static-data addresses are values that live in
// no block, which keeps constants out of the instruction stream the way LLVM inlines them.
// Every block that lowering finishes ends in exactly one terminator (br, cond br, or ret);
// the CFG queries (successors, predecessors, block lookup by name) and the textual printer
// are read-only views over that structure. The ModuleBuilder in builder.rs is the only
// producer, and interp.rs executes the result.

//! Control-flow-graph IR, its builder contract, and a reference interpreter.

pub mod builder;
pub mod interp;

pub use builder::{BlockRef, BuildError, BuildResult, IrBuilder, ModuleBuilder};
pub use interp::{InterpConfig, InterpError, Interpreter, RtValue, WriteRecord};

use hashbrown::HashMap;
use std::fmt::{self, Write};

/// Machine-level value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    I1,
    I8,
    I64,
    F64,
    Ptr,
    Void,
}

impl IrType {
    pub fn is_int(self) -> bool {
        matches!(self, IrType::I1 | IrType::I8 | IrType::I64)
    }

    /// Width of an integer type, `None` otherwise.
    pub fn bit_width(self) -> Option<u32> {
        match self {
            IrType::I1 => Some(1),
            IrType::I8 => Some(8),
            IrType::I64 => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IrType::I1 => "i1",
            IrType::I8 => "i8",
            IrType::I64 => "i64",
            IrType::F64 => "double",
            IrType::Ptr => "ptr",
            IrType::Void => "void",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    And,
    Or,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl BinaryOp {
    pub fn is_float(self) -> bool {
        matches!(
            self,
            BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::SRem => "srem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::FAdd => "fadd",
            BinaryOp::FSub => "fsub",
            BinaryOp::FMul => "fmul",
            BinaryOp::FDiv => "fdiv",
        }
    }
}

/// Signed integer predicates; on `double` operands they compare ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CmpPredicate {
    pub fn name(self, float: bool) -> &'static str {
        match (self, float) {
            (CmpPredicate::Eq, false) => "eq",
            (CmpPredicate::Ne, false) => "ne",
            (CmpPredicate::Slt, false) => "slt",
            (CmpPredicate::Sle, false) => "sle",
            (CmpPredicate::Sgt, false) => "sgt",
            (CmpPredicate::Sge, false) => "sge",
            (CmpPredicate::Eq, true) => "oeq",
            (CmpPredicate::Ne, true) => "one",
            (CmpPredicate::Slt, true) => "olt",
            (CmpPredicate::Sle, true) => "ole",
            (CmpPredicate::Sgt, true) => "ogt",
            (CmpPredicate::Sge, true) => "oge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastKind {
    ZExt,
    SExt,
    Trunc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Param { index: u32 },
    ConstInt { value: i64 },
    ConstFloat { value: f64 },
    DataPtr { data: DataId },
    Binary { op: BinaryOp, lhs: ValueId, rhs: ValueId },
    Cmp { pred: CmpPredicate, lhs: ValueId, rhs: ValueId },
    Neg { operand: ValueId },
    Cast { kind: CastKind, value: ValueId },
    /// Stack cell holding one value of `ty`.
    Alloca { ty: IrType },
    /// Stack byte buffer.
    AllocaBytes { len: u32 },
    Load { cell: ValueId },
    Store { value: ValueId, cell: ValueId },
    Call { callee: FuncId, args: Vec<ValueId> },
    Br { target: BlockId },
    CondBr { cond: ValueId, then_block: BlockId, else_block: BlockId },
    Ret { value: Option<ValueId> },
}

impl Inst {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Inst::Br { .. } | Inst::CondBr { .. } | Inst::Ret { .. })
    }

    /// Values that need no block: constants, parameters, data addresses.
    pub fn is_floating(&self) -> bool {
        matches!(
            self,
            Inst::Param { .. } | Inst::ConstInt { .. } | Inst::ConstFloat { .. } | Inst::DataPtr { .. }
        )
    }

    pub fn opcode(&self) -> &'static str {
        match self {
            Inst::Param { .. } => "param",
            Inst::ConstInt { .. } | Inst::ConstFloat { .. } => "const",
            Inst::DataPtr { .. } => "data",
            Inst::Binary { op, .. } => op.name(),
            Inst::Cmp { .. } => "cmp",
            Inst::Neg { .. } => "neg",
            Inst::Cast { .. } => "cast",
            Inst::Alloca { .. } | Inst::AllocaBytes { .. } => "alloca",
            Inst::Load { .. } => "load",
            Inst::Store { .. } => "store",
            Inst::Call { .. } => "call",
            Inst::Br { .. } => "br",
            Inst::CondBr { .. } => "condbr",
            Inst::Ret { .. } => "ret",
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Inst::Br { target } => vec![*target],
            Inst::CondBr {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub ty: IrType,
    pub inst: Inst,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub insts: Vec<ValueId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: IrType,
    /// Parameter values, in order.
    pub param_values: Vec<ValueId>,
    pub blocks: Vec<Block>,
    pub values: Vec<Value>,
    /// No body: resolved by the runtime or another unit.
    pub is_declaration: bool,
}

impl Function {
    pub fn value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id.0 as usize)
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0 as usize)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.name == name)
            .map(|i| BlockId(i as u32))
    }

    /// Last instruction of `block` if it is a terminator.
    pub fn terminator(&self, block: BlockId) -> Option<&Inst> {
        let last = *self.block(block)?.insts.last()?;
        let inst = &self.value(last)?.inst;
        inst.is_terminator().then_some(inst)
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(Inst::successors)
            .unwrap_or_default()
    }

    /// Blocks with an edge into `block`, in block order.
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.block_ids()
            .filter(|&b| self.successors(b).contains(&block))
            .collect()
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    /// Static byte strings, addressed by `DataId`.
    pub data: Vec<Vec<u8>>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            functions: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn function_id(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_by_id(&self, id: FuncId) -> Option<&Function> {
        self.functions.get(id.0 as usize)
    }

    /// Instruction count per opcode over every defined function.
    pub fn instruction_counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for function in &self.functions {
            for block in &function.blocks {
                for id in &block.insts {
                    if let Some(value) = function.value(*id) {
                        *counts.entry(value.inst.opcode()).or_insert(0) += 1;
                    }
                }
            }
        }
        counts
    }

    pub fn block_count(&self) -> usize {
        self.functions.iter().map(|f| f.blocks.len()).sum()
    }

    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(Function::instruction_count).sum()
    }

    /// LLVM-flavoured textual form.
    pub fn print(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "; ModuleID = '{}'", self.name)?;

        for (index, bytes) in self.data.iter().enumerate() {
            writeln!(
                out,
                "@.str.{} = private constant [{} x i8] c\"{}\"",
                index,
                bytes.len(),
                escape_bytes(bytes)
            )?;
        }

        for function in &self.functions {
            writeln!(out)?;
            write_function(out, self, function)?;
        }
        Ok(())
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print())
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for &b in bytes {
        if (b.is_ascii_graphic() && b != b'"' && b != b'\\') || b == b' ' {
            text.push(b as char);
        } else {
            text.push_str(&format!("\\{:02X}", b));
        }
    }
    text
}

fn operand(function: &Function, id: ValueId) -> String {
    match function.value(id) {
        Some(Value {
            inst: Inst::ConstInt { value },
            ..
        }) => value.to_string(),
        Some(Value {
            inst: Inst::ConstFloat { value },
            ..
        }) => format!("{:?}", value),
        Some(Value {
            inst: Inst::DataPtr { data },
            ..
        }) => format!("@.str.{}", data.0),
        _ => format!("%{}", id.0),
    }
}

fn typed(function: &Function, id: ValueId) -> String {
    let ty = function.value(id).map(|v| v.ty).unwrap_or(IrType::Void);
    format!("{} {}", ty, operand(function, id))
}

fn write_function(out: &mut String, module: &Module, function: &Function) -> fmt::Result {
    let params: Vec<String> = if function.is_declaration {
        function.params.iter().map(|ty| ty.to_string()).collect()
    } else {
        function
            .param_values
            .iter()
            .map(|id| typed(function, *id))
            .collect()
    };

    if function.is_declaration {
        return writeln!(
            out,
            "declare {} @{}({})",
            function.ret,
            function.name,
            params.join(", ")
        );
    }

    writeln!(
        out,
        "define {} @{}({}) {{",
        function.ret,
        function.name,
        params.join(", ")
    )?;

    for block in &function.blocks {
        writeln!(out, "{}:", block.name)?;
        for id in &block.insts {
            let Some(value) = function.value(*id) else {
                continue;
            };
            out.push_str("  ");
            write_inst(out, module, function, *id, value)?;
            out.push('\n');
        }
    }
    writeln!(out, "}}")
}

fn write_inst(
    out: &mut String,
    module: &Module,
    function: &Function,
    id: ValueId,
    value: &Value,
) -> fmt::Result {
    let label = |block: &BlockId| {
        function
            .block(*block)
            .map(|b| b.name.clone())
            .unwrap_or_default()
    };

    if value.ty != IrType::Void {
        write!(out, "%{} = ", id.0)?;
    }

    match &value.inst {
        Inst::Binary { op, lhs, rhs } => write!(
            out,
            "{} {}, {}",
            op.name(),
            typed(function, *lhs),
            operand(function, *rhs)
        ),
        Inst::Cmp { pred, lhs, rhs } => {
            let float = function.value(*lhs).map(|v| v.ty) == Some(IrType::F64);
            write!(
                out,
                "{} {} {}, {}",
                if float { "fcmp" } else { "icmp" },
                pred.name(float),
                typed(function, *lhs),
                operand(function, *rhs)
            )
        }
        Inst::Neg { operand: inner } => {
            if value.ty == IrType::F64 {
                write!(out, "fneg {}", typed(function, *inner))
            } else {
                write!(out, "sub {} 0, {}", value.ty, operand(function, *inner))
            }
        }
        Inst::Cast { kind, value: inner } => {
            let name = match kind {
                CastKind::ZExt => "zext",
                CastKind::SExt => "sext",
                CastKind::Trunc => "trunc",
            };
            write!(out, "{} {} to {}", name, typed(function, *inner), value.ty)
        }
        Inst::Alloca { ty } => write!(out, "alloca {}", ty),
        Inst::AllocaBytes { len } => write!(out, "alloca [{} x i8]", len),
        Inst::Load { cell } => write!(out, "load {}, ptr {}", value.ty, operand(function, *cell)),
        Inst::Store { value: stored, cell } => write!(
            out,
            "store {}, ptr {}",
            typed(function, *stored),
            operand(function, *cell)
        ),
        Inst::Call { callee, args } => {
            let callee = module.function_by_id(*callee);
            let args: Vec<String> = args.iter().map(|a| typed(function, *a)).collect();
            write!(
                out,
                "call {} @{}({})",
                value.ty,
                callee.map(|f| f.name.as_str()).unwrap_or("?"),
                args.join(", ")
            )
        }
        Inst::Br { target } => write!(out, "br label %{}", label(target)),
        Inst::CondBr {
            cond,
            then_block,
            else_block,
        } => write!(
            out,
            "br {}, label %{}, label %{}",
            typed(function, *cond),
            label(then_block),
            label(else_block)
        ),
        Inst::Ret { value: Some(ret) } => write!(out, "ret {}", typed(function, *ret)),
        Inst::Ret { value: None } => write!(out, "ret void"),
        Inst::Param { .. } | Inst::ConstInt { .. } | Inst::ConstFloat { .. } | Inst::DataPtr { .. } => {
            write!(out, "{}", operand(function, id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Function {
        let values = vec![
            Value {
                ty: IrType::I1,
                inst: Inst::ConstInt { value: 1 },
                name: String::new(),
            },
            Value {
                ty: IrType::Void,
                inst: Inst::CondBr {
                    cond: ValueId(0),
                    then_block: BlockId(1),
                    else_block: BlockId(2),
                },
                name: String::new(),
            },
            Value {
                ty: IrType::Void,
                inst: Inst::Br { target: BlockId(3) },
                name: String::new(),
            },
            Value {
                ty: IrType::Void,
                inst: Inst::Br { target: BlockId(3) },
                name: String::new(),
            },
            Value {
                ty: IrType::Void,
                inst: Inst::Ret { value: None },
                name: String::new(),
            },
        ];
        let block = |name: &str, insts: Vec<u32>| Block {
            name: name.to_string(),
            insts: insts.into_iter().map(ValueId).collect(),
        };

        Function {
            name: "f".to_string(),
            params: Vec::new(),
            ret: IrType::Void,
            param_values: Vec::new(),
            blocks: vec![
                block("entry", vec![1]),
                block("then", vec![2]),
                block("else", vec![3]),
                block("after", vec![4]),
            ],
            values,
            is_declaration: false,
        }
    }

    #[test]
    fn test_cfg_queries() {
        let function = diamond();
        let after = function.block_by_name("after").unwrap();

        assert_eq!(function.successors(BlockId(0)), vec![BlockId(1), BlockId(2)]);
        assert_eq!(function.predecessors(after), vec![BlockId(1), BlockId(2)]);
        assert!(function.predecessors(BlockId(0)).is_empty());
        assert!(matches!(function.terminator(after), Some(Inst::Ret { value: None })));
        assert_eq!(function.instruction_count(), 4);
    }

    #[test]
    fn test_print_and_counts() {
        let mut module = Module::new("demo");
        module.data.push(b"hi\n".to_vec());
        module.functions.push(diamond());

        let text = module.print();
        assert!(text.starts_with("; ModuleID = 'demo'\n"));
        assert!(text.contains("@.str.0 = private constant [3 x i8] c\"hi\\0A\""));
        assert!(text.contains("define void @f() {\nentry:\n  br i1 1, label %then, label %else\n"));
        assert!(text.contains("after:\n  ret void\n}"));

        let counts = module.instruction_counts();
        assert_eq!(counts.get("br"), Some(&2));
        assert_eq!(counts.get("condbr"), Some(&1));
    }

    #[test]
    fn test_types() {
        assert!(IrType::I8.is_int());
        assert!(!IrType::Ptr.is_int());
        assert_eq!(IrType::I1.bit_width(), Some(1));
        assert_eq!(IrType::F64.to_string(), "double");
    }
}
