// This module defines IrBuilder, the contract the lowering pass needs from a target IR, and
// ModuleBuilder, its implementation over the in-crate CFG IR. The trait is deliberately
// small: declare functions, create and position basic blocks, ask whether a block is
// already terminated, and emit constants, arithmetic, comparisons, casts, stack cells,
// loads, stores, calls, and the three terminators. Stack cells are always placed in the
// function's entry block after the cells already there, whatever the current insertion
// point is, so every cell dominates its uses. ModuleBuilder validates operand types as it
// goes and refuses to append to a terminated block, so a lowering bug surfaces as a
// BuildError instead of a malformed module. The optional llvm feature provides a second
// implementation over inkwell.

//! The IR-builder contract and its in-crate implementation.

use super::{
    BinaryOp, BlockId, CastKind, CmpPredicate, DataId, FuncId, Function, Inst, IrType, Module,
    Value, ValueId,
};
use hashbrown::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Errors raised while emitting IR.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("No insertion point is set")]
    NoInsertPoint,

    #[error("Block '{block}' already ends in a terminator")]
    BlockTerminated { block: String },

    #[error("Operand mismatch in {op}: {detail}")]
    OperandMismatch { op: &'static str, detail: String },

    #[error("Function '{name}' redeclared with a different signature")]
    SignatureConflict { name: String },

    #[error("Call to '{callee}' expects {expected} arguments, found {found}")]
    CallArity {
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("Unknown {what} handle")]
    InvalidHandle { what: &'static str },

    #[error("Backend error: {reason}")]
    Backend { reason: String },
}

/// Result type alias for IR emission.
pub type BuildResult<T> = Result<T, BuildError>;

fn mismatch(op: &'static str, detail: impl Into<String>) -> BuildError {
    BuildError::OperandMismatch {
        op,
        detail: detail.into(),
    }
}

/// What lowering requires from a target IR.
pub trait IrBuilder {
    type Value: Copy + fmt::Debug;
    type Block: Copy + fmt::Debug;
    type Function: Copy + fmt::Debug;

    fn set_module_name(&mut self, name: &str);

    /// Declare a function. Declaring an existing name with the same
    /// signature returns the existing function.
    fn declare_function(
        &mut self,
        name: &str,
        params: &[IrType],
        ret: IrType,
    ) -> BuildResult<Self::Function>;

    /// Append a block to `function`. Names are made unique per function.
    fn append_block(&mut self, function: Self::Function, name: &str) -> BuildResult<Self::Block>;

    fn position_at_end(&mut self, block: Self::Block);

    fn insert_block(&self) -> Option<Self::Block>;

    fn has_terminator(&self, block: Self::Block) -> bool;

    fn param(&self, function: Self::Function, index: usize) -> BuildResult<Self::Value>;

    fn value_type(&self, value: Self::Value) -> IrType;

    fn const_int(&mut self, ty: IrType, value: i64) -> BuildResult<Self::Value>;

    fn const_float(&mut self, value: f64) -> BuildResult<Self::Value>;

    fn const_zero(&mut self, ty: IrType) -> BuildResult<Self::Value> {
        match ty {
            IrType::F64 => self.const_float(0.0),
            _ => self.const_int(ty, 0),
        }
    }

    /// Address of a static byte string (no terminator added).
    fn const_string(&mut self, bytes: &[u8]) -> BuildResult<Self::Value>;

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: Self::Value,
        rhs: Self::Value,
        name: &str,
    ) -> BuildResult<Self::Value>;

    fn compare(
        &mut self,
        pred: CmpPredicate,
        lhs: Self::Value,
        rhs: Self::Value,
        name: &str,
    ) -> BuildResult<Self::Value>;

    fn negate(&mut self, value: Self::Value, name: &str) -> BuildResult<Self::Value>;

    /// Convert between integer widths (zero-extends `i1`, sign-extends wider).
    fn int_cast(&mut self, value: Self::Value, to: IrType, name: &str) -> BuildResult<Self::Value>;

    /// Stack cell for one value of `ty`, placed in the entry block.
    fn alloca(&mut self, ty: IrType, name: &str) -> BuildResult<Self::Value>;

    /// Stack byte buffer of `len` bytes, placed in the entry block.
    fn alloca_bytes(&mut self, len: u32, name: &str) -> BuildResult<Self::Value>;

    fn load(&mut self, ty: IrType, cell: Self::Value, name: &str) -> BuildResult<Self::Value>;

    fn store(&mut self, value: Self::Value, cell: Self::Value) -> BuildResult<()>;

    /// Returns `None` for a call to a `void` function.
    fn call(
        &mut self,
        function: Self::Function,
        args: &[Self::Value],
        name: &str,
    ) -> BuildResult<Option<Self::Value>>;

    fn br(&mut self, target: Self::Block) -> BuildResult<()>;

    fn cond_br(
        &mut self,
        cond: Self::Value,
        then_block: Self::Block,
        else_block: Self::Block,
    ) -> BuildResult<()>;

    fn ret(&mut self, value: Option<Self::Value>) -> BuildResult<()>;
}

/// A block handle: the owning function plus the block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub function: FuncId,
    pub block: BlockId,
}

/// Block names used in one function, with the next suffix to try for each
/// base name.
#[derive(Debug, Default)]
struct BlockNames {
    taken: HashSet<String>,
    next_suffix: HashMap<String, u32>,
}

impl BlockNames {
    fn claim(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_string()) {
            return name.to_string();
        }

        let suffix = self.next_suffix.entry(name.to_string()).or_insert(1);
        loop {
            let candidate = format!("{}.{}", name, suffix);
            *suffix += 1;
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Builds an in-crate [`Module`].
#[derive(Debug)]
pub struct ModuleBuilder {
    module: Module,
    insert: Option<BlockRef>,
    strings: HashMap<Vec<u8>, DataId>,
    block_names: HashMap<FuncId, BlockNames>,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            module: Module::new(name),
            insert: None,
            strings: HashMap::new(),
            block_names: HashMap::new(),
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn finish(self) -> Module {
        self.module
    }

    fn function_ref(&self, id: FuncId) -> BuildResult<&Function> {
        self.module
            .functions
            .get(id.0 as usize)
            .ok_or(BuildError::InvalidHandle { what: "function" })
    }

    fn function_mut(&mut self, id: FuncId) -> BuildResult<&mut Function> {
        self.module
            .functions
            .get_mut(id.0 as usize)
            .ok_or(BuildError::InvalidHandle { what: "function" })
    }

    fn current(&self) -> BuildResult<BlockRef> {
        self.insert.ok_or(BuildError::NoInsertPoint)
    }

    fn ty(&self, value: ValueId) -> IrType {
        self.value_type(value)
    }

    /// Add a value that lives in no block.
    fn floating(&mut self, ty: IrType, inst: Inst) -> BuildResult<ValueId> {
        let at = self.current()?;
        let function = self.function_mut(at.function)?;
        let id = ValueId(function.values.len() as u32);
        function.values.push(Value {
            ty,
            inst,
            name: String::new(),
        });
        Ok(id)
    }

    /// Append an instruction at the insertion point.
    fn emit(&mut self, ty: IrType, inst: Inst, name: &str) -> BuildResult<ValueId> {
        let at = self.current()?;
        if self.has_terminator(at) {
            let block = self
                .function_ref(at.function)?
                .block(at.block)
                .map(|b| b.name.clone())
                .unwrap_or_default();
            return Err(BuildError::BlockTerminated { block });
        }

        log::trace!("emit {} {:?}", inst.opcode(), name);
        let function = self.function_mut(at.function)?;
        let id = ValueId(function.values.len() as u32);
        function.values.push(Value {
            ty,
            inst,
            name: name.to_string(),
        });
        function
            .blocks
            .get_mut(at.block.0 as usize)
            .ok_or(BuildError::InvalidHandle { what: "block" })?
            .insts
            .push(id);
        Ok(id)
    }

    /// Insert a stack cell after the cells already heading the entry block.
    fn entry_alloca(&mut self, ty: IrType, inst: Inst, name: &str) -> BuildResult<ValueId> {
        let at = self.current()?;
        let function = self.function_mut(at.function)?;
        let id = ValueId(function.values.len() as u32);
        function.values.push(Value {
            ty,
            inst,
            name: name.to_string(),
        });

        let values = &function.values;
        let entry = function
            .blocks
            .first_mut()
            .ok_or(BuildError::InvalidHandle { what: "block" })?;
        let position = entry
            .insts
            .iter()
            .take_while(|v| {
                matches!(
                    values.get(v.0 as usize).map(|v| &v.inst),
                    Some(Inst::Alloca { .. } | Inst::AllocaBytes { .. })
                )
            })
            .count();
        entry.insts.insert(position, id);
        Ok(id)
    }
}

impl IrBuilder for ModuleBuilder {
    type Value = ValueId;
    type Block = BlockRef;
    type Function = FuncId;

    fn set_module_name(&mut self, name: &str) {
        self.module.name = name.to_string();
    }

    fn declare_function(
        &mut self,
        name: &str,
        params: &[IrType],
        ret: IrType,
    ) -> BuildResult<FuncId> {
        if let Some(id) = self.module.function_id(name) {
            let existing = self.function_ref(id)?;
            if existing.params == params && existing.ret == ret {
                return Ok(id);
            }
            return Err(BuildError::SignatureConflict {
                name: name.to_string(),
            });
        }

        if let Some(bad) = params.iter().find(|ty| **ty == IrType::Void) {
            return Err(mismatch("declare", format!("parameter of type {}", bad)));
        }

        let values: Vec<Value> = params
            .iter()
            .enumerate()
            .map(|(index, ty)| Value {
                ty: *ty,
                inst: Inst::Param {
                    index: index as u32,
                },
                name: String::new(),
            })
            .collect();
        let param_values = (0..values.len() as u32).map(ValueId).collect();

        let id = FuncId(self.module.functions.len() as u32);
        self.module.functions.push(Function {
            name: name.to_string(),
            params: params.to_vec(),
            ret,
            param_values,
            blocks: Vec::new(),
            values,
            is_declaration: true,
        });
        log::debug!("declared function {}", name);
        Ok(id)
    }

    fn append_block(&mut self, function: FuncId, name: &str) -> BuildResult<BlockRef> {
        self.function_ref(function)?;
        let name = self.block_names.entry(function).or_default().claim(name);
        let target = self.function_mut(function)?;
        let block = BlockId(target.blocks.len() as u32);
        target.blocks.push(super::Block {
            name,
            insts: Vec::new(),
        });
        target.is_declaration = false;
        Ok(BlockRef { function, block })
    }

    fn position_at_end(&mut self, block: BlockRef) {
        self.insert = Some(block);
    }

    fn insert_block(&self) -> Option<BlockRef> {
        self.insert
    }

    fn has_terminator(&self, block: BlockRef) -> bool {
        self.module
            .functions
            .get(block.function.0 as usize)
            .and_then(|f| f.terminator(block.block))
            .is_some()
    }

    fn param(&self, function: FuncId, index: usize) -> BuildResult<ValueId> {
        self.function_ref(function)?
            .param_values
            .get(index)
            .copied()
            .ok_or(BuildError::InvalidHandle { what: "parameter" })
    }

    fn value_type(&self, value: ValueId) -> IrType {
        self.insert
            .and_then(|at| self.module.functions.get(at.function.0 as usize))
            .and_then(|f| f.value(value))
            .map(|v| v.ty)
            .unwrap_or(IrType::Void)
    }

    fn const_int(&mut self, ty: IrType, value: i64) -> BuildResult<ValueId> {
        if !ty.is_int() {
            return Err(mismatch("const", format!("integer constant of type {}", ty)));
        }
        self.floating(ty, Inst::ConstInt { value })
    }

    fn const_float(&mut self, value: f64) -> BuildResult<ValueId> {
        self.floating(IrType::F64, Inst::ConstFloat { value })
    }

    fn const_string(&mut self, bytes: &[u8]) -> BuildResult<ValueId> {
        let data = match self.strings.get(bytes) {
            Some(id) => *id,
            None => {
                let id = DataId(self.module.data.len() as u32);
                self.module.data.push(bytes.to_vec());
                self.strings.insert(bytes.to_vec(), id);
                id
            }
        };
        self.floating(IrType::Ptr, Inst::DataPtr { data })
    }

    fn binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId, name: &str) -> BuildResult<ValueId> {
        let (lt, rt) = (self.ty(lhs), self.ty(rhs));
        if lt != rt {
            return Err(mismatch(op.name(), format!("{} and {}", lt, rt)));
        }
        let valid = if op.is_float() { lt == IrType::F64 } else { lt.is_int() };
        if !valid {
            return Err(mismatch(op.name(), format!("operands of type {}", lt)));
        }
        self.emit(lt, Inst::Binary { op, lhs, rhs }, name)
    }

    fn compare(&mut self, pred: CmpPredicate, lhs: ValueId, rhs: ValueId, name: &str) -> BuildResult<ValueId> {
        let (lt, rt) = (self.ty(lhs), self.ty(rhs));
        if lt != rt || !(lt.is_int() || lt == IrType::F64) {
            return Err(mismatch("cmp", format!("{} and {}", lt, rt)));
        }
        self.emit(IrType::I1, Inst::Cmp { pred, lhs, rhs }, name)
    }

    fn negate(&mut self, value: ValueId, name: &str) -> BuildResult<ValueId> {
        let ty = self.ty(value);
        if !(ty.is_int() || ty == IrType::F64) {
            return Err(mismatch("neg", format!("operand of type {}", ty)));
        }
        self.emit(ty, Inst::Neg { operand: value }, name)
    }

    fn int_cast(&mut self, value: ValueId, to: IrType, name: &str) -> BuildResult<ValueId> {
        let from = self.ty(value);
        let (Some(from_bits), Some(to_bits)) = (from.bit_width(), to.bit_width()) else {
            return Err(mismatch("cast", format!("{} to {}", from, to)));
        };

        let kind = if from_bits == to_bits {
            return Ok(value);
        } else if from_bits > to_bits {
            CastKind::Trunc
        } else if from == IrType::I1 {
            CastKind::ZExt
        } else {
            CastKind::SExt
        };
        self.emit(to, Inst::Cast { kind, value }, name)
    }

    fn alloca(&mut self, ty: IrType, name: &str) -> BuildResult<ValueId> {
        if ty == IrType::Void {
            return Err(mismatch("alloca", "cell of type void"));
        }
        self.entry_alloca(IrType::Ptr, Inst::Alloca { ty }, name)
    }

    fn alloca_bytes(&mut self, len: u32, name: &str) -> BuildResult<ValueId> {
        self.entry_alloca(IrType::Ptr, Inst::AllocaBytes { len }, name)
    }

    fn load(&mut self, ty: IrType, cell: ValueId, name: &str) -> BuildResult<ValueId> {
        if self.ty(cell) != IrType::Ptr || ty == IrType::Void {
            return Err(mismatch("load", format!("{} from {}", ty, self.ty(cell))));
        }
        self.emit(ty, Inst::Load { cell }, name)
    }

    fn store(&mut self, value: ValueId, cell: ValueId) -> BuildResult<()> {
        let ty = self.ty(value);
        if self.ty(cell) != IrType::Ptr || ty == IrType::Void {
            return Err(mismatch("store", format!("{} into {}", ty, self.ty(cell))));
        }
        self.emit(IrType::Void, Inst::Store { value, cell }, "")?;
        Ok(())
    }

    fn call(&mut self, function: FuncId, args: &[ValueId], name: &str) -> BuildResult<Option<ValueId>> {
        let callee = self.function_ref(function)?;
        if callee.params.len() != args.len() {
            return Err(BuildError::CallArity {
                callee: callee.name.clone(),
                expected: callee.params.len(),
                found: args.len(),
            });
        }
        let (params, ret) = (callee.params.clone(), callee.ret);

        for (index, (arg, expected)) in args.iter().zip(&params).enumerate() {
            let found = self.ty(*arg);
            if found != *expected {
                return Err(mismatch(
                    "call",
                    format!("argument {} is {}, expected {}", index, found, expected),
                ));
            }
        }

        let id = self.emit(
            ret,
            Inst::Call {
                callee: function,
                args: args.to_vec(),
            },
            name,
        )?;
        Ok((ret != IrType::Void).then_some(id))
    }

    fn br(&mut self, target: BlockRef) -> BuildResult<()> {
        let at = self.current()?;
        if at.function != target.function {
            return Err(mismatch("br", "target block in another function"));
        }
        self.emit(IrType::Void, Inst::Br { target: target.block }, "")?;
        Ok(())
    }

    fn cond_br(&mut self, cond: ValueId, then_block: BlockRef, else_block: BlockRef) -> BuildResult<()> {
        let at = self.current()?;
        if at.function != then_block.function || at.function != else_block.function {
            return Err(mismatch("condbr", "target block in another function"));
        }
        if self.ty(cond) != IrType::I1 {
            return Err(mismatch("condbr", format!("condition of type {}", self.ty(cond))));
        }
        self.emit(
            IrType::Void,
            Inst::CondBr {
                cond,
                then_block: then_block.block,
                else_block: else_block.block,
            },
            "",
        )?;
        Ok(())
    }

    fn ret(&mut self, value: Option<ValueId>) -> BuildResult<()> {
        let at = self.current()?;
        let expected = self.function_ref(at.function)?.ret;
        let found = value.map(|v| self.ty(v)).unwrap_or(IrType::Void);
        if found != expected {
            return Err(mismatch("ret", format!("{} from a function returning {}", found, expected)));
        }
        self.emit(IrType::Void, Inst::Ret { value }, "")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_entry(builder: &mut ModuleBuilder, name: &str, ret: IrType) -> (FuncId, BlockRef) {
        let function = builder.declare_function(name, &[IrType::I64], ret).unwrap();
        let entry = builder.append_block(function, "entry").unwrap();
        builder.position_at_end(entry);
        (function, entry)
    }

    #[test]
    fn test_declare_is_idempotent() {
        let mut builder = ModuleBuilder::new("m");
        let a = builder.declare_function("f", &[IrType::I64], IrType::I64).unwrap();
        let b = builder.declare_function("f", &[IrType::I64], IrType::I64).unwrap();
        assert_eq!(a, b);

        let err = builder.declare_function("f", &[], IrType::I64).unwrap_err();
        assert!(matches!(err, BuildError::SignatureConflict { .. }));
        assert!(builder.module().functions[0].is_declaration);
    }

    #[test]
    fn test_allocas_stay_in_entry() {
        let mut builder = ModuleBuilder::new("m");
        let (function, _) = with_entry(&mut builder, "f", IrType::I64);
        let first = builder.alloca(IrType::I64, "a").unwrap();
        let zero = builder.const_int(IrType::I64, 0).unwrap();
        builder.store(zero, first).unwrap();

        let next = builder.append_block(function, "next").unwrap();
        builder.br(next).unwrap();
        builder.position_at_end(next);
        let second = builder.alloca(IrType::I8, "b").unwrap();
        builder.ret(Some(zero)).unwrap();

        let module = builder.finish();
        let f = &module.functions[0];
        assert_eq!(f.blocks[0].insts[0], first);
        assert_eq!(f.blocks[0].insts[1], second);
        assert_eq!(f.blocks[1].insts.len(), 1);
        assert!(f.terminator(BlockId(0)).is_some());
    }

    #[test]
    fn test_terminated_block_rejects_instructions() {
        let mut builder = ModuleBuilder::new("m");
        let (_, entry) = with_entry(&mut builder, "f", IrType::Void);
        builder.ret(None).unwrap();
        assert!(builder.has_terminator(entry));

        let err = builder.ret(None).unwrap_err();
        assert_eq!(
            err,
            BuildError::BlockTerminated {
                block: "entry".to_string()
            }
        );
    }

    #[test]
    fn test_block_names_are_unique() {
        let mut builder = ModuleBuilder::new("m");
        let (function, _) = with_entry(&mut builder, "f", IrType::Void);
        builder.append_block(function, "loop.cond").unwrap();
        builder.append_block(function, "loop.cond").unwrap();
        builder.append_block(function, "loop.cond").unwrap();

        let names: Vec<_> = builder.module().functions[0]
            .blocks
            .iter()
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(names, vec!["entry", "loop.cond", "loop.cond.1", "loop.cond.2"]);
    }

    #[test]
    fn test_block_names_skip_taken_suffixes() {
        let mut builder = ModuleBuilder::new("m");
        let (function, _) = with_entry(&mut builder, "f", IrType::Void);
        builder.append_block(function, "if.then.1").unwrap();
        builder.append_block(function, "if.then").unwrap();
        builder.append_block(function, "if.then").unwrap();
        builder.append_block(function, "if.then").unwrap();

        let (other, _) = with_entry(&mut builder, "g", IrType::Void);
        builder.append_block(other, "if.then").unwrap();

        let names = |index: usize| -> Vec<String> {
            builder.module().functions[index]
                .blocks
                .iter()
                .map(|b| b.name.clone())
                .collect()
        };
        assert_eq!(
            names(0),
            vec!["entry", "if.then.1", "if.then", "if.then.2", "if.then.3"]
        );
        assert_eq!(names(1), vec!["entry", "if.then"]);
    }

    #[test]
    fn test_many_blocks_get_distinct_names() {
        let mut builder = ModuleBuilder::new("m");
        let (function, _) = with_entry(&mut builder, "f", IrType::Void);
        for _ in 0..5000 {
            builder.append_block(function, "if.after").unwrap();
        }

        let blocks = &builder.module().functions[0].blocks;
        assert_eq!(blocks.len(), 5001);
        assert_eq!(blocks[5000].name, "if.after.4999");
        let distinct: HashSet<&str> = blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(distinct.len(), 5001);
    }

    #[test]
    fn test_operand_checks() {
        let mut builder = ModuleBuilder::new("m");
        let (function, entry) = with_entry(&mut builder, "f", IrType::I64);
        let wide = builder.param(function, 0).unwrap();
        let narrow = builder.const_int(IrType::I8, 3).unwrap();

        assert!(builder.binary(BinaryOp::Add, wide, narrow, "").is_err());
        assert!(builder.cond_br(wide, entry, entry).is_err());
        assert!(builder.ret(Some(narrow)).is_err());

        let widened = builder.int_cast(narrow, IrType::I64, "").unwrap();
        let sum = builder.binary(BinaryOp::Add, wide, widened, "sum").unwrap();
        assert_eq!(builder.value_type(sum), IrType::I64);
        assert_eq!(builder.int_cast(sum, IrType::I64, "").unwrap(), sum);

        let err = builder.call(function, &[], "").unwrap_err();
        assert!(matches!(err, BuildError::CallArity { expected: 1, found: 0, .. }));
    }

    #[test]
    fn test_strings_are_shared() {
        let mut builder = ModuleBuilder::new("m");
        with_entry(&mut builder, "f", IrType::Void);
        builder.const_string(b"hi").unwrap();
        builder.const_string(b"hi").unwrap();
        builder.const_string(b" ").unwrap();
        assert_eq!(builder.module().data.len(), 2);
    }

    #[test]
    fn test_no_insert_point() {
        let mut builder = ModuleBuilder::new("m");
        assert_eq!(
            builder.const_int(IrType::I64, 1).unwrap_err(),
            BuildError::NoInsertPoint
        );
    }
}
