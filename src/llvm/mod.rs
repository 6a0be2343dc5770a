// This module implements the IrBuilder contract over inkwell so the same lowering pass can
// produce a real LLVM module. Handles map one to one: values are BasicValueEnum, blocks are
// BasicBlock, functions are FunctionValue. The builder keeps the checks the in-crate
// ModuleBuilder makes (matching operand types, no instruction after a terminator, stack
// cells in the entry block) so both backends reject the same malformed lowering. Static
// strings become private constant globals without a terminator, matching the
// length-carrying write primitive of the runtime. Only compiled with the `llvm` feature.

//! LLVM backend for the IR-builder contract.

use crate::ir::{BinaryOp, BuildError, BuildResult, CmpPredicate, IrBuilder, IrType};
use hashbrown::HashMap;
use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType};
use inkwell::values::{BasicMetadataValueEnum, BasicValue, BasicValueEnum, FunctionValue};
use inkwell::{AddressSpace, FloatPredicate, IntPredicate};

fn backend(err: impl std::fmt::Display) -> BuildError {
    BuildError::Backend {
        reason: err.to_string(),
    }
}

fn mismatch(op: &'static str, detail: impl Into<String>) -> BuildError {
    BuildError::OperandMismatch {
        op,
        detail: detail.into(),
    }
}

/// Builds an LLVM module through inkwell.
pub struct LlvmBuilder<'ctx> {
    context: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,
    /// Return type of each declared function, by name.
    returns: HashMap<String, IrType>,
    strings: HashMap<Vec<u8>, BasicValueEnum<'ctx>>,
}

impl<'ctx> LlvmBuilder<'ctx> {
    pub fn new(context: &'ctx Context, name: &str) -> Self {
        Self {
            context,
            module: context.create_module(name),
            builder: context.create_builder(),
            returns: HashMap::new(),
            strings: HashMap::new(),
        }
    }

    pub fn module(&self) -> &Module<'ctx> {
        &self.module
    }

    pub fn into_module(self) -> Module<'ctx> {
        self.module
    }

    /// Textual LLVM IR of the module.
    pub fn print(&self) -> String {
        self.module.print_to_string().to_string()
    }

    pub fn verify(&self) -> BuildResult<()> {
        self.module.verify().map_err(backend)
    }

    fn basic_type(&self, ty: IrType) -> BuildResult<BasicTypeEnum<'ctx>> {
        Ok(match ty {
            IrType::I1 => self.context.bool_type().into(),
            IrType::I8 => self.context.i8_type().into(),
            IrType::I64 => self.context.i64_type().into(),
            IrType::F64 => self.context.f64_type().into(),
            IrType::Ptr => self.context.ptr_type(AddressSpace::default()).into(),
            IrType::Void => return Err(mismatch("type", "void is not a value type")),
        })
    }

    fn function_type(&self, params: &[IrType], ret: IrType) -> BuildResult<FunctionType<'ctx>> {
        let params = params
            .iter()
            .map(|ty| self.basic_type(*ty).map(BasicMetadataTypeEnum::from))
            .collect::<BuildResult<Vec<_>>>()?;
        Ok(match ret {
            IrType::Void => self.context.void_type().fn_type(&params, false),
            ty => self.basic_type(ty)?.fn_type(&params, false),
        })
    }

    fn current(&self) -> BuildResult<BasicBlock<'ctx>> {
        self.builder.get_insert_block().ok_or(BuildError::NoInsertPoint)
    }

    /// Insertion point for a new instruction.
    fn ready(&self) -> BuildResult<()> {
        let block = self.current()?;
        if block.get_terminator().is_some() {
            return Err(BuildError::BlockTerminated {
                block: block.get_name().to_string_lossy().into_owned(),
            });
        }
        Ok(())
    }

    fn current_return(&self) -> BuildResult<IrType> {
        let function = self
            .current()?
            .get_parent()
            .ok_or(BuildError::InvalidHandle { what: "function" })?;
        let name = function.get_name().to_string_lossy();
        self.returns
            .get(name.as_ref())
            .copied()
            .ok_or(BuildError::InvalidHandle { what: "function" })
    }

    /// Build a stack slot of `ty` at the top of the entry block.
    fn entry_alloca(&self, ty: BasicTypeEnum<'ctx>, name: &str) -> BuildResult<BasicValueEnum<'ctx>> {
        let entry = self
            .current()?
            .get_parent()
            .and_then(|function| function.get_first_basic_block())
            .ok_or(BuildError::InvalidHandle { what: "block" })?;

        let builder = self.context.create_builder();
        match entry.get_first_instruction() {
            Some(first) => builder.position_before(&first),
            None => builder.position_at_end(entry),
        }
        Ok(builder.build_alloca(ty, name).map_err(backend)?.into())
    }
}

impl<'ctx> IrBuilder for LlvmBuilder<'ctx> {
    type Value = BasicValueEnum<'ctx>;
    type Block = BasicBlock<'ctx>;
    type Function = FunctionValue<'ctx>;

    fn set_module_name(&mut self, name: &str) {
        self.module.set_name(name);
    }

    fn declare_function(
        &mut self,
        name: &str,
        params: &[IrType],
        ret: IrType,
    ) -> BuildResult<FunctionValue<'ctx>> {
        let fn_type = self.function_type(params, ret)?;
        if let Some(existing) = self.module.get_function(name) {
            if existing.get_type() == fn_type {
                return Ok(existing);
            }
            return Err(BuildError::SignatureConflict {
                name: name.to_string(),
            });
        }

        let function = self.module.add_function(name, fn_type, None);
        self.returns.insert(name.to_string(), ret);
        log::debug!("declared llvm function {}", name);
        Ok(function)
    }

    fn append_block(&mut self, function: FunctionValue<'ctx>, name: &str) -> BuildResult<BasicBlock<'ctx>> {
        Ok(self.context.append_basic_block(function, name))
    }

    fn position_at_end(&mut self, block: BasicBlock<'ctx>) {
        self.builder.position_at_end(block);
    }

    fn insert_block(&self) -> Option<BasicBlock<'ctx>> {
        self.builder.get_insert_block()
    }

    fn has_terminator(&self, block: BasicBlock<'ctx>) -> bool {
        block.get_terminator().is_some()
    }

    fn param(&self, function: FunctionValue<'ctx>, index: usize) -> BuildResult<BasicValueEnum<'ctx>> {
        function
            .get_nth_param(index as u32)
            .ok_or(BuildError::InvalidHandle { what: "parameter" })
    }

    fn value_type(&self, value: BasicValueEnum<'ctx>) -> IrType {
        match value {
            BasicValueEnum::IntValue(v) => match v.get_type().get_bit_width() {
                1 => IrType::I1,
                8 => IrType::I8,
                _ => IrType::I64,
            },
            BasicValueEnum::FloatValue(_) => IrType::F64,
            BasicValueEnum::PointerValue(_) => IrType::Ptr,
            _ => IrType::Void,
        }
    }

    fn const_int(&mut self, ty: IrType, value: i64) -> BuildResult<BasicValueEnum<'ctx>> {
        match self.basic_type(ty)? {
            BasicTypeEnum::IntType(int) => Ok(int.const_int(value as u64, true).into()),
            _ => Err(mismatch("const", format!("integer constant of type {}", ty))),
        }
    }

    fn const_float(&mut self, value: f64) -> BuildResult<BasicValueEnum<'ctx>> {
        Ok(self.context.f64_type().const_float(value).into())
    }

    fn const_string(&mut self, bytes: &[u8]) -> BuildResult<BasicValueEnum<'ctx>> {
        if let Some(existing) = self.strings.get(bytes) {
            return Ok(*existing);
        }
        let data = self.context.const_string(bytes, false);
        let name = format!(".str.{}", self.strings.len());
        let global = self.module.add_global(data.get_type(), None, &name);
        global.set_initializer(&data);
        global.set_constant(true);
        global.set_linkage(Linkage::Private);

        let pointer: BasicValueEnum<'ctx> = global.as_pointer_value().into();
        self.strings.insert(bytes.to_vec(), pointer);
        Ok(pointer)
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: BasicValueEnum<'ctx>,
        rhs: BasicValueEnum<'ctx>,
        name: &str,
    ) -> BuildResult<BasicValueEnum<'ctx>> {
        self.ready()?;
        let b = &self.builder;
        match (lhs, rhs) {
            (BasicValueEnum::IntValue(l), BasicValueEnum::IntValue(r))
                if !op.is_float() && l.get_type() == r.get_type() =>
            {
                let value = match op {
                    BinaryOp::Add => b.build_int_add(l, r, name),
                    BinaryOp::Sub => b.build_int_sub(l, r, name),
                    BinaryOp::Mul => b.build_int_mul(l, r, name),
                    BinaryOp::SDiv => b.build_int_signed_div(l, r, name),
                    BinaryOp::SRem => b.build_int_signed_rem(l, r, name),
                    BinaryOp::And => b.build_and(l, r, name),
                    _ => b.build_or(l, r, name),
                };
                Ok(value.map_err(backend)?.into())
            }
            (BasicValueEnum::FloatValue(l), BasicValueEnum::FloatValue(r)) if op.is_float() => {
                let value = match op {
                    BinaryOp::FAdd => b.build_float_add(l, r, name),
                    BinaryOp::FSub => b.build_float_sub(l, r, name),
                    BinaryOp::FMul => b.build_float_mul(l, r, name),
                    _ => b.build_float_div(l, r, name),
                };
                Ok(value.map_err(backend)?.into())
            }
            _ => Err(mismatch(
                op.name(),
                format!("{} and {}", self.value_type(lhs), self.value_type(rhs)),
            )),
        }
    }

    fn compare(
        &mut self,
        pred: CmpPredicate,
        lhs: BasicValueEnum<'ctx>,
        rhs: BasicValueEnum<'ctx>,
        name: &str,
    ) -> BuildResult<BasicValueEnum<'ctx>> {
        self.ready()?;
        match (lhs, rhs) {
            (BasicValueEnum::IntValue(l), BasicValueEnum::IntValue(r)) if l.get_type() == r.get_type() => {
                let predicate = match pred {
                    CmpPredicate::Eq => IntPredicate::EQ,
                    CmpPredicate::Ne => IntPredicate::NE,
                    CmpPredicate::Slt => IntPredicate::SLT,
                    CmpPredicate::Sle => IntPredicate::SLE,
                    CmpPredicate::Sgt => IntPredicate::SGT,
                    CmpPredicate::Sge => IntPredicate::SGE,
                };
                Ok(self
                    .builder
                    .build_int_compare(predicate, l, r, name)
                    .map_err(backend)?
                    .into())
            }
            (BasicValueEnum::FloatValue(l), BasicValueEnum::FloatValue(r)) => {
                let predicate = match pred {
                    CmpPredicate::Eq => FloatPredicate::OEQ,
                    CmpPredicate::Ne => FloatPredicate::ONE,
                    CmpPredicate::Slt => FloatPredicate::OLT,
                    CmpPredicate::Sle => FloatPredicate::OLE,
                    CmpPredicate::Sgt => FloatPredicate::OGT,
                    CmpPredicate::Sge => FloatPredicate::OGE,
                };
                Ok(self
                    .builder
                    .build_float_compare(predicate, l, r, name)
                    .map_err(backend)?
                    .into())
            }
            _ => Err(mismatch(
                "cmp",
                format!("{} and {}", self.value_type(lhs), self.value_type(rhs)),
            )),
        }
    }

    fn negate(&mut self, value: BasicValueEnum<'ctx>, name: &str) -> BuildResult<BasicValueEnum<'ctx>> {
        self.ready()?;
        match value {
            BasicValueEnum::IntValue(v) => Ok(self.builder.build_int_neg(v, name).map_err(backend)?.into()),
            BasicValueEnum::FloatValue(v) => Ok(self.builder.build_float_neg(v, name).map_err(backend)?.into()),
            other => Err(mismatch("neg", format!("operand of type {}", self.value_type(other)))),
        }
    }

    fn int_cast(&mut self, value: BasicValueEnum<'ctx>, to: IrType, name: &str) -> BuildResult<BasicValueEnum<'ctx>> {
        let (BasicValueEnum::IntValue(v), BasicTypeEnum::IntType(target)) = (value, self.basic_type(to)?) else {
            return Err(mismatch("cast", format!("{} to {}", self.value_type(value), to)));
        };

        let (from_bits, to_bits) = (v.get_type().get_bit_width(), target.get_bit_width());
        if from_bits == to_bits {
            return Ok(value);
        }
        self.ready()?;
        let cast = if from_bits > to_bits {
            self.builder.build_int_truncate(v, target, name)
        } else if from_bits == 1 {
            self.builder.build_int_z_extend(v, target, name)
        } else {
            self.builder.build_int_s_extend(v, target, name)
        };
        Ok(cast.map_err(backend)?.into())
    }

    fn alloca(&mut self, ty: IrType, name: &str) -> BuildResult<BasicValueEnum<'ctx>> {
        let ty = self.basic_type(ty)?;
        self.entry_alloca(ty, name)
    }

    fn alloca_bytes(&mut self, len: u32, name: &str) -> BuildResult<BasicValueEnum<'ctx>> {
        let ty = self.context.i8_type().array_type(len).as_basic_type_enum();
        self.entry_alloca(ty, name)
    }

    fn load(&mut self, ty: IrType, cell: BasicValueEnum<'ctx>, name: &str) -> BuildResult<BasicValueEnum<'ctx>> {
        self.ready()?;
        let BasicValueEnum::PointerValue(pointer) = cell else {
            return Err(mismatch("load", format!("{} from {}", ty, self.value_type(cell))));
        };
        let ty = self.basic_type(ty)?;
        self.builder.build_load(ty, pointer, name).map_err(backend)
    }

    fn store(&mut self, value: BasicValueEnum<'ctx>, cell: BasicValueEnum<'ctx>) -> BuildResult<()> {
        self.ready()?;
        let BasicValueEnum::PointerValue(pointer) = cell else {
            return Err(mismatch("store", format!("into {}", self.value_type(cell))));
        };
        self.builder.build_store(pointer, value).map_err(backend)?;
        Ok(())
    }

    fn call(
        &mut self,
        function: FunctionValue<'ctx>,
        args: &[BasicValueEnum<'ctx>],
        name: &str,
    ) -> BuildResult<Option<BasicValueEnum<'ctx>>> {
        self.ready()?;
        let expected = function.count_params() as usize;
        if expected != args.len() {
            return Err(BuildError::CallArity {
                callee: function.get_name().to_string_lossy().into_owned(),
                expected,
                found: args.len(),
            });
        }

        for (index, (arg, param)) in args.iter().zip(function.get_param_iter()).enumerate() {
            if arg.get_type() != param.get_type() {
                return Err(mismatch(
                    "call",
                    format!(
                        "argument {} is {}, expected {}",
                        index,
                        self.value_type(*arg),
                        self.value_type(param)
                    ),
                ));
            }
        }

        let args: Vec<BasicMetadataValueEnum<'ctx>> = args.iter().map(|a| (*a).into()).collect();
        let call = self.builder.build_call(function, &args, name).map_err(backend)?;
        Ok(call.try_as_basic_value().left())
    }

    fn br(&mut self, target: BasicBlock<'ctx>) -> BuildResult<()> {
        self.ready()?;
        self.builder.build_unconditional_branch(target).map_err(backend)?;
        Ok(())
    }

    fn cond_br(
        &mut self,
        cond: BasicValueEnum<'ctx>,
        then_block: BasicBlock<'ctx>,
        else_block: BasicBlock<'ctx>,
    ) -> BuildResult<()> {
        self.ready()?;
        match cond {
            BasicValueEnum::IntValue(v) if v.get_type().get_bit_width() == 1 => {
                self.builder
                    .build_conditional_branch(v, then_block, else_block)
                    .map_err(backend)?;
                Ok(())
            }
            other => Err(mismatch(
                "condbr",
                format!("condition of type {}", self.value_type(other)),
            )),
        }
    }

    fn ret(&mut self, value: Option<BasicValueEnum<'ctx>>) -> BuildResult<()> {
        self.ready()?;
        let expected = self.current_return()?;
        let found = value.map(|v| self.value_type(v)).unwrap_or(IrType::Void);
        if found != expected {
            return Err(mismatch(
                "ret",
                format!("{} from a function returning {}", found, expected),
            ));
        }

        match value {
            Some(v) => self.builder.build_return(Some(&v as &dyn BasicValue<'ctx>)),
            None => self.builder.build_return(None),
        }
        .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::codegen::lower;
    use crate::diagnostics::Diagnostics;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    #[test]
    fn test_lowering_into_llvm() {
        let source = "
            fn add(a: int, b: int) int { return a + b; }
            loop (i = 0; i < 3) : (i++) { println(1, add(i, 1)); }
        ";
        let arena = Arena::new();
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize(source, "llvm.xi", &mut diagnostics);
        let program = parse(&tokens, &arena, "llvm.xi", &mut diagnostics).unwrap();

        let context = Context::create();
        let mut builder = LlvmBuilder::new(&context, "llvm");
        lower(&program, &mut builder).unwrap();
        builder.verify().unwrap();

        let text = builder.print();
        assert!(text.contains("define i64 @add(i64 %0, i64 %1)"));
        assert!(text.contains("declare i64 @xi_write(i64, ptr, i64)"));
        assert!(text.contains("loop.cond:"));
    }
}
