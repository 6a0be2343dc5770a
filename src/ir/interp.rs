// This module executes lowered IR directly. It is the reference execution mode used by the
// test suite and by `xic --run`: functions run block by block following their terminators,
// every alloca becomes a slot in a frame-scoped slot stack (released when the frame
// returns), and static strings are read straight out of the module's data table. The two
// runtime externs are implemented natively, and every xi_write call is recorded as a
// (fd, bytes) pair instead of touching the process's file descriptors, so output can be
// asserted exactly. Integer results are normalised to the width of their IR type after
// every operation, division by zero traps, and configurable step and call-depth limits
// turn runaway programs into errors.

//! Reference interpreter for the in-crate IR.

use super::{BinaryOp, BlockId, CastKind, CmpPredicate, DataId, FuncId, Function, Inst, IrType, Module, ValueId};
use crate::runtime::{self, ITOA_SYMBOL, WRITE_SYMBOL};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpConfig {
    /// Instructions executed before giving up.
    pub max_steps: u64,
    pub max_call_depth: usize,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_call_depth: 256,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("Function '{name}' not found")]
    FunctionNotFound { name: String },

    #[error("Function '{name}' expects {expected} arguments, found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Division by zero in '{function}'")]
    DivisionByZero { function: String },

    #[error("Step limit of {limit} instructions exceeded")]
    StepLimit { limit: u64 },

    #[error("Call depth limit of {limit} exceeded")]
    CallDepth { limit: usize },

    #[error("Invalid pointer access in '{function}'")]
    InvalidPointer { function: String },

    #[error("Load from an uninitialized cell in '{function}'")]
    UninitializedLoad { function: String },

    #[error("Block '{block}' in '{function}' has no terminator")]
    MissingTerminator { function: String, block: String },

    #[error("No runtime implementation for extern '{name}'")]
    UnknownExtern { name: String },

    #[error("Malformed IR in '{function}': {detail}")]
    Malformed { function: String, detail: String },
}

type InterpResult<T> = Result<T, InterpError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Data(DataId),
    Slot(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub region: Region,
    pub offset: usize,
}

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtValue {
    Int(i64),
    Float(f64),
    Ptr(Pointer),
    Unit,
}

impl RtValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RtValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// One `xi_write` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub fd: i64,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
enum Slot {
    Cell(Option<RtValue>),
    Bytes(Vec<u8>),
}

fn normalize(ty: IrType, value: i64) -> i64 {
    match ty {
        IrType::I1 => value & 1,
        IrType::I8 => value as i8 as i64,
        _ => value,
    }
}

fn malformed(function: &Function, detail: impl Into<String>) -> InterpError {
    InterpError::Malformed {
        function: function.name.clone(),
        detail: detail.into(),
    }
}

/// Executes functions of one module.
pub struct Interpreter<'m> {
    module: &'m Module,
    config: InterpConfig,
    slots: Vec<Slot>,
    writes: Vec<WriteRecord>,
    steps: u64,
    depth: usize,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self::with_config(module, InterpConfig::default())
    }

    pub fn with_config(module: &'m Module, config: InterpConfig) -> Self {
        Self {
            module,
            config,
            slots: Vec::new(),
            writes: Vec::new(),
            steps: 0,
            depth: 0,
        }
    }

    /// Every write performed so far, in order.
    pub fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    pub fn take_writes(&mut self) -> Vec<WriteRecord> {
        std::mem::take(&mut self.writes)
    }

    /// Concatenated bytes written to `fd`.
    pub fn output(&self, fd: i64) -> Vec<u8> {
        self.writes
            .iter()
            .filter(|w| w.fd == fd)
            .flat_map(|w| w.bytes.iter().copied())
            .collect()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Call `name` with integer arguments.
    pub fn run(&mut self, name: &str, args: &[i64]) -> InterpResult<RtValue> {
        let module = self.module;
        let id = module
            .function_id(name)
            .ok_or_else(|| InterpError::FunctionNotFound {
                name: name.to_string(),
            })?;
        let function = &module.functions[id.0 as usize];

        if function.params.len() != args.len() {
            return Err(InterpError::ArityMismatch {
                name: name.to_string(),
                expected: function.params.len(),
                found: args.len(),
            });
        }

        let mut values = Vec::with_capacity(args.len());
        for (ty, arg) in function.params.iter().zip(args) {
            values.push(match ty {
                IrType::F64 => RtValue::Float(*arg as f64),
                IrType::Ptr => {
                    return Err(InterpError::InvalidPointer {
                        function: name.to_string(),
                    })
                }
                ty => RtValue::Int(normalize(*ty, *arg)),
            });
        }

        log::debug!("interpreting {}({:?})", name, args);
        self.call(id, values)
    }

    /// Call `name` and expect an integer (or no) result.
    pub fn call_int(&mut self, name: &str, args: &[i64]) -> InterpResult<i64> {
        match self.run(name, args)? {
            RtValue::Int(v) => Ok(v),
            RtValue::Unit => Ok(0),
            other => Err(InterpError::Malformed {
                function: name.to_string(),
                detail: format!("non-integer result {:?}", other),
            }),
        }
    }

    fn call(&mut self, id: FuncId, args: Vec<RtValue>) -> InterpResult<RtValue> {
        let module = self.module;
        let function = module
            .function_by_id(id)
            .ok_or_else(|| InterpError::FunctionNotFound {
                name: format!("#{}", id.0),
            })?;

        if function.is_declaration {
            return self.call_extern(function, &args);
        }

        if self.depth >= self.config.max_call_depth {
            return Err(InterpError::CallDepth {
                limit: self.config.max_call_depth,
            });
        }

        self.depth += 1;
        let base = self.slots.len();
        let result = self.execute(function, args);
        self.slots.truncate(base);
        self.depth -= 1;
        result
    }

    fn operand(
        &self,
        function: &Function,
        values: &[Option<RtValue>],
        id: ValueId,
    ) -> InterpResult<RtValue> {
        let value = function
            .value(id)
            .ok_or_else(|| malformed(function, format!("unknown value %{}", id.0)))?;
        match value.inst {
            Inst::ConstInt { value: v } => Ok(RtValue::Int(normalize(value.ty, v))),
            Inst::ConstFloat { value: v } => Ok(RtValue::Float(v)),
            Inst::DataPtr { data } => Ok(RtValue::Ptr(Pointer {
                region: Region::Data(data),
                offset: 0,
            })),
            _ => values
                .get(id.0 as usize)
                .copied()
                .flatten()
                .ok_or_else(|| malformed(function, format!("use of undefined value %{}", id.0))),
        }
    }

    fn int(&self, function: &Function, values: &[Option<RtValue>], id: ValueId) -> InterpResult<i64> {
        match self.operand(function, values, id)? {
            RtValue::Int(v) => Ok(v),
            other => Err(malformed(function, format!("expected integer, found {:?}", other))),
        }
    }

    fn float(&self, function: &Function, values: &[Option<RtValue>], id: ValueId) -> InterpResult<f64> {
        match self.operand(function, values, id)? {
            RtValue::Float(v) => Ok(v),
            other => Err(malformed(function, format!("expected double, found {:?}", other))),
        }
    }

    fn pointer(&self, function: &Function, values: &[Option<RtValue>], id: ValueId) -> InterpResult<Pointer> {
        match self.operand(function, values, id)? {
            RtValue::Ptr(p) => Ok(p),
            _ => Err(InterpError::InvalidPointer {
                function: function.name.clone(),
            }),
        }
    }

    fn execute(&mut self, function: &'m Function, args: Vec<RtValue>) -> InterpResult<RtValue> {
        let mut values: Vec<Option<RtValue>> = vec![None; function.values.len()];
        for (id, arg) in function.param_values.iter().zip(args) {
            values[id.0 as usize] = Some(arg);
        }

        let mut block = BlockId(0);
        loop {
            let current = function
                .block(block)
                .ok_or_else(|| malformed(function, format!("unknown block {}", block.0)))?;

            let mut next = None;
            for &id in &current.insts {
                self.steps += 1;
                if self.steps > self.config.max_steps {
                    return Err(InterpError::StepLimit {
                        limit: self.config.max_steps,
                    });
                }

                let value = function
                    .value(id)
                    .ok_or_else(|| malformed(function, format!("unknown value %{}", id.0)))?;

                let result = match &value.inst {
                    Inst::Param { .. }
                    | Inst::ConstInt { .. }
                    | Inst::ConstFloat { .. }
                    | Inst::DataPtr { .. } => self.operand(function, &values, id)?,
                    Inst::Binary { op, lhs, rhs } => {
                        self.binary(function, &values, value.ty, *op, *lhs, *rhs)?
                    }
                    Inst::Cmp { pred, lhs, rhs } => {
                        let l = self.operand(function, &values, *lhs)?;
                        let r = self.operand(function, &values, *rhs)?;
                        let ordering = match (l, r) {
                            (RtValue::Int(a), RtValue::Int(b)) => a.partial_cmp(&b),
                            (RtValue::Float(a), RtValue::Float(b)) => a.partial_cmp(&b),
                            _ => return Err(malformed(function, "comparison of mixed operands")),
                        };
                        RtValue::Int(compare(*pred, ordering) as i64)
                    }
                    Inst::Neg { operand } => match self.operand(function, &values, *operand)? {
                        RtValue::Int(v) => RtValue::Int(normalize(value.ty, v.wrapping_neg())),
                        RtValue::Float(v) => RtValue::Float(-v),
                        _ => return Err(malformed(function, "negation of a non-number")),
                    },
                    Inst::Cast { kind, value: inner } => {
                        let from = function.value(*inner).map(|v| v.ty).unwrap_or(IrType::Void);
                        let v = self.int(function, &values, *inner)?;
                        let widened = match (kind, from) {
                            (CastKind::ZExt, IrType::I1) => v & 1,
                            (CastKind::ZExt, IrType::I8) => v as u8 as i64,
                            (CastKind::SExt, IrType::I1) => -(v & 1),
                            _ => v,
                        };
                        RtValue::Int(normalize(value.ty, widened))
                    }
                    Inst::Alloca { .. } => self.push_slot(Slot::Cell(None)),
                    Inst::AllocaBytes { len } => self.push_slot(Slot::Bytes(vec![0; *len as usize])),
                    Inst::Load { cell } => {
                        let pointer = self.pointer(function, &values, *cell)?;
                        match (pointer.region, pointer.offset) {
                            (Region::Slot(index), 0) => match self.slots.get(index) {
                                Some(Slot::Cell(Some(v))) => *v,
                                Some(Slot::Cell(None)) => {
                                    return Err(InterpError::UninitializedLoad {
                                        function: function.name.clone(),
                                    })
                                }
                                _ => {
                                    return Err(InterpError::InvalidPointer {
                                        function: function.name.clone(),
                                    })
                                }
                            },
                            _ => {
                                return Err(InterpError::InvalidPointer {
                                    function: function.name.clone(),
                                })
                            }
                        }
                    }
                    Inst::Store { value: stored, cell } => {
                        let v = self.operand(function, &values, *stored)?;
                        let pointer = self.pointer(function, &values, *cell)?;
                        match (pointer.region, pointer.offset) {
                            (Region::Slot(index), 0) => match self.slots.get_mut(index) {
                                Some(Slot::Cell(slot)) => *slot = Some(v),
                                _ => {
                                    return Err(InterpError::InvalidPointer {
                                        function: function.name.clone(),
                                    })
                                }
                            },
                            _ => {
                                return Err(InterpError::InvalidPointer {
                                    function: function.name.clone(),
                                })
                            }
                        }
                        RtValue::Unit
                    }
                    Inst::Call { callee, args } => {
                        let mut actuals = Vec::with_capacity(args.len());
                        for arg in args {
                            actuals.push(self.operand(function, &values, *arg)?);
                        }
                        self.call(*callee, actuals)?
                    }
                    Inst::Br { target } => {
                        next = Some(*target);
                        break;
                    }
                    Inst::CondBr {
                        cond,
                        then_block,
                        else_block,
                    } => {
                        let taken = self.int(function, &values, *cond)? != 0;
                        next = Some(if taken { *then_block } else { *else_block });
                        break;
                    }
                    Inst::Ret { value: ret } => {
                        return match ret {
                            Some(v) => self.operand(function, &values, *v),
                            None => Ok(RtValue::Unit),
                        };
                    }
                };
                values[id.0 as usize] = Some(result);
            }

            match next {
                Some(target) => block = target,
                None => {
                    return Err(InterpError::MissingTerminator {
                        function: function.name.clone(),
                        block: current.name.clone(),
                    })
                }
            }
        }
    }

    fn binary(
        &self,
        function: &Function,
        values: &[Option<RtValue>],
        ty: IrType,
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    ) -> InterpResult<RtValue> {
        if op.is_float() {
            let (l, r) = (self.float(function, values, lhs)?, self.float(function, values, rhs)?);
            return Ok(RtValue::Float(match op {
                BinaryOp::FAdd => l + r,
                BinaryOp::FSub => l - r,
                BinaryOp::FMul => l * r,
                _ => l / r,
            }));
        }

        let (l, r) = (self.int(function, values, lhs)?, self.int(function, values, rhs)?);
        if matches!(op, BinaryOp::SDiv | BinaryOp::SRem) && r == 0 {
            return Err(InterpError::DivisionByZero {
                function: function.name.clone(),
            });
        }
        let result = match op {
            BinaryOp::Add => l.wrapping_add(r),
            BinaryOp::Sub => l.wrapping_sub(r),
            BinaryOp::Mul => l.wrapping_mul(r),
            BinaryOp::SDiv => l.wrapping_div(r),
            BinaryOp::SRem => l.wrapping_rem(r),
            BinaryOp::And => l & r,
            _ => l | r,
        };
        Ok(RtValue::Int(normalize(ty, result)))
    }

    fn push_slot(&mut self, slot: Slot) -> RtValue {
        self.slots.push(slot);
        RtValue::Ptr(Pointer {
            region: Region::Slot(self.slots.len() - 1),
            offset: 0,
        })
    }

    fn read_bytes(&self, pointer: Pointer, len: usize) -> Option<Vec<u8>> {
        let end = pointer.offset.checked_add(len)?;
        let bytes = match pointer.region {
            Region::Data(data) => self.module.data.get(data.0 as usize)?.get(pointer.offset..end)?,
            Region::Slot(index) => match self.slots.get(index)? {
                Slot::Bytes(buffer) => buffer.get(pointer.offset..end)?,
                Slot::Cell(_) => return None,
            },
        };
        Some(bytes.to_vec())
    }

    fn call_extern(&mut self, function: &Function, args: &[RtValue]) -> InterpResult<RtValue> {
        let invalid = || InterpError::InvalidPointer {
            function: function.name.clone(),
        };

        match (function.name.as_str(), args) {
            (ITOA_SYMBOL, [RtValue::Int(value), RtValue::Ptr(pointer)]) => {
                let Region::Slot(index) = pointer.region else {
                    return Err(invalid());
                };
                match self.slots.get_mut(index) {
                    Some(Slot::Bytes(buffer)) if pointer.offset <= buffer.len() => {
                        let len = runtime::itoa(*value, &mut buffer[pointer.offset..]);
                        Ok(RtValue::Int(len as i64))
                    }
                    _ => Err(invalid()),
                }
            }
            (WRITE_SYMBOL, [RtValue::Int(fd), RtValue::Ptr(pointer), RtValue::Int(len)]) => {
                let len = usize::try_from(*len).map_err(|_| invalid())?;
                let bytes = self.read_bytes(*pointer, len).ok_or_else(invalid)?;
                log::trace!("write fd={} {:?}", fd, String::from_utf8_lossy(&bytes));
                self.writes.push(WriteRecord { fd: *fd, bytes });
                Ok(RtValue::Int(len as i64))
            }
            (ITOA_SYMBOL | WRITE_SYMBOL, _) => Err(malformed(function, "bad runtime call arguments")),
            (name, _) => Err(InterpError::UnknownExtern {
                name: name.to_string(),
            }),
        }
    }
}

fn compare(pred: CmpPredicate, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    match (pred, ordering) {
        (CmpPredicate::Ne, None) => true,
        (_, None) => false,
        (CmpPredicate::Eq, Some(o)) => o == Equal,
        (CmpPredicate::Ne, Some(o)) => o != Equal,
        (CmpPredicate::Slt, Some(o)) => o == Less,
        (CmpPredicate::Sle, Some(o)) => o != Greater,
        (CmpPredicate::Sgt, Some(o)) => o == Greater,
        (CmpPredicate::Sge, Some(o)) => o != Less,
    }
}
