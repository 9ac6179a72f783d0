//! Reference interpreter over the SSA graph.
//!
//! Executes a graph directly, before or after optimization, so that the
//! two can be compared. Arithmetic goes through the same evaluation
//! routines as constant folding.
//!
//! ```text
//! enter B0 ──► instructions in order ──► terminator
//!                    │                      │
//!                    ▼                      ▼
//!            Throw / Deoptimize     Jump(B) ─► phis of B ─► ...
//!                                   Return ─► Outcome::Return
//! ```
//!
//! Malformed graphs and exhausted fuel surface as [`InterpError`]; the
//! interpreter never panics.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ir::cfg::BlockId;
use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::{
    BinaryOp, CondKind, DataProcKind, DeoptimizationKind, Intrinsic, InvokeTarget, Operator,
    ShifterOpKind, ShifterOperation,
};
use crate::ir::types::DataType;
use crate::opt::fold::evaluation::{
    eval_binary, eval_compare, eval_condition, eval_conversion, eval_unary, ConstValue,
};

/// Default step budget of one run.
pub const DEFAULT_FUEL: u64 = 1 << 24;

// =============================================================================
// Values
// =============================================================================

/// Handle of an array in the interpreter heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayRef(u32);

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Array(ArrayRef),
}

impl Value {
    /// Zero of a type, as stored in fresh arrays.
    pub fn zero(ty: DataType) -> Value {
        match ty {
            DataType::Int64 => Value::Long(0),
            DataType::Float32 => Value::Float(0.0),
            DataType::Float64 => Value::Double(0.0),
            DataType::Reference => Value::Null,
            _ => Value::Int(0),
        }
    }

    #[inline]
    fn to_const(self) -> Option<ConstValue> {
        Some(match self {
            Value::Int(v) => ConstValue::Int(v),
            Value::Long(v) => ConstValue::Long(v),
            Value::Float(v) => ConstValue::Float(v),
            Value::Double(v) => ConstValue::Double(v),
            Value::Null => ConstValue::Null,
            Value::Array(_) => return None,
        })
    }

    #[inline]
    fn as_i64(self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(v as i64),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }
}

impl From<ConstValue> for Value {
    fn from(value: ConstValue) -> Self {
        match value {
            ConstValue::Int(v) => Value::Int(v),
            ConstValue::Long(v) => Value::Long(v),
            ConstValue::Float(v) => Value::Float(v),
            ConstValue::Double(v) => Value::Double(v),
            ConstValue::Null => Value::Null,
        }
    }
}

/// Array storage. Slots never written read as the zero of the load type.
#[derive(Debug, Default, Clone)]
pub struct Heap {
    arrays: Vec<Vec<Option<Value>>>,
}

impl Heap {
    /// Allocate an array holding `values`.
    pub fn alloc(&mut self, values: impl IntoIterator<Item = Value>) -> Value {
        self.arrays.push(values.into_iter().map(Some).collect());
        Value::Array(ArrayRef(self.arrays.len() as u32 - 1))
    }

    /// Allocate `length` unwritten slots.
    pub fn alloc_zeroed(&mut self, length: usize) -> Value {
        self.arrays.push(vec![None; length]);
        Value::Array(ArrayRef(self.arrays.len() as u32 - 1))
    }

    #[inline]
    pub fn len(&self, array: ArrayRef) -> Option<usize> {
        self.arrays.get(array.0 as usize).map(Vec::len)
    }

    /// Element `index` read as `ty`.
    pub fn get(&self, array: ArrayRef, index: usize, ty: DataType) -> Option<Value> {
        let slot = self.arrays.get(array.0 as usize)?.get(index)?;
        Some(slot.unwrap_or_else(|| Value::zero(ty)))
    }

    pub fn set(&mut self, array: ArrayRef, index: usize, value: Value) -> Option<()> {
        let slot = self.arrays.get_mut(array.0 as usize)?.get_mut(index)?;
        *slot = Some(value);
        Some(())
    }

    /// Elements of an array, unwritten slots as `ty` zeros.
    pub fn contents(&self, array: ArrayRef, ty: DataType) -> Option<Vec<Value>> {
        let slots = self.arrays.get(array.0 as usize)?;
        Some(slots.iter().map(|s| s.unwrap_or_else(|| Value::zero(ty))).collect())
    }
}

// =============================================================================
// Outcomes and Errors
// =============================================================================

/// Exception raised by a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrowKind {
    ArrayIndexOutOfBounds,
    NullPointer,
    Arithmetic,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// `None` for void methods.
    Return(Option<Value>),
    Throw(ThrowKind),
    /// A deoptimization guard fired.
    Deoptimize(DeoptimizationKind),
}

/// The graph could not be executed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpError {
    #[error("expected {expected} arguments, got {found}")]
    Arity { expected: usize, found: usize },

    #[error("step limit of {0} exhausted")]
    OutOfFuel(u64),

    #[error("{inst:?} uses a value that was never computed")]
    Undefined { inst: InstId },

    #[error("{inst:?} ({op}) got operands it cannot evaluate")]
    BadOperands { inst: InstId, op: &'static str },

    #[error("block {0:?} does not end in a terminator")]
    NoTerminator(BlockId),

    #[error("no handler for call to {0}")]
    UnhandledInvoke(String),

    /// An array access no bounds check protected went out of range.
    #[error("{inst:?} accessed index {index} of an array of length {length} unchecked")]
    UncheckedAccess { inst: InstId, index: i32, length: usize },

    /// An array access no null check protected reached a null reference.
    #[error("{inst:?} dereferenced null unchecked")]
    UncheckedNull { inst: InstId },
}

// =============================================================================
// Invoke Handling
// =============================================================================

/// Executes calls to non-intrinsic methods.
pub trait InvokeHandler {
    fn invoke(
        &mut self,
        target: &InvokeTarget,
        args: &[Value],
    ) -> Result<Option<Value>, InterpError>;
}

impl<F> InvokeHandler for F
where
    F: FnMut(&InvokeTarget, &[Value]) -> Result<Option<Value>, InterpError>,
{
    fn invoke(
        &mut self,
        target: &InvokeTarget,
        args: &[Value],
    ) -> Result<Option<Value>, InterpError> {
        self(target, args)
    }
}

/// Rejects every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInvokes;

impl InvokeHandler for NoInvokes {
    fn invoke(
        &mut self,
        target: &InvokeTarget,
        _args: &[Value],
    ) -> Result<Option<Value>, InterpError> {
        Err(InterpError::UnhandledInvoke(format!("{}.{}", target.class, target.method)))
    }
}

fn eval_intrinsic(intrinsic: Intrinsic, args: &[Value]) -> Option<Value> {
    let distance = match args.get(1)? {
        Value::Int(d) => *d as u32,
        _ => return None,
    };
    Some(match (intrinsic, args.first()?) {
        (Intrinsic::IntegerRotateRight, Value::Int(v)) => Value::Int(v.rotate_right(distance & 31)),
        (Intrinsic::IntegerRotateLeft, Value::Int(v)) => Value::Int(v.rotate_left(distance & 31)),
        (Intrinsic::LongRotateRight, Value::Long(v)) => Value::Long(v.rotate_right(distance & 63)),
        (Intrinsic::LongRotateLeft, Value::Long(v)) => Value::Long(v.rotate_left(distance & 63)),
        _ => return None,
    })
}

/// `left <op> shifted(source)` at the width of `ty`.
fn eval_shifter_op(op: ShifterOperation, ty: DataType, left: i64, source: i64) -> Option<Value> {
    let wide = match ty {
        DataType::Int64 => true,
        DataType::Int32 => false,
        _ => return None,
    };
    let shift = op.shift;
    let operand = match op.op_kind {
        ShifterOpKind::Lsl if wide => source.wrapping_shl(shift),
        ShifterOpKind::Lsl => (source as i32).wrapping_shl(shift) as i64,
        ShifterOpKind::Lsr if wide => (source as u64).wrapping_shr(shift) as i64,
        ShifterOpKind::Lsr => (source as u32).wrapping_shr(shift) as i32 as i64,
        ShifterOpKind::Asr if wide => source.wrapping_shr(shift),
        ShifterOpKind::Asr => (source as i32).wrapping_shr(shift) as i64,
        ShifterOpKind::Uxtb => source as u8 as i64,
        ShifterOpKind::Uxth => source as u16 as i64,
        ShifterOpKind::Uxtw => source as u32 as i64,
        ShifterOpKind::Sxtb => source as i8 as i64,
        ShifterOpKind::Sxth => source as i16 as i64,
        ShifterOpKind::Sxtw => source as i32 as i64,
    };
    let result = match op.kind {
        DataProcKind::Add => left.wrapping_add(operand),
        DataProcKind::Sub => left.wrapping_sub(operand),
        DataProcKind::And => left & operand,
        DataProcKind::Or => left | operand,
        DataProcKind::Xor => left ^ operand,
        DataProcKind::Neg => operand.wrapping_neg(),
    };
    Some(if wide {
        Value::Long(result)
    } else {
        Value::Int(result as i32)
    })
}

// =============================================================================
// Interpreter
// =============================================================================

/// Result of executing one instruction.
enum Flow {
    Continue,
    Jump(BlockId),
    Exit(Outcome),
}

/// Executes one graph.
pub struct Interpreter<'g, H = NoInvokes> {
    graph: &'g Graph,
    heap: Heap,
    handler: H,
    fuel: u64,
    steps: u64,
    values: FxHashMap<InstId, Value>,
}

impl<'g> Interpreter<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            heap: Heap::default(),
            handler: NoInvokes,
            fuel: DEFAULT_FUEL,
            steps: 0,
            values: FxHashMap::default(),
        }
    }
}

impl<'g, H: InvokeHandler> Interpreter<'g, H> {
    /// Route non-intrinsic calls to `handler`.
    pub fn with_handler<H2: InvokeHandler>(self, handler: H2) -> Interpreter<'g, H2> {
        Interpreter {
            graph: self.graph,
            heap: self.heap,
            handler,
            fuel: self.fuel,
            steps: self.steps,
            values: self.values,
        }
    }

    /// Limit the number of executed instructions.
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    /// Use `heap` for arrays passed as arguments.
    pub fn with_heap(mut self, heap: Heap) -> Self {
        self.heap = heap;
        self
    }

    #[inline]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    #[inline]
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Instructions executed by the last run.
    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Run the method with `args`.
    pub fn run(&mut self, args: &[Value]) -> Result<Outcome, InterpError> {
        let expected = self.graph.parameters().len();
        if args.len() != expected {
            return Err(InterpError::Arity {
                expected,
                found: args.len(),
            });
        }
        self.values.clear();
        self.steps = 0;

        let mut block = self.graph.entry;
        loop {
            let bb = self.graph.block(block);
            let mut next = None;
            for &id in &bb.instructions {
                self.steps += 1;
                if self.steps > self.fuel {
                    return Err(InterpError::OutOfFuel(self.fuel));
                }
                match self.step(id, args)? {
                    Flow::Continue => {}
                    Flow::Jump(target) => {
                        next = Some(target);
                        break;
                    }
                    Flow::Exit(outcome) => return Ok(outcome),
                }
            }
            let target = next.ok_or(InterpError::NoTerminator(block))?;
            self.enter(block, target)?;
            block = target;
        }
    }

    /// Assign the phis of `to` for the edge `from -> to`, all at once.
    fn enter(&mut self, from: BlockId, to: BlockId) -> Result<(), InterpError> {
        let bb = self.graph.block(to);
        let Some(index) = bb.predecessors.iter().position(|&p| p == from) else {
            return Err(InterpError::NoTerminator(from));
        };
        let mut incoming = Vec::with_capacity(bb.phis.len());
        for &phi in &bb.phis {
            let input = self
                .graph
                .inst(phi)
                .inputs
                .get(index)
                .ok_or(InterpError::Undefined { inst: phi })?;
            incoming.push((phi, self.value(phi, input)?));
        }
        self.values.extend(incoming);
        Ok(())
    }

    #[inline]
    fn value(&self, user: InstId, id: InstId) -> Result<Value, InterpError> {
        self.values
            .get(&id)
            .copied()
            .ok_or(InterpError::Undefined { inst: user })
    }

    fn operand(&self, id: InstId, index: usize) -> Result<Value, InterpError> {
        let input = self
            .graph
            .inst(id)
            .inputs
            .get(index)
            .ok_or(InterpError::Undefined { inst: id })?;
        self.value(id, input)
    }

    fn successor(&self, id: InstId, index: usize) -> Result<BlockId, InterpError> {
        let block = self.graph.block_of(id);
        self.graph
            .block(block)
            .successors
            .get(index)
            .copied()
            .ok_or(InterpError::NoTerminator(block))
    }

    fn step(&mut self, id: InstId, args: &[Value]) -> Result<Flow, InterpError> {
        let graph = self.graph;
        let inst = graph.inst(id);
        let bad = || InterpError::BadOperands {
            inst: id,
            op: inst.op.name(),
        };

        let result = match &inst.op {
            op if op.is_constant() => ConstValue::of(op).map(Value::from).ok_or_else(bad)?,
            Operator::ParameterValue(index) => *args.get(*index as usize).ok_or_else(bad)?,

            Operator::Binary(op) => {
                let lhs = self.operand(id, 0)?.to_const().ok_or_else(bad)?;
                let rhs = self.operand(id, 1)?.to_const().ok_or_else(bad)?;
                match eval_binary(*op, lhs, rhs) {
                    Some(v) => Value::from(v),
                    None if matches!(op, BinaryOp::Div | BinaryOp::Rem) => {
                        return Ok(Flow::Exit(Outcome::Throw(ThrowKind::Arithmetic)));
                    }
                    None => return Err(bad()),
                }
            }
            Operator::Unary(op) => {
                let value = self.operand(id, 0)?.to_const().ok_or_else(bad)?;
                Value::from(eval_unary(*op, value).ok_or_else(bad)?)
            }
            Operator::Condition(kind, bias) => {
                let lhs = self.operand(id, 0)?;
                let rhs = self.operand(id, 1)?;
                let holds = match (lhs.to_const(), rhs.to_const()) {
                    (Some(l), Some(r)) => eval_condition(*kind, *bias, l, r).ok_or_else(bad)?,
                    _ => match kind {
                        CondKind::Equal => lhs == rhs,
                        CondKind::NotEqual => lhs != rhs,
                        _ => return Err(bad()),
                    },
                };
                Value::Int(holds as i32)
            }
            Operator::Compare(bias) => {
                let lhs = self.operand(id, 0)?.to_const().ok_or_else(bad)?;
                let rhs = self.operand(id, 1)?.to_const().ok_or_else(bad)?;
                Value::Int(eval_compare(*bias, lhs, rhs).ok_or_else(bad)?)
            }
            Operator::TypeConversion => {
                let value = self.operand(id, 0)?.to_const().ok_or_else(bad)?;
                Value::from(eval_conversion(value, inst.ty).ok_or_else(bad)?)
            }
            Operator::DataProcWithShifterOp(op) => {
                let left = self.operand(id, 0)?.as_i64().ok_or_else(bad)?;
                let source = self.operand(id, 1)?.as_i64().ok_or_else(bad)?;
                eval_shifter_op(*op, inst.ty, left, source).ok_or_else(bad)?
            }
            Operator::Phi => self.value(id, id)?,

            Operator::NullCheck => match self.operand(id, 0)? {
                Value::Null => return Ok(Flow::Exit(Outcome::Throw(ThrowKind::NullPointer))),
                value => value,
            },
            Operator::ArrayLength => match self.operand(id, 0)? {
                Value::Array(array) => Value::Int(self.heap.len(array).ok_or_else(bad)? as i32),
                Value::Null => return Ok(Flow::Exit(Outcome::Throw(ThrowKind::NullPointer))),
                _ => return Err(bad()),
            },
            Operator::BoundsCheck => {
                let (Value::Int(index), Value::Int(length)) =
                    (self.operand(id, 0)?, self.operand(id, 1)?)
                else {
                    return Err(bad());
                };
                if index as u32 >= length as u32 {
                    return Ok(Flow::Exit(Outcome::Throw(ThrowKind::ArrayIndexOutOfBounds)));
                }
                Value::Int(index)
            }
            Operator::DivZeroCheck => {
                let value = self.operand(id, 0)?;
                if value.as_i64().ok_or_else(bad)? == 0 {
                    return Ok(Flow::Exit(Outcome::Throw(ThrowKind::Arithmetic)));
                }
                value
            }
            Operator::NewArray => {
                let Value::Int(length) = self.operand(id, 0)? else {
                    return Err(bad());
                };
                if length < 0 {
                    return Ok(Flow::Exit(Outcome::Throw(ThrowKind::ArrayIndexOutOfBounds)));
                }
                self.heap.alloc_zeroed(length as usize)
            }
            // Guards throw; an access reaching memory out of range means a
            // guard was removed that should have stayed.
            Operator::ArrayGet | Operator::ArraySet => {
                let array = match self.operand(id, 0)? {
                    Value::Array(array) => array,
                    Value::Null => return Err(InterpError::UncheckedNull { inst: id }),
                    _ => return Err(bad()),
                };
                let Value::Int(index) = self.operand(id, 1)? else {
                    return Err(bad());
                };
                let length = self.heap.len(array).ok_or_else(bad)?;
                if index < 0 || index as usize >= length {
                    return Err(InterpError::UncheckedAccess {
                        inst: id,
                        index,
                        length,
                    });
                }
                if matches!(inst.op, Operator::ArrayGet) {
                    self.heap.get(array, index as usize, inst.ty).ok_or_else(bad)?
                } else {
                    let value = self.operand(id, 2)?;
                    self.heap.set(array, index as usize, value).ok_or_else(bad)?;
                    return Ok(Flow::Continue);
                }
            }

            Operator::InvokeStaticOrDirect(target) => {
                let call_args = inst
                    .inputs
                    .iter()
                    .map(|input| self.value(id, input))
                    .collect::<Result<Vec<_>, _>>()?;
                let returned = match target.intrinsic {
                    Some(intrinsic) => Some(eval_intrinsic(intrinsic, &call_args).ok_or_else(bad)?),
                    None => self.handler.invoke(target, &call_args)?,
                };
                match returned {
                    Some(value) => value,
                    None => return Ok(Flow::Continue),
                }
            }
            Operator::SuspendCheck => return Ok(Flow::Continue),
            Operator::Deoptimize(kind) => {
                let fires = match self.operand(id, 0)? {
                    Value::Int(v) => v != 0,
                    _ => return Err(bad()),
                };
                if fires {
                    return Ok(Flow::Exit(Outcome::Deoptimize(*kind)));
                }
                return Ok(Flow::Continue);
            }

            Operator::Goto => return Ok(Flow::Jump(self.successor(id, 0)?)),
            Operator::If => {
                let taken = match self.operand(id, 0)? {
                    Value::Int(v) => v != 0,
                    _ => return Err(bad()),
                };
                return Ok(Flow::Jump(self.successor(id, if taken { 0 } else { 1 })?));
            }
            Operator::Return => return Ok(Flow::Exit(Outcome::Return(Some(self.operand(id, 0)?)))),
            Operator::ReturnVoid => return Ok(Flow::Exit(Outcome::Return(None))),
            Operator::Exit => return Err(InterpError::NoTerminator(graph.block_of(id))),
            _ => return Err(bad()),
        };
        self.values.insert(id, result);
        Ok(Flow::Continue)
    }
}

// =============================================================================
// Tests
// =============================================================================
