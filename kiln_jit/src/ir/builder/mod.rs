//! Bytecode to SSA graph construction.
//!
//! Construction runs in four steps:
//!
//! 1. **Skeleton**: split the code at block leaders and connect the blocks,
//!    dropping code that cannot be reached from the entry.
//! 2. **Normalization**: split critical edges and give every loop a
//!    preheader before any phi exists.
//! 3. **Abstract interpretation**: visit blocks in reverse postorder, tracking
//!    locals and the operand stack as SSA values. Faulting bytecodes expand
//!    into explicit guards that carry environments.
//! 4. **Phi completion**: fill back-edge inputs, then drop dead,
//!    conflicting and trivial phis.
//!
//! Failures are fatal for the method and reported as [`BuildError`].

use std::ops::Range;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::bytecode::{Constant, Insn, Method, Signature};
use crate::error::BuildError;
use crate::ir::cfg::BlockId;
use crate::ir::graph::Graph;
use crate::ir::instruction::{Environment, InstId};
use crate::ir::operators::{InvokeTarget, Operator};
use crate::ir::types::DataType;

mod arithmetic;
mod containers;
mod control;
mod guards;
mod ssa;

#[cfg(test)]
mod tests;

pub use arithmetic::ArithmeticBuilder;
pub use containers::ArrayBuilder;
pub use control::ControlBuilder;
pub use guards::GuardBuilder;

pub(crate) type BuildResult<T> = Result<T, BuildError>;

/// Build the SSA graph of `method`.
pub fn build_graph(method: &Method) -> BuildResult<Graph> {
    GraphBuilder::new(method).build()
}

// =============================================================================
// Frame State
// =============================================================================

/// Locals and operand stack at one program point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameState {
    locals: Vec<Option<InstId>>,
    stack: Vec<InstId>,
}

impl FrameState {
    fn new(num_locals: usize) -> Self {
        FrameState {
            locals: vec![None; num_locals],
            stack: Vec::new(),
        }
    }

    #[inline]
    pub fn local(&self, slot: usize) -> Option<InstId> {
        self.locals.get(slot).copied().flatten()
    }

    #[inline]
    pub fn stack(&self) -> &[InstId] {
        &self.stack
    }
}

// =============================================================================
// Graph Builder
// =============================================================================

/// Translates one method's bytecode into a [`Graph`].
pub struct GraphBuilder<'m> {
    pub(crate) graph: Graph,
    method: &'m Method,

    /// State at the current bytecode.
    state: FrameState,
    current: BlockId,
    pc: usize,

    /// Bytecode range of each code block. Blocks created by normalization
    /// have none.
    ranges: FxHashMap<BlockId, Range<usize>>,
    exit_states: FxHashMap<BlockId, FrameState>,
    entry_depths: FxHashMap<BlockId, usize>,
    pending: Vec<ssa::PendingPhi>,
}

impl<'m> GraphBuilder<'m> {
    pub fn new(method: &'m Method) -> Self {
        let graph = Graph::new(method.signature.clone(), method.num_locals as usize);
        let entry = graph.entry;
        GraphBuilder {
            graph,
            method,
            state: FrameState::new(method.num_locals as usize),
            current: entry,
            pc: 0,
            ranges: FxHashMap::default(),
            exit_states: FxHashMap::default(),
            entry_depths: FxHashMap::default(),
            pending: Vec::new(),
        }
    }

    /// Run all construction steps and return the finished graph.
    pub fn build(mut self) -> BuildResult<Graph> {
        if self.method.code.is_empty() {
            return Err(BuildError::EmptyMethod {
                method: self.method_name(),
            });
        }

        self.build_skeleton()?;
        let synthetic = self.graph.normalize_skeleton();
        self.setup_entry();

        let entry = self.graph.entry;
        let exit = self.graph.exit;
        let order: Vec<BlockId> = self.graph.reverse_post_order().to_vec();
        for block in order {
            if block == entry || block == exit {
                continue;
            }
            self.current = block;
            self.state = self.entry_state(block)?;
            if self.graph.is_loop_header(block) {
                self.add_suspend_check();
            }
            match self.ranges.get(&block).cloned() {
                Some(range) => self.interpret(range)?,
                None => {
                    let dex_pc = self.graph.block(block).dex_pc;
                    self.graph.set_dex_pc(dex_pc);
                    self.graph.add(block, Operator::Goto, DataType::Void, &[]);
                }
            }
            let state = std::mem::take(&mut self.state);
            self.exit_states.insert(block, state);
        }

        if !self.graph.block(exit).predecessors.is_empty() {
            let dex_pc = self.method.code.len().saturating_sub(1) as u32;
            self.graph.set_dex_pc(dex_pc);
            self.graph.add(exit, Operator::Exit, DataType::Void, &[]);
        }

        self.complete_phis()?;
        self.graph.rebuild_analyses();
        debug!(
            method = %self.method.signature,
            blocks = self.graph.reverse_post_order().len(),
            synthetic = synthetic.len(),
            "built graph"
        );
        Ok(self.graph)
    }

    /// Parameters, then the jump into the code.
    fn setup_entry(&mut self) {
        let entry = self.graph.entry;
        let mut state = FrameState::new(self.method.num_locals as usize);
        let params: Vec<DataType> = self
            .method
            .signature
            .params
            .iter()
            .map(|p| p.data_type())
            .collect();
        for (index, ty) in params.into_iter().enumerate() {
            let param = self.graph.add_parameter(index as u16, ty);
            state.locals[index] = Some(param);
        }
        self.graph.set_dex_pc(0);
        self.graph.add(entry, Operator::Goto, DataType::Void, &[]);
        self.exit_states.insert(entry, state);
    }

    fn add_suspend_check(&mut self) {
        let dex_pc = self.graph.block(self.current).dex_pc;
        self.pc = dex_pc as usize;
        self.graph.set_dex_pc(dex_pc);
        self.emit_with_env(Operator::SuspendCheck, DataType::Void, &[]);
    }

    // =========================================================================
    // Interpretation
    // =========================================================================

    fn interpret(&mut self, range: Range<usize>) -> BuildResult<()> {
        let method = self.method;
        let mut terminated = false;
        for pc in range {
            self.pc = pc;
            self.graph.set_dex_pc(pc as u32);
            let insn = &method.code[pc];
            self.visit(insn)?;
            terminated = insn.is_branch() || insn.ends_flow();
        }
        if !terminated {
            self.emit(Operator::Goto, DataType::Void, &[]);
        }
        Ok(())
    }

    fn visit(&mut self, insn: &Insn) -> BuildResult<()> {
        match insn {
            Insn::Nop => {}
            Insn::Const(constant) => {
                let value = match *constant {
                    Constant::Int(v) => self.graph.int_constant(v),
                    Constant::Long(v) => self.graph.long_constant(v),
                    Constant::Float(v) => self.graph.float_constant(v),
                    Constant::Double(v) => self.graph.double_constant(v),
                    Constant::Null => self.graph.null_constant(),
                };
                self.push(value);
            }
            Insn::Load(kind, slot) => {
                let value = self.local(*slot, *kind)?;
                self.push(value);
            }
            Insn::Store(kind, slot) => {
                let value = self.pop_kind(*kind)?;
                self.set_local(*slot, value)?;
            }
            Insn::Iinc(slot, delta) => self.increment(*slot, *delta)?,
            Insn::Binary(ty, op) => self.binary(*ty, *op)?,
            Insn::Neg(ty) => self.negate(*ty)?,
            Insn::Convert(from, to) => self.convert(*from, *to)?,
            Insn::Compare(ty, bias) => self.compare(*ty, *bias)?,
            Insn::If(..) | Insn::IfCmp(..) | Insn::IfACmp(..) | Insn::IfNull(..) => {
                self.conditional_branch(insn)?
            }
            Insn::Goto(_) => self.goto(),
            Insn::NewArray(elem) => self.new_array(*elem)?,
            Insn::ArrayLength => self.array_length()?,
            Insn::ArrayLoad(elem) => self.array_load(*elem)?,
            Insn::ArrayStore(elem) => self.array_store(*elem)?,
            Insn::InvokeStatic(sig) => self.invoke(sig)?,
            Insn::Return(kind) => self.return_value(*kind)?,
            Insn::Dup => {
                let value = self.pop()?;
                self.push(value);
                self.push(value);
            }
            Insn::Pop => {
                self.pop()?;
            }
            Insn::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b);
                self.push(a);
            }
        }
        Ok(())
    }

    fn invoke(&mut self, sig: &Signature) -> BuildResult<()> {
        let mut args = Vec::with_capacity(sig.params.len());
        for param in sig.params.iter().rev() {
            args.push(self.pop_kind(param.data_type())?);
        }
        args.reverse();
        let ret = sig.return_type.data_type();
        let target = InvokeTarget::new(sig.class.clone(), sig.name.clone());
        let call = self.emit_with_env(
            Operator::InvokeStaticOrDirect(Box::new(target)),
            ret,
            &args,
        );
        if ret != DataType::Void {
            self.push(call);
        }
        Ok(())
    }

    // =========================================================================
    // State Access
    // =========================================================================

    fn method_name(&self) -> String {
        self.method.signature.to_string()
    }

    #[inline]
    fn push(&mut self, value: InstId) {
        self.state.stack.push(value);
    }

    fn pop(&mut self) -> BuildResult<InstId> {
        self.state
            .stack
            .pop()
            .ok_or_else(|| BuildError::StackUnderflow {
                method: self.method_name(),
                pc: self.pc,
            })
    }

    /// Pop a value whose stack kind must match `ty`.
    fn pop_kind(&mut self, ty: DataType) -> BuildResult<InstId> {
        let value = self.pop()?;
        self.expect_kind(value, ty)?;
        Ok(value)
    }

    fn expect_kind(&self, value: InstId, ty: DataType) -> BuildResult<()> {
        let found = self.graph.ty(value);
        if found.kind() != ty.kind() {
            return Err(BuildError::TypeMismatch {
                method: self.method_name(),
                pc: self.pc,
                expected: ty.kind(),
                found,
            });
        }
        Ok(())
    }

    fn local(&self, slot: u16, ty: DataType) -> BuildResult<InstId> {
        let value = self
            .state
            .locals
            .get(slot as usize)
            .ok_or_else(|| BuildError::BadLocal {
                method: self.method_name(),
                pc: self.pc,
                slot,
            })?
            .ok_or_else(|| BuildError::UndefinedLocal {
                method: self.method_name(),
                pc: self.pc,
                slot,
            })?;
        self.expect_kind(value, ty)?;
        Ok(value)
    }

    fn set_local(&mut self, slot: u16, value: InstId) -> BuildResult<()> {
        match self.state.locals.get_mut(slot as usize) {
            Some(local) => {
                *local = Some(value);
                Ok(())
            }
            None => Err(BuildError::BadLocal {
                method: self.method_name(),
                pc: self.pc,
                slot,
            }),
        }
    }

    /// Snapshot of the locals for a guard, invoke or suspend point.
    fn environment(&self) -> Environment {
        Environment::new(self.state.locals.iter().copied(), self.pc as u32)
    }

    #[inline]
    fn emit(&mut self, op: Operator, ty: DataType, inputs: &[InstId]) -> InstId {
        self.graph.add(self.current, op, ty, inputs)
    }

    fn emit_with_env(&mut self, op: Operator, ty: DataType, inputs: &[InstId]) -> InstId {
        let id = self.emit(op, ty, inputs);
        let env = self.environment();
        self.graph.set_environment(id, env);
        id
    }
}
