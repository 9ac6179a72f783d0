//! Block skeleton and control-flow bytecodes.

use super::{BuildResult, GraphBuilder};
use crate::bytecode::Insn;
use crate::error::BuildError;
use crate::ir::arena::BitSet;
use crate::ir::cfg::BlockId;
use crate::ir::operators::{ComparisonBias, CondKind, Operator};
use crate::ir::types::DataType;

/// Builder trait for block terminators.
pub trait ControlBuilder {
    /// Any `if*` bytecode: pop the operands, build the condition and end the
    /// block with `If` (true successor: the branch target).
    fn conditional_branch(&mut self, insn: &Insn) -> BuildResult<()>;

    fn goto(&mut self);

    /// Typed return; `None` returns nothing.
    fn return_value(&mut self, kind: Option<DataType>) -> BuildResult<()>;
}

impl ControlBuilder for GraphBuilder<'_> {
    fn conditional_branch(&mut self, insn: &Insn) -> BuildResult<()> {
        let (kind, lhs, rhs) = match *insn {
            Insn::If(kind, _) => {
                let value = self.pop_kind(DataType::Int32)?;
                (kind, value, self.graph.int_constant(0))
            }
            Insn::IfCmp(kind, _) => {
                let rhs = self.pop_kind(DataType::Int32)?;
                let lhs = self.pop_kind(DataType::Int32)?;
                (kind, lhs, rhs)
            }
            Insn::IfACmp(kind, _) => {
                let rhs = self.pop_kind(DataType::Reference)?;
                let lhs = self.pop_kind(DataType::Reference)?;
                (kind, lhs, rhs)
            }
            Insn::IfNull(is_null, _) => {
                let value = self.pop_kind(DataType::Reference)?;
                let kind = if is_null {
                    CondKind::Equal
                } else {
                    CondKind::NotEqual
                };
                (kind, value, self.graph.null_constant())
            }
            _ => return Ok(()),
        };
        let cond = self.emit(
            Operator::Condition(kind, ComparisonBias::NoBias),
            DataType::Bool,
            &[lhs, rhs],
        );
        // A branch to the next instruction has a single successor.
        if self.graph.block(self.current).successors.len() == 2 {
            self.emit(Operator::If, DataType::Void, &[cond]);
        } else {
            self.emit(Operator::Goto, DataType::Void, &[]);
        }
        Ok(())
    }

    fn goto(&mut self) {
        self.emit(Operator::Goto, DataType::Void, &[]);
    }

    fn return_value(&mut self, kind: Option<DataType>) -> BuildResult<()> {
        let declared = self.method.signature.return_type.data_type();
        match kind {
            None if declared == DataType::Void => {
                self.emit(Operator::ReturnVoid, DataType::Void, &[]);
            }
            Some(kind) if declared != DataType::Void && declared.kind() == kind.kind() => {
                let value = self.pop_kind(kind)?;
                self.emit(Operator::Return, DataType::Void, &[value]);
            }
            _ => {
                return Err(BuildError::BadReturn {
                    method: self.method_name(),
                    pc: self.pc,
                    expected: declared,
                })
            }
        }
        Ok(())
    }
}

// =============================================================================
// Skeleton
// =============================================================================

impl GraphBuilder<'_> {
    /// Create one block per leader and connect them. Unreachable blocks are
    /// removed again; so is the exit block when nothing returns.
    pub(super) fn build_skeleton(&mut self) -> BuildResult<()> {
        let method = self.method;
        let code = &method.code;
        let len = code.len();

        let mut leaders = BitSet::with_capacity(len);
        leaders.insert(0);
        for (pc, insn) in code.iter().enumerate() {
            if let Some(target) = insn.target() {
                if target >= len {
                    return Err(BuildError::BadTarget {
                        method: self.method_name(),
                        pc,
                        target,
                    });
                }
                leaders.insert(target);
            }
            if (insn.is_branch() || insn.ends_flow()) && pc + 1 < len {
                leaders.insert(pc + 1);
            }
        }
        if !code[len - 1].ends_flow() {
            return Err(BuildError::FallOffEnd {
                method: self.method_name(),
            });
        }

        let starts: Vec<usize> = leaders.iter().collect();
        let mut block_at = vec![BlockId::INVALID; len];
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(len);
            let block = self.graph.create_block(start as u32);
            for slot in &mut block_at[start..end] {
                *slot = block;
            }
            self.ranges.insert(block, start..end);
        }

        let entry = self.graph.entry;
        let exit = self.graph.exit;
        self.graph.add_edge(entry, block_at[0]);
        for &start in &starts {
            let block = block_at[start];
            let end = self.ranges[&block].end;
            let last = &code[end - 1];
            match *last {
                Insn::Goto(target) => self.graph.add_edge(block, block_at[target]),
                Insn::Return(_) => self.graph.add_edge(block, exit),
                _ => {
                    if let Some(target) = last.target() {
                        self.graph.add_edge(block, block_at[target]);
                        if block_at[end] != block_at[target] {
                            self.graph.add_edge(block, block_at[end]);
                        }
                    } else {
                        self.graph.add_edge(block, block_at[end]);
                    }
                }
            }
        }

        self.remove_unreachable_blocks();
        Ok(())
    }

    fn remove_unreachable_blocks(&mut self) {
        let mut reachable = BitSet::with_capacity(self.graph.block_capacity());
        let mut work = vec![self.graph.entry];
        reachable.insert(self.graph.entry.as_usize());
        while let Some(block) = work.pop() {
            for &succ in &self.graph.block(block).successors {
                if reachable.insert(succ.as_usize()) {
                    work.push(succ);
                }
            }
        }
        let dead: Vec<BlockId> = self
            .graph
            .block_ids()
            .filter(|b| !reachable.contains(b.as_usize()))
            .collect();
        for block in dead {
            self.ranges.remove(&block);
            self.graph.remove_block(block);
        }
    }
}
