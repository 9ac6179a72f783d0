//! Structural consistency checks.
//!
//! Run after the builder and after every pass in tests and debug pipelines.
//! A failure is a compiler bug, never a property of the input program.

use thiserror::Error;

use super::cfg::BlockId;
use super::graph::Graph;
use super::instruction::{InstId, Use};
use super::operators::Operator;

/// First invariant violation found in a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{block:?}: {message}")]
pub struct GraphError {
    pub block: BlockId,
    pub message: String,
}

impl Graph {
    /// Check use lists, phi arity, terminators, dominance and operand types.
    pub fn verify(&self) -> Result<(), GraphError> {
        for &block in self.reverse_post_order() {
            self.verify_block(block)?;
        }
        Ok(())
    }

    fn verify_block(&self, block: BlockId) -> Result<(), GraphError> {
        let fail = |message: String| Err(GraphError { block, message });
        let bb = self.block(block);

        let Some(&last) = bb.instructions.last() else {
            return fail("empty block".to_string());
        };
        if !self.op(last).is_control_flow() {
            return fail(format!("ends in {} instead of control flow", self.op(last)));
        }
        let expected_succs = match self.op(last) {
            Operator::If => 2,
            Operator::Exit => 0,
            _ => 1,
        };
        if bb.successors.len() != expected_succs {
            return fail(format!(
                "{} with {} successors",
                self.op(last),
                bb.successors.len()
            ));
        }
        for &succ in &bb.successors {
            if !self.block(succ).predecessors.contains(&block) {
                return fail(format!("successor {:?} does not list it as predecessor", succ));
            }
        }

        for &phi in &bb.phis {
            let inst = self.inst(phi);
            if !inst.is_phi() || inst.block != block {
                return fail(format!("{:?} misplaced in phi list", phi));
            }
            if inst.inputs.len() != bb.predecessors.len() {
                return fail(format!(
                    "phi {:?} has {} inputs for {} predecessors",
                    phi,
                    inst.inputs.len(),
                    bb.predecessors.len()
                ));
            }
            for (i, input) in inst.inputs.iter().enumerate() {
                self.verify_use(block, phi, input, i)?;
                if !self.inst(input).ty.same_kind(inst.ty) {
                    return fail(format!("phi {:?} input {} has type {}", phi, i, self.ty(input)));
                }
                let pred = bb.predecessors[i];
                let def_block = self.block_of(input);
                if !self.dominates(def_block, pred) {
                    return fail(format!("phi {:?} input {} does not dominate {:?}", phi, i, pred));
                }
            }
        }

        for (pos, &id) in bb.instructions.iter().enumerate() {
            let inst = self.inst(id);
            if inst.is_removed() || inst.block != block || inst.is_phi() {
                return fail(format!("{:?} misplaced in instruction list", id));
            }
            if inst.op.is_control_flow() && pos + 1 != bb.instructions.len() {
                return fail(format!("{} {:?} in the middle of the block", inst.op, id));
            }
            for (i, input) in inst.inputs.iter().enumerate() {
                self.verify_use(block, id, input, i)?;
                if !self.instruction_dominates(input, id) {
                    return fail(format!("{:?} input {} ({:?}) does not dominate it", id, i, input));
                }
            }
            if let Some(env) = &inst.env {
                for (slot, value) in env.values() {
                    let listed = self.env_uses(value).contains(&Use {
                        user: id,
                        index: slot as u32,
                    });
                    if !listed || self.inst(value).is_removed() {
                        return fail(format!("{:?} env slot {} is stale", id, slot));
                    }
                }
            }
            if let Operator::Binary(op) = inst.op {
                let lhs = self.ty(inst.inputs[0]);
                let rhs = self.ty(inst.inputs[1]);
                let rhs_ok = if op.is_shift() {
                    rhs.same_kind(super::types::DataType::Int32)
                } else {
                    rhs.same_kind(inst.ty)
                };
                if !lhs.same_kind(inst.ty) || !rhs_ok {
                    return fail(format!("{} {:?} on {} and {}", op.name(), id, lhs, rhs));
                }
            }
        }
        Ok(())
    }

    fn verify_use(
        &self,
        block: BlockId,
        user: InstId,
        input: InstId,
        index: usize,
    ) -> Result<(), GraphError> {
        let listed = self.uses(input).contains(&Use {
            user,
            index: index as u32,
        });
        if !input.is_valid() || self.inst(input).is_removed() || !listed {
            return Err(GraphError {
                block,
                message: format!("{:?} input {} ({:?}) has a stale use edge", user, index, input),
            });
        }
        Ok(())
    }
}
