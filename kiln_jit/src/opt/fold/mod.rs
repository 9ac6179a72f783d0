//! Constant folding.
//!
//! Replaces instructions whose operands are all constants with a single
//! constant, applies the absorbing identities of [`absorbing`], merges phis
//! whose inputs are one constant and drops `DivZeroCheck`s of nonzero
//! constants.
//!
//! # Module Structure
//!
//! - [`evaluation`]: width-exact arithmetic, comparisons and conversions
//! - [`absorbing`]: identities that produce constants from non-constants
//!
//! Blocks are visited in reverse postorder, phis before instructions, so an
//! acyclic chain of constants folds in one sweep. Sweeps repeat until nothing
//! changes, which makes a second run of the pass a no-op.

pub mod absorbing;
pub mod evaluation;

pub use absorbing::absorbing_value;
pub use evaluation::{
    eval_binary, eval_compare, eval_condition, eval_conversion, eval_unary, ConstValue,
};

use tracing::{debug, trace};

use super::OptimizationPass;
use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::Operator;

// =============================================================================
// Constant Folding Pass
// =============================================================================

/// Constant folding pass.
#[derive(Debug, Default)]
pub struct ConstantFolding {
    stats: FoldStats,
}

/// Statistics from constant folding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldStats {
    /// Instructions evaluated to a constant.
    pub folded: usize,
    /// Instructions replaced through an absorbing identity.
    pub absorbed: usize,
    /// Phis whose inputs were one constant.
    pub phis: usize,
    /// `DivZeroCheck`s of nonzero constants removed.
    pub checks_removed: usize,
}

impl FoldStats {
    #[inline]
    pub fn total(&self) -> usize {
        self.folded + self.absorbed + self.phis + self.checks_removed
    }
}

impl ConstantFolding {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics accumulated over all runs.
    #[inline]
    pub fn stats(&self) -> &FoldStats {
        &self.stats
    }

    fn sweep(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        for block in graph.reverse_post_order().to_vec() {
            for phi in graph.block(block).phis.clone() {
                if let Some(constant) = same_constant_phi(graph, phi) {
                    trace!(?phi, "phi of one constant");
                    graph.replace_and_remove(phi, constant);
                    self.stats.phis += 1;
                    changed = true;
                }
            }
            for id in graph.block(block).instructions.clone() {
                if graph.inst(id).is_removed() || graph.block_of(id) != block {
                    continue;
                }
                if let Some(value) = self.try_fold(graph, id) {
                    graph.replace_and_remove(id, value);
                    changed = true;
                }
            }
        }
        changed
    }

    /// Constant or existing value that `id` can be replaced with.
    fn try_fold(&mut self, graph: &mut Graph, id: InstId) -> Option<InstId> {
        let inst = graph.inst(id);
        let ty = inst.ty;
        let inputs = inst.inputs.to_vec();
        let constants: Option<Vec<ConstValue>> = inputs
            .iter()
            .map(|&input| ConstValue::of_inst(graph, input))
            .collect();

        if matches!(inst.op, Operator::DivZeroCheck) {
            let divisor = constants?.first().copied()?;
            if divisor.as_i64().is_some_and(|v| v != 0) {
                trace!(check = ?id, "nonzero divisor");
                self.stats.checks_removed += 1;
                return Some(inputs[0]);
            }
            return None;
        }

        let folded = match (&inst.op, constants.as_deref()) {
            (Operator::Binary(op), Some(&[lhs, rhs])) => eval_binary(*op, lhs, rhs),
            (Operator::Unary(op), Some(&[value])) => eval_unary(*op, value),
            (Operator::Condition(kind, bias), Some(&[lhs, rhs])) => {
                eval_condition(*kind, *bias, lhs, rhs).map(|b| ConstValue::Int(b as i32))
            }
            (Operator::Compare(bias), Some(&[lhs, rhs])) => {
                eval_compare(*bias, lhs, rhs).map(ConstValue::Int)
            }
            (Operator::TypeConversion, Some(&[value])) => eval_conversion(value, ty),
            _ => None,
        };
        if let Some(value) = folded {
            debug!(inst = ?id, op = %graph.op(id), %value, "folded");
            self.stats.folded += 1;
            return Some(value.materialize(graph));
        }

        let value = absorbing_value(graph, id)?;
        debug!(inst = ?id, op = %graph.op(id), "absorbed");
        self.stats.absorbed += 1;
        Some(value)
    }
}

/// The constant every input of `phi` is, if they agree.
fn same_constant_phi(graph: &Graph, phi: InstId) -> Option<InstId> {
    let inputs = &graph.inst(phi).inputs;
    let first = inputs.get(0)?;
    (graph.inst(first).is_constant() && inputs.iter().all(|i| i == first)).then_some(first)
}

impl OptimizationPass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant_folding"
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let before = self.stats.total();
        while self.sweep(graph) {}
        let changed = self.stats.total() != before;
        debug!(folded = self.stats.total() - before, "constant folding done");
        changed
    }
}

// =============================================================================
// Tests
// =============================================================================
