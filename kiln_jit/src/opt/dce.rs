//! Dead code elimination.
//!
//! One run performs, in order:
//!
//! 1. **Branch folding**: `If` on a constant becomes `Goto` to the taken side
//! 2. **Unreachable blocks**: blocks no longer reachable from the entry are
//!    deleted, dropping their phi inputs in surviving successors
//! 3. **Trivial phis**: single-input phis and phis whose inputs are one
//!    value (ignoring the phi itself) are replaced by that value
//! 4. **Block merging**: `A -> B` where `A` ends in `Goto` and `B` has no
//!    other predecessor are fused into `A`
//! 5. **Dead instructions**: pure instructions without ordinary or
//!    environment uses are removed, users before definitions
//!
//! Analyses are rebuilt at the end, so later passes see fresh dominators and
//! loops.

use tracing::{debug, trace};

use super::OptimizationPass;
use crate::ir::arena::BitSet;
use crate::ir::cfg::BlockId;
use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::Operator;
use crate::ir::types::DataType;

/// Statistics from dead code elimination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DceStats {
    pub branches_folded: usize,
    pub blocks_removed: usize,
    pub phis_removed: usize,
    pub blocks_merged: usize,
    pub instructions_removed: usize,
}

impl DceStats {
    #[inline]
    pub fn total(&self) -> usize {
        self.branches_folded
            + self.blocks_removed
            + self.phis_removed
            + self.blocks_merged
            + self.instructions_removed
    }
}

/// Dead code elimination pass.
#[derive(Debug)]
pub struct Dce {
    name: &'static str,
    stats: DceStats,
}

impl Default for Dce {
    fn default() -> Self {
        Self::new()
    }
}

impl Dce {
    pub fn new() -> Self {
        Self {
            name: "dead_code_elimination",
            stats: DceStats::default(),
        }
    }

    /// The cleanup run at the end of the pipeline.
    pub fn final_cleanup() -> Self {
        Self {
            name: "dead_code_elimination$final",
            stats: DceStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> &DceStats {
        &self.stats
    }

    // =========================================================================
    // Control Flow
    // =========================================================================

    fn fold_branches(&mut self, graph: &mut Graph) {
        for block in graph.reverse_post_order().to_vec() {
            let Some(last) = graph.last_instruction(block) else {
                continue;
            };
            if !matches!(graph.op(last), Operator::If) {
                continue;
            }
            let Some(value) = graph.int_value(graph.input(last, 0)) else {
                continue;
            };
            let successors = graph.block(block).successors.clone();
            let (taken, dropped) = if value != 0 {
                (successors[0], successors[1])
            } else {
                (successors[1], successors[0])
            };
            trace!(?block, ?taken, "constant branch");
            let dex_pc = graph.inst(last).dex_pc;
            graph.remove(last);
            let goto = graph.add(block, Operator::Goto, DataType::Void, &[]);
            graph.inst_mut(goto).dex_pc = dex_pc;
            if taken != dropped {
                graph.remove_edge(block, dropped);
            }
            self.stats.branches_folded += 1;
        }
    }

    fn remove_unreachable_blocks(&mut self, graph: &mut Graph) {
        let mut reachable = BitSet::with_capacity(graph.block_capacity());
        let mut work = vec![graph.entry];
        reachable.insert(graph.entry.as_usize());
        while let Some(block) = work.pop() {
            for &succ in &graph.block(block).successors {
                if reachable.insert(succ.as_usize()) {
                    work.push(succ);
                }
            }
        }
        let dead: Vec<BlockId> = graph
            .block_ids()
            .filter(|b| !reachable.contains(b.as_usize()))
            .collect();
        for block in dead {
            trace!(?block, "unreachable block");
            graph.remove_block(block);
            self.stats.blocks_removed += 1;
        }
    }

    fn merge_blocks(&mut self, graph: &mut Graph) {
        let mut changed = true;
        while changed {
            changed = false;
            for block in graph.block_ids().collect::<Vec<_>>() {
                if graph.block(block).removed {
                    continue;
                }
                let Some(succ) = graph.block(block).single_successor() else {
                    continue;
                };
                let ends_in_goto = graph
                    .last_instruction(block)
                    .is_some_and(|last| matches!(graph.op(last), Operator::Goto));
                if succ == block
                    || succ == graph.entry
                    || !ends_in_goto
                    || graph.block(succ).predecessors.as_slice() != [block]
                {
                    continue;
                }
                trace!(?block, ?succ, "merge");
                graph.merge_with_successor(block, succ);
                self.stats.blocks_merged += 1;
                changed = true;
            }
        }
    }

    // =========================================================================
    // Values
    // =========================================================================

    fn remove_trivial_phis(&mut self, graph: &mut Graph) {
        let mut changed = true;
        while changed {
            changed = false;
            for block in graph.block_ids().collect::<Vec<_>>() {
                for phi in graph.block(block).phis.clone() {
                    if graph.inst(phi).is_removed() {
                        continue;
                    }
                    if let Some(value) = trivial_phi_value(graph, phi) {
                        graph.replace_and_remove(phi, value);
                        self.stats.phis_removed += 1;
                        changed = true;
                    }
                }
            }
        }
    }

    fn remove_dead_instructions(&mut self, graph: &mut Graph) {
        let mut changed = true;
        while changed {
            changed = false;
            for &block in graph.reverse_post_order().to_vec().iter().rev() {
                let bb = graph.block(block);
                let candidates: Vec<InstId> =
                    bb.instructions.iter().rev().chain(&bb.phis).copied().collect();
                for id in candidates {
                    if is_dead(graph, id) {
                        graph.remove(id);
                        self.stats.instructions_removed += 1;
                        changed = true;
                    }
                }
            }
        }
    }
}

/// The value a phi always produces, if it does not really merge anything.
fn trivial_phi_value(graph: &Graph, phi: InstId) -> Option<InstId> {
    let mut value = None;
    for input in graph.inst(phi).inputs.iter() {
        if input == phi || Some(input) == value {
            continue;
        }
        if value.is_some() {
            return None;
        }
        value = Some(input);
    }
    value
}

fn is_dead(graph: &Graph, id: InstId) -> bool {
    let inst = graph.inst(id);
    !inst.is_removed()
        && inst.op.is_removable_when_unused()
        && !graph.has_uses(id)
        && !graph.has_env_uses(id)
}

impl OptimizationPass for Dce {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let before = self.stats.total();
        self.fold_branches(graph);
        self.remove_unreachable_blocks(graph);
        self.remove_trivial_phis(graph);
        self.merge_blocks(graph);
        graph.rebuild_analyses();
        self.remove_dead_instructions(graph);
        graph.rebuild_analyses();
        debug!(pass = self.name, stats = ?self.stats, "dead code elimination done");
        self.stats.total() != before
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::fold::ConstantFolding;
    use crate::opt::testing::{build, find};

    const SELECT: &str = "
        .method static int Main.select()
            iconst 7
            istore 0
            iconst 2
            istore 1
            iload 0
            iload 1
            if_icmpge else
            iload 0
            iload 1
            iadd
            istore 2
            goto done
        else:
            iload 0
            iload 1
            isub
            istore 2
        done:
            iload 2
            ireturn
        .end";

    #[test]
    fn test_constant_select_collapses() {
        let mut g = build(SELECT);
        ConstantFolding::new().run(&mut g);
        let mut dce = Dce::new();
        assert!(dce.run(&mut g));
        g.verify().expect("valid");
        assert!(find(&g, "If").is_empty());
        assert!(find(&g, "Phi").is_empty());
        let ret = find(&g, "Return")[0];
        assert_eq!(g.int_value(g.input(ret, 0)), Some(5));
        assert_eq!(dce.stats().branches_folded, 1);
        // Only the constant the method returns survives.
        assert_eq!(find(&g, "IntConstant").len(), 1);
    }

    #[test]
    fn test_unused_pure_values_removed() {
        let mut g = build(
            ".method static int Main.f(int)
                iload 0
                iconst 3
                imul
                pop
                iload 0
                ireturn
            .end",
        );
        assert!(Dce::new().run(&mut g));
        assert!(find(&g, "Mul").is_empty());
        assert!(find(&g, "IntConstant").is_empty());
    }

    #[test]
    fn test_throwing_instructions_kept() {
        let mut g = build(
            ".method static void Main.f(int, int)
                iload 0
                iload 1
                idiv
                pop
                return
            .end",
        );
        Dce::new().run(&mut g);
        // The division itself is pure, its zero check is not.
        assert!(find(&g, "Div").is_empty());
        assert_eq!(find(&g, "DivZeroCheck").len(), 1);
    }

    #[test]
    fn test_loop_survives_cleanup() {
        let mut g = build(
            ".method static void Main.fill(int[])
                iconst 0
                istore 1
            head:
                iload 1
                aload 0
                arraylength
                if_icmpge done
                aload 0
                iload 1
                iconst 1
                iastore
                iinc 1 1
                goto head
            done:
                return
            .end",
        );
        let headers_before = g.loops().len();
        Dce::new().run(&mut g);
        g.verify().expect("valid");
        assert_eq!(g.loops().len(), headers_before);
        assert_eq!(find(&g, "BoundsCheck").len(), 1);
        assert_eq!(find(&g, "Phi").len(), 1);
    }

    #[test]
    fn test_final_variant_name() {
        assert_eq!(Dce::new().name(), "dead_code_elimination");
        assert_eq!(Dce::final_cleanup().name(), "dead_code_elimination$final");
    }

    #[test]
    fn test_second_run_is_quiet() {
        let mut g = build(SELECT);
        ConstantFolding::new().run(&mut g);
        Dce::new().run(&mut g);
        assert!(!Dce::new().run(&mut g));
    }
}
