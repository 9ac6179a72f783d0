//! Dynamic bounds-check elimination.
//!
//! Checks that cannot be proven statically are replaced by `Deoptimize`
//! guards evaluated once, ahead of the code they protect:
//!
//! - **Loop-based**: all checks of a loop indexing `a[base + c]` are covered
//!   by guards in the loop preheader. When the loop might not run at all the
//!   guards go under a taken test so a skipped loop never deoptimizes.
//! - **Dominator-based**: checks in straight-line code indexing
//!   `a[base + c]` are covered by guards placed before the first of them.
//!
//! ```text
//!   old preheader                 if (array == null) deopt     <- bound of a
//!        |                        len = array.length              header test
//!     if_block                    if (init < U)
//!     /       \
//!  true_block  false_block        if (lower > upper) deopt     <- unsigned
//!     \       /                   if (upper >= len) deopt
//!   new preheader                 x1 = phi(x0, 0)              <- values used
//!        |                                                        by the loop
//!      header
//! ```
//!
//! Guards reuse the environment of the loop's `SuspendCheck`, with header
//! phis replaced by their entry values, so a deoptimization resumes before
//! the loop.

use tracing::{debug, trace};

use super::bounds::{same_value, ValueBound};
use super::elimination::BceVisitor;
use super::induction::{BoundPlacement, RangeRequest};
use super::{MAX_LENGTH_FOR_ADDING_DEOPTIMIZE, THRESHOLD_FOR_ADDING_DEOPTIMIZE};
use crate::ir::cfg::{BlockId, LoopInfo};
use crate::ir::graph::Graph;
use crate::ir::instruction::{Environment, InstId};
use crate::ir::operators::{BinaryOp, ComparisonBias, CondKind, DeoptimizationKind, Operator};
use crate::ir::types::DataType;

/// Create an instruction right before the terminator of `block`.
pub(super) fn emit_before_end(
    graph: &mut Graph,
    block: BlockId,
    op: Operator,
    ty: DataType,
    inputs: &[InstId],
) -> InstId {
    match graph.last_instruction(block) {
        Some(last) if graph.op(last).is_control_flow() => {
            graph.insert_new_before(op, ty, inputs, last)
        }
        _ => graph.add(block, op, ty, inputs),
    }
}

/// Move a placed instruction right before the terminator of `block`.
fn move_to_end(graph: &mut Graph, id: InstId, block: BlockId) {
    if let Some(last) = graph.last_instruction(block) {
        graph.move_before(id, last);
    }
}

/// Lowest and highest offset of a group of `a[base + c]` checks.
#[derive(Debug, Clone, Copy)]
struct OffsetSpan {
    base: Option<InstId>,
    min_c: i32,
    max_c: i32,
}

impl OffsetSpan {
    fn of(graph: &Graph, index: InstId) -> Self {
        let value = ValueBound::as_value_bound(graph, index);
        let base = value.instruction();
        Self {
            base,
            min_c: if base.is_none() { 0 } else { value.constant() },
            max_c: value.constant(),
        }
    }

    fn widen(&mut self, c: i32) {
        self.min_c = self.min_c.min(c);
        self.max_c = self.max_c.max(c);
    }

    #[inline]
    fn covers(&self, c: i32) -> bool {
        self.min_c <= c && c <= self.max_c
    }

    /// A negative constant always faults, and a span near the full int range
    /// would deoptimize on any real array.
    fn is_guardable(&self) -> bool {
        let distance = (self.max_c as u32).wrapping_sub(self.min_c as u32);
        (self.base.is_some() || self.min_c >= 0) && distance <= MAX_LENGTH_FOR_ADDING_DEOPTIMIZE
    }
}

impl BceVisitor<'_> {
    // =========================================================================
    // Loop-Based Elimination
    // =========================================================================

    /// Replace `check` and its siblings in the same loop by preheader guards.
    pub(super) fn try_loop_dynamic_bce(&mut self, check: InstId) -> bool {
        if !self.config.dynamic {
            return false;
        }
        let block = self.graph.block_of(check);
        let Some(info) = self.graph.loop_of(block).cloned() else {
            return false;
        };
        if !self.dynamic_bce_seems_profitable(&info, block) {
            return false;
        }
        let (index, length) = (self.graph.input(check, 0), self.graph.input(check, 1));
        let Some(request) = self.induction.can_generate_range(self.graph, block, index) else {
            trace!(?check, "induction range not generatable");
            return false;
        };
        if !self.can_handle_infinite_loop(&info, index, request.needs_finite_test)
            || !self.hoist_loop_bound_if_needed(&info)
            || !self.can_handle_length(&info, length, request.needs_taken_test)
        {
            return false;
        }
        self.transform_loop_for_deoptimization_if_needed(&info, request.needs_taken_test);
        self.transform_loop_for_dynamic_bce(&info, check);
        true
    }

    fn dynamic_bce_seems_profitable(&mut self, info: &LoopInfo, block: BlockId) -> bool {
        // An irreducible loop's preheader does not dominate its blocks.
        if info.irreducible || info.suspend_check(self.graph).is_none() {
            return false;
        }
        // A loop that can leave early may not cover the full range.
        if self.is_early_exit_loop(info) {
            trace!(header = ?info.header, "early exit loop");
            return false;
        }
        info.dominates_all_back_edges(self.graph, block)
    }

    pub(super) fn is_early_exit_loop(&mut self, info: &LoopInfo) -> bool {
        if let Some(&cached) = self.early_exit_loops.get(&info.header) {
            return cached;
        }
        let early = info.has_early_exit(self.graph);
        self.early_exit_loops.insert(info.header, early);
        early
    }

    /// A loop that may run forever invalidates a computed range, unless the
    /// guards test the loop control variable itself.
    fn can_handle_infinite_loop(
        &mut self,
        info: &LoopInfo,
        index: InstId,
        needs_finite_test: bool,
    ) -> bool {
        if !needs_finite_test || self.finite_loops.contains(&info.header) {
            return true;
        }
        let Some(control) = self.induction.control(info.header) else {
            return false;
        };
        let condition = control.condition;
        if index == self.graph.input(condition, 0) || index == self.graph.input(condition, 1) {
            self.finite_loops.insert(info.header);
            return true;
        }
        false
    }

    /// Move a header `a.length` loop bound in front of the loop so the taken
    /// test and the guards can read it.
    ///
    /// The header runs whenever the loop is reached, so its null check can
    /// become an unguarded deoptimization in the preheader.
    fn hoist_loop_bound_if_needed(&mut self, info: &LoopInfo) -> bool {
        let Some(control) = self.induction.control(info.header).copied() else {
            return false;
        };
        let (length, null_check, array) = match control.placement {
            BoundPlacement::Invariant => return true,
            BoundPlacement::Variant => return false,
            BoundPlacement::HeaderLength {
                length,
                null_check,
                array,
            } => (length, null_check, array),
        };
        let pre_header = self.pre_header_outside_taken_test(info);
        if let Some(null_check) = null_check {
            if !self.graph.cannot_be_null(array) {
                let null = self.graph.null_constant();
                let guard = self.insert_deopt_in_loop(
                    info,
                    pre_header,
                    CondKind::Equal,
                    array,
                    null,
                    DeoptimizationKind::LoopNullBCE,
                );
                if guard.is_none() {
                    return false;
                }
            }
            self.graph.replace_and_remove(null_check, array);
        }
        move_to_end(self.graph, length, pre_header);
        self.induction.mark_bound_hoisted(info.header);
        debug!(header = ?info.header, ?length, "loop bound hoisted");
        true
    }

    /// The length is invariant already, or becomes so once its null check is
    /// turned into a guard.
    fn can_handle_length(
        &mut self,
        info: &LoopInfo,
        length: InstId,
        needs_taken_test: bool,
    ) -> bool {
        if info.is_defined_out_of_loop(self.graph, length) {
            return true;
        }
        let length_block = self.graph.block_of(length);
        if !matches!(self.graph.op(length), Operator::ArrayLength)
            || self.graph.block(length_block).loop_header != Some(info.header)
        {
            return false;
        }
        let array = self.graph.input(length, 0);
        if !self.can_handle_null_check(info, array, needs_taken_test) {
            return false;
        }
        let target = self.get_pre_header(info, length_block);
        move_to_end(self.graph, length, target);
        trace!(?length, ?target, "length hoisted");
        true
    }

    fn can_handle_null_check(
        &mut self,
        info: &LoopInfo,
        check: InstId,
        needs_taken_test: bool,
    ) -> bool {
        if info.is_defined_out_of_loop(self.graph, check) {
            return true;
        }
        let check_block = self.graph.block_of(check);
        if !matches!(self.graph.op(check), Operator::NullCheck)
            || self.graph.block(check_block).loop_header != Some(info.header)
        {
            return false;
        }
        let array = self.graph.input(check, 0);
        if !info.is_defined_out_of_loop(self.graph, array) {
            return false;
        }
        self.transform_loop_for_deoptimization_if_needed(info, needs_taken_test);
        let block = self.get_pre_header(info, check_block);
        let null = self.graph.null_constant();
        let guard = self.insert_deopt_in_loop(
            info,
            block,
            CondKind::Equal,
            array,
            null,
            DeoptimizationKind::LoopNullBCE,
        );
        if guard.is_none() {
            return false;
        }
        self.graph.replace_and_remove(check, array);
        true
    }

    /// Where code hoisted out of the loop goes: the guarded block of the
    /// taken test if there is one, except that header code always runs and
    /// stays in front of the test.
    pub(super) fn get_pre_header(&self, info: &LoopInfo, block: BlockId) -> BlockId {
        match self.taken_test_block(info.header) {
            Some(_) if block == info.header => self.pre_header_outside_taken_test(info),
            Some(true_block) => true_block,
            None => info.pre_header(self.graph),
        }
    }

    pub(super) fn taken_test_block(&self, header: BlockId) -> Option<BlockId> {
        self.taken_test_loops
            .iter()
            .find(|&&(h, _)| h == header)
            .map(|&(_, true_block)| true_block)
    }

    /// The preheader the loop had before any taken test was inserted.
    fn pre_header_outside_taken_test(&self, info: &LoopInfo) -> BlockId {
        match self.taken_test_block(info.header) {
            Some(true_block) => {
                let if_block = self.graph.block(true_block).predecessors[0];
                self.graph.block(if_block).predecessors[0]
            }
            None => info.pre_header(self.graph),
        }
    }

    /// Insert `if (taken) {} else {}` in front of the loop, once.
    fn transform_loop_for_deoptimization_if_needed(
        &mut self,
        info: &LoopInfo,
        needs_taken_test: bool,
    ) {
        if !needs_taken_test || self.taken_test_block(info.header).is_some() {
            return;
        }
        let Some(control) = self.induction.control(info.header).copied() else {
            return;
        };
        let blocks = self.graph.insert_taken_test(info.header);
        let condition = self
            .induction
            .generate_taken_test(self.graph, &control, blocks.if_block);
        self.graph
            .add(blocks.if_block, Operator::If, DataType::Void, &[condition]);
        self.taken_test_loops.push((info.header, blocks.true_block));
        self.stats.taken_tests += 1;
        debug!(header = ?info.header, true_block = ?blocks.true_block, "taken test inserted");
    }

    /// Collect every check of the loop indexing the same array at
    /// `base + c` and cover them with one set of guards.
    fn transform_loop_for_dynamic_bce(&mut self, info: &LoopInfo, check: InstId) {
        let (index, length) = (self.graph.input(check, 0), self.graph.input(check, 1));
        debug_assert!(info.is_defined_out_of_loop(self.graph, length));
        let mut span = OffsetSpan::of(self.graph, index);

        let mut candidates: Vec<(InstId, RangeRequest)> = Vec::new();
        let mut standby: Vec<(InstId, RangeRequest)> = Vec::new();
        for other in self.live_bounds_checks() {
            let graph = &*self.graph;
            let other_block = graph.block_of(other);
            if graph.block(other_block).loop_header != Some(info.header) {
                continue;
            }
            let (other_index, other_length) = (graph.input(other, 0), graph.input(other, 1));
            let other_value = ValueBound::as_value_bound(graph, other_index);
            if !same_value(graph, Some(length), Some(other_length))
                || other_value.instruction() != span.base
            {
                continue;
            }
            // Every candidate must be able to produce its range.
            let Some(request) = self.induction.can_generate_range(graph, other_block, other_index)
            else {
                continue;
            };
            if !info.dominates_all_back_edges(graph, other_block) {
                standby.push((other, request));
                continue;
            }
            span.widen(other_value.constant());
            candidates.push((other, request));
        }
        for (other, request) in standby {
            let c = ValueBound::as_value_bound(self.graph, self.graph.input(other, 0)).constant();
            if span.covers(c) {
                candidates.push((other, request));
            }
        }

        if !span.is_guardable() {
            trace!(?check, ?span, "loop span refused");
            return;
        }

        let block = self.get_pre_header(info, self.graph.block_of(check));
        let offset_of = |graph: &Graph, id: InstId| {
            ValueBound::as_value_bound(graph, graph.input(id, 0)).constant()
        };
        let Some(max_request) = candidates
            .iter()
            .find(|(other, _)| offset_of(self.graph, *other) == span.max_c)
            .map(|&(_, request)| request)
        else {
            return;
        };
        let min_request = candidates
            .iter()
            .find(|(other, _)| offset_of(self.graph, *other) == span.min_c)
            .map(|&(_, request)| request);
        let min_needed = span.base.is_some() && span.min_c != span.max_c;
        if min_needed && min_request.is_none() {
            return;
        }

        let Some((max_lower, max_upper)) =
            self.induction.generate_range(self.graph, block, &max_request)
        else {
            return;
        };
        let (min_lower, min_upper) = match min_request.filter(|_| min_needed) {
            Some(request) => match self.induction.generate_range(self.graph, block, &request) {
                Some((lower, upper)) => (lower, Some(upper)),
                None => return,
            },
            None => (None, None),
        };

        // Unsigned comparisons also catch wrap-around of the generated values:
        //   constants only:   max_upper >= len
        //   two invariants:   min_upper > max_upper, max_upper >= len
        //   unit strides:     min_lower > max_lower, max_lower > max_upper, max_upper >= len
        let mut guards: Vec<(InstId, InstId, CondKind)> = Vec::new();
        if span.base.is_some() {
            match max_lower {
                None => {
                    if let Some(min_upper) = min_upper {
                        guards.push((min_upper, max_upper, CondKind::Above));
                    }
                }
                Some(max_lower) => {
                    if let Some(min_lower) = min_lower {
                        guards.push((min_lower, max_lower, CondKind::Above));
                    }
                    guards.push((max_lower, max_upper, CondKind::Above));
                }
            }
        }
        guards.push((max_upper, length, CondKind::AboveOrEqual));
        let kind = DeoptimizationKind::LoopBoundsBCE;
        for (lhs, rhs, cond) in guards {
            if self.insert_deopt_in_loop(info, block, cond, lhs, rhs, kind).is_none() {
                return;
            }
        }

        for (other, _) in candidates {
            if self.graph.inst(other).is_removed() {
                continue;
            }
            let other_index = self.graph.input(other, 0);
            self.graph.replace_and_remove(other, other_index);
            self.stats.dynamic_loop += 1;
        }
        debug!(header = ?info.header, ?span, "loop bounds checks replaced by guards");
    }

    /// `if (lhs cond rhs) deoptimize` at the end of `block`, resuming at the
    /// loop entry.
    fn insert_deopt_in_loop(
        &mut self,
        info: &LoopInfo,
        block: BlockId,
        cond: CondKind,
        lhs: InstId,
        rhs: InstId,
        kind: DeoptimizationKind,
    ) -> Option<InstId> {
        let suspend = info.suspend_check(self.graph)?;
        let suspend_inst = self.graph.inst(suspend);
        let dex_pc = suspend_inst.dex_pc;
        let env = suspend_inst.env.clone()?;
        let header = info.header;
        let vregs: Vec<Option<InstId>> = env
            .vregs
            .iter()
            .map(|slot| {
                slot.map(|value| {
                    if self.graph.inst(value).is_phi() && self.graph.block_of(value) == header {
                        self.graph.input(value, 0)
                    } else {
                        value
                    }
                })
            })
            .collect();

        let condition = emit_before_end(
            self.graph,
            block,
            Operator::Condition(cond, ComparisonBias::NoBias),
            DataType::Bool,
            &[lhs, rhs],
        );
        let deopt = emit_before_end(
            self.graph,
            block,
            Operator::Deoptimize(kind),
            DataType::Void,
            &[condition],
        );
        self.graph.inst_mut(condition).dex_pc = dex_pc;
        self.graph.inst_mut(deopt).dex_pc = dex_pc;
        self.graph.set_environment(deopt, Environment::new(vregs, env.dex_pc));
        self.stats.deopts_inserted += 1;
        trace!(?deopt, ?block, kind = kind.name(), "loop guard");
        Some(deopt)
    }

    // =========================================================================
    // Dominator-Based Elimination
    // =========================================================================

    /// Group the checks dominated by each first check of the block and guard
    /// them before it.
    pub(super) fn add_compares_with_deoptimization(&mut self, block: BlockId) {
        let firsts = std::mem::take(&mut self.first_checks);
        for (_, check) in firsts {
            if self.graph.inst(check).is_removed() {
                continue;
            }
            let (index, length) = (self.graph.input(check, 0), self.graph.input(check, 1));
            if !matches!(self.graph.op(length), Operator::ArrayLength) {
                continue;
            }
            let mut span = OffsetSpan::of(self.graph, index);
            let mut candidates: Vec<InstId> = Vec::new();
            let mut standby: Vec<InstId> = Vec::new();
            let exit = self.graph.exit;
            for other in self.live_bounds_checks() {
                let graph = &*self.graph;
                let other_block = graph.block_of(other);
                if !graph.dominates(block, other_block) {
                    continue;
                }
                let (other_index, other_length) = (graph.input(other, 0), graph.input(other, 1));
                let other_value = ValueBound::as_value_bound(graph, other_index);
                if !same_value(graph, Some(length), Some(other_length))
                    || other_value.instruction() != span.base
                {
                    continue;
                }
                // `a[a.length]` always faults.
                if same_value(graph, Some(length), Some(other_index)) {
                    candidates.clear();
                    standby.clear();
                    break;
                }
                // A dominated check may sit under a condition; only take it
                // when both blocks are on every path to the exit.
                if block == other_block
                    || (graph.dominates(block, exit) && graph.dominates(other_block, exit))
                {
                    span.widen(other_value.constant());
                    candidates.push(other);
                } else {
                    standby.push(other);
                }
            }
            for other in standby {
                let c =
                    ValueBound::as_value_bound(self.graph, self.graph.input(other, 0)).constant();
                if span.covers(c) {
                    candidates.push(other);
                }
            }

            let threshold = THRESHOLD_FOR_ADDING_DEOPTIMIZE + usize::from(span.base.is_some());
            if candidates.len() < threshold || !span.is_guardable() {
                trace!(?check, candidates = candidates.len(), "block span refused");
                continue;
            }
            if !self.add_compare_with_deoptimization(check, length, span) {
                continue;
            }
            for other in candidates {
                if self.graph.inst(other).is_removed() {
                    continue;
                }
                let other_index = self.graph.input(other, 0);
                self.graph.replace_and_remove(other, other_index);
                self.stats.dynamic_block += 1;
            }
            debug!(?check, ?span, "block bounds checks replaced by guards");
        }
    }

    /// Guard `[base + min_c, base + max_c]` against `length` before `check`:
    ///   `base + min_c > base + max_c` (unsigned) with a symbolic base, then
    ///   `base + max_c >= length` (unsigned).
    fn add_compare_with_deoptimization(
        &mut self,
        check: InstId,
        length: InstId,
        span: OffsetSpan,
    ) -> bool {
        let Some(env) = self.graph.inst(check).env.clone() else {
            return false;
        };
        let dex_pc = self.graph.inst(check).dex_pc;
        let upper_constant = self.graph.int_constant(span.max_c);
        let upper = match span.base {
            None => upper_constant,
            Some(base) => {
                let min = self.graph.int_constant(span.min_c);
                let add = Operator::Binary(BinaryOp::Add);
                let lower = self
                    .graph
                    .insert_new_before(add.clone(), DataType::Int32, &[base, min], check);
                let upper = self
                    .graph
                    .insert_new_before(add, DataType::Int32, &[base, upper_constant], check);
                self.graph.inst_mut(lower).dex_pc = dex_pc;
                self.graph.inst_mut(upper).dex_pc = dex_pc;
                self.insert_deopt_in_block(check, &env, CondKind::Above, lower, upper);
                upper
            }
        };
        self.insert_deopt_in_block(check, &env, CondKind::AboveOrEqual, upper, length);
        self.has_dom_based_dynamic_bce = true;
        true
    }

    fn insert_deopt_in_block(
        &mut self,
        check: InstId,
        env: &Environment,
        cond: CondKind,
        lhs: InstId,
        rhs: InstId,
    ) {
        let dex_pc = self.graph.inst(check).dex_pc;
        let condition = self.graph.insert_new_before(
            Operator::Condition(cond, ComparisonBias::NoBias),
            DataType::Bool,
            &[lhs, rhs],
            check,
        );
        let deopt = self.graph.insert_new_before(
            Operator::Deoptimize(DeoptimizationKind::BlockBCE),
            DataType::Void,
            &[condition],
            check,
        );
        self.graph.inst_mut(condition).dex_pc = dex_pc;
        self.graph.inst_mut(deopt).dex_pc = dex_pc;
        self.graph.set_environment(deopt, env.clone());
        self.stats.deopts_inserted += 1;
        trace!(?deopt, ?check, "block guard");
    }

    // =========================================================================
    // Array Load Hoisting
    // =========================================================================

    /// Hoist a loop-invariant `ArrayGet` that runs on every iteration out of
    /// a loop that writes no array.
    pub(super) fn visit_array_get(&mut self, get: InstId) {
        if !self.config.hoist_array_gets || self.has_dom_based_dynamic_bce {
            return;
        }
        let block = self.graph.block_of(get);
        let Some(info) = self.graph.loop_of(block).cloned() else {
            return;
        };
        let (array, index) = (self.graph.input(get, 0), self.graph.input(get, 1));
        if !info.is_defined_out_of_loop(self.graph, array)
            || !info.is_defined_out_of_loop(self.graph, index)
        {
            return;
        }
        if loop_writes_memory(self.graph, &info)
            || !info.dominates_all_back_edges(self.graph, block)
            || self.is_early_exit_loop(&info)
        {
            return;
        }
        // The load must not run when the original loop would not have.
        let entered = block == info.header
            || self.taken_test_block(info.header).is_some()
            || self
                .induction
                .control(info.header)
                .is_some_and(|control| !control.needs_taken_test(self.graph));
        if !entered || may_throw_before(self.graph, &info, get) {
            return;
        }
        let target = self.get_pre_header(&info, block);
        move_to_end(self.graph, get, target);
        self.stats.array_gets_hoisted += 1;
        debug!(?get, ?target, "array load hoisted");
    }

    // =========================================================================
    // SSA Repair
    // =========================================================================

    /// Values defined under a taken test reach the loop through
    /// `phi(value, 0)` in the new preheader.
    pub(super) fn insert_phi_nodes(&mut self) {
        for (_, true_block) in self.taken_test_loops.clone() {
            let Some(new_pre_header) = self.graph.block(true_block).single_successor() else {
                continue;
            };
            for inst in self.graph.block(true_block).instructions.clone() {
                let ty = self.graph.ty(inst);
                if ty == DataType::Void {
                    continue;
                }
                let mut merged = None;
                for u in self.graph.uses(inst).to_vec() {
                    if self.graph.block_of(u.user) == true_block {
                        continue;
                    }
                    let phi = *merged
                        .get_or_insert_with(|| new_phi(self.graph, new_pre_header, inst, ty));
                    self.graph.set_input(u.user, u.index as usize, phi);
                }
                for u in self.graph.env_uses(inst).to_vec() {
                    if self.graph.block_of(u.user) == true_block {
                        continue;
                    }
                    let phi = *merged
                        .get_or_insert_with(|| new_phi(self.graph, new_pre_header, inst, ty));
                    if let Some(mut env) = self.graph.inst(u.user).env.clone() {
                        if let Some(slot) = env.vregs.get_mut(u.index as usize) {
                            *slot = Some(phi);
                        }
                        self.graph.set_environment(u.user, env);
                    }
                }
            }
        }
    }
}

/// `phi(value, zero)` with the zero of `ty`, added to `block`.
fn new_phi(graph: &mut Graph, block: BlockId, value: InstId, ty: DataType) -> InstId {
    let zero = match ty {
        DataType::Reference => graph.null_constant(),
        DataType::Float32 => graph.float_constant(0.0),
        DataType::Float64 => graph.double_constant(0.0),
        _ => graph.integral_constant(ty, 0),
    };
    let phi = graph.create(Operator::Phi, ty, &[value, zero]);
    graph.add_phi(block, phi);
    phi
}

fn loop_writes_memory(graph: &Graph, info: &LoopInfo) -> bool {
    info.block_ids().any(|b| {
        graph.block(b).instructions.iter().any(|&i| match graph.op(i) {
            Operator::ArraySet => true,
            Operator::InvokeStaticOrDirect(target) => target.intrinsic.is_none(),
            _ => false,
        })
    })
}

/// Whether something that can throw runs before `id` on its way from the
/// loop header.
fn may_throw_before(graph: &Graph, info: &LoopInfo, id: InstId) -> bool {
    let block = graph.block_of(id);
    let earlier = graph.block(block).instructions.iter().take_while(|&&i| i != id);
    if earlier.clone().any(|&i| graph.op(i).can_throw()) {
        return true;
    }
    let mut current = graph.block(block).dominator;
    while let Some(b) = current.filter(|&b| info.contains(b)) {
        if graph.block(b).instructions.iter().any(|&i| graph.op(i).can_throw()) {
            return true;
        }
        current = graph.block(b).dominator;
    }
    false
}
