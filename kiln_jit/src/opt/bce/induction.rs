//! Induction variable analysis for bounds-check elimination.
//!
//! A loop is analyzable when its header ends in `If(Cond(i, U))` where:
//!
//! - `i = phi(init, i + step)` is a basic induction variable of the header
//!   with a nonzero constant step, the same update on every back edge
//! - exactly one successor of the `If` stays in the loop
//! - the test that keeps the loop running, written with `i` on the left, is
//!   `<`, `<=` or `!=` for an increasing `i` and `>`, `>=` or `!=` for a
//!   decreasing one
//!
//! From the [`LoopControl`] the analysis derives the range of `i + c` in the
//! body, whether that range needs the loop to be known finite, whether the
//! body is known to run at least once, and the code computing the range
//! ahead of the loop.

use rustc_hash::FxHashMap;

use super::bounds::{add_or_sub_constant, ValueBound};
use super::guard_insert::emit_before_end;
use crate::ir::cfg::{BlockId, LoopInfo};
use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::{BinaryOp, ComparisonBias, CondKind, Operator};
use crate::ir::types::DataType;

// =============================================================================
// Induction Variable Types
// =============================================================================

/// Initial value of an induction variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InductionInit {
    Constant(i32),
    /// A loop-invariant value computed before the loop.
    Node(InstId),
}

/// Direction of an induction variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InductionDirection {
    Increasing,
    Decreasing,
}

/// A basic induction variable `phi = phi(init, phi + step)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InductionVariable {
    pub phi: InstId,
    pub init: InductionInit,
    /// The phi input flowing in from the preheader.
    pub entry_value: InstId,
    pub step: i32,
    pub direction: InductionDirection,
    /// The add or subtract feeding the back edges.
    pub update_node: InstId,
}

impl InductionVariable {
    #[inline]
    pub fn is_unit_stride(&self) -> bool {
        self.step == 1 || self.step == -1
    }

    #[inline]
    pub fn constant_init(&self) -> Option<i32> {
        match self.init {
            InductionInit::Constant(c) => Some(c),
            InductionInit::Node(_) => None,
        }
    }

    /// `init` as a bound.
    fn init_bound(&self, graph: &Graph) -> ValueBound {
        match self.init {
            InductionInit::Constant(c) => ValueBound::from_constant(c),
            InductionInit::Node(n) => ValueBound::new(graph, Some(n), 0),
        }
    }
}

/// Detects basic induction variables on loop-header phis.
#[derive(Debug, Default)]
pub struct InductionDetector;

impl InductionDetector {
    pub fn detect(&self, graph: &Graph, phi: InstId) -> Option<InductionVariable> {
        let header = graph.block_of(phi);
        if !graph.inst(phi).is_phi()
            || graph.ty(phi) != DataType::Int32
            || !graph.is_loop_header(header)
        {
            return None;
        }
        let inputs = graph.inst(phi).inputs.to_vec();
        let (&entry_value, back) = inputs.split_first()?;
        let &update_node = back.first()?;
        if back.iter().any(|&v| v != update_node) {
            return None;
        }
        let (base, step) = add_or_sub_constant(graph, update_node)?;
        if base != phi || step == 0 {
            return None;
        }
        let init = match graph.int_value(entry_value) {
            Some(c) => InductionInit::Constant(c),
            None => InductionInit::Node(entry_value),
        };
        let direction = if step > 0 {
            InductionDirection::Increasing
        } else {
            InductionDirection::Decreasing
        };
        Some(InductionVariable {
            phi,
            init,
            entry_value,
            step,
            direction,
            update_node,
        })
    }
}

// =============================================================================
// Loop Control
// =============================================================================

/// Where the loop bound `U` can be evaluated ahead of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundPlacement {
    /// Defined before the loop.
    Invariant,
    /// `ArrayLength` computed in the header of an array defined before the
    /// loop, possibly through a `NullCheck` in the header.
    HeaderLength {
        length: InstId,
        null_check: Option<InstId>,
        array: InstId,
    },
    /// Changes inside the loop.
    Variant,
}

/// The exit test of an analyzable loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopControl {
    pub header: BlockId,
    pub iv: InductionVariable,
    /// Holds while the loop keeps iterating, with the induction phi on the left.
    pub cond: CondKind,
    /// The value `U` the phi is compared against.
    pub bound: InstId,
    pub placement: BoundPlacement,
    /// The header successor inside the loop.
    pub body: BlockId,
    /// The condition instruction of the header `If`.
    pub condition: InstId,
}

/// Range of `phi + c` inside the loop body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InductionRange {
    pub lower: ValueBound,
    pub upper: ValueBound,
    pub needs_finite_test: bool,
    pub needs_taken_test: bool,
}

impl LoopControl {
    fn analyze(graph: &Graph, info: &LoopInfo) -> Option<Self> {
        let header = info.header;
        let last = graph.last_instruction(header)?;
        if !matches!(graph.op(last), Operator::If) {
            return None;
        }
        let condition = graph.input(last, 0);
        let Operator::Condition(kind, _) = *graph.op(condition) else {
            return None;
        };
        if kind.is_unsigned() || graph.ty(graph.input(condition, 0)) != DataType::Int32 {
            return None;
        }
        let (left, right) = (graph.input(condition, 0), graph.input(condition, 1));
        let detector = InductionDetector;
        let in_header = |iv: &InductionVariable| graph.block_of(iv.phi) == header;
        let (iv, kind, bound) = if let Some(iv) = detector.detect(graph, left).filter(in_header) {
            (iv, kind, right)
        } else if let Some(iv) = detector.detect(graph, right).filter(in_header) {
            (iv, kind.mirror(), left)
        } else {
            return None;
        };
        if bound == iv.phi {
            return None;
        }

        let successors = &graph.block(header).successors;
        let (on_true, on_false) = (successors[0], successors[1]);
        let (cond, body) = match (info.contains(on_true), info.contains(on_false)) {
            (true, false) => (kind, on_true),
            (false, true) => (kind.negate(), on_false),
            _ => return None,
        };
        let direction_ok = match iv.direction {
            InductionDirection::Increasing => matches!(
                cond,
                CondKind::LessThan | CondKind::LessThanOrEqual | CondKind::NotEqual
            ),
            InductionDirection::Decreasing => matches!(
                cond,
                CondKind::GreaterThan | CondKind::GreaterThanOrEqual | CondKind::NotEqual
            ),
        };
        if !direction_ok {
            return None;
        }

        Some(LoopControl {
            header,
            iv,
            cond,
            bound,
            placement: bound_placement(graph, info, bound),
            body,
            condition,
        })
    }

    /// Last value the exit test lets through, relative to `U`.
    fn limit_adjustment(&self) -> i32 {
        match self.cond {
            CondKind::LessThan | CondKind::NotEqual if self.iv.step > 0 => -1,
            CondKind::GreaterThan | CondKind::NotEqual => 1,
            _ => 0,
        }
    }

    /// Non-unit strides are trusted only on constants that cannot wrap
    /// before the exit test.
    fn stride_is_safe(&self, graph: &Graph) -> bool {
        if self.iv.is_unit_stride() {
            return true;
        }
        if self.cond == CondKind::NotEqual || self.iv.constant_init().is_none() {
            return false;
        }
        let Some(bound) = graph.int_value(self.bound) else {
            return false;
        };
        let limit = i64::from(bound) + i64::from(self.limit_adjustment());
        let next = limit + i64::from(self.iv.step);
        next >= i64::from(i32::MIN) && next <= i64::from(i32::MAX)
    }

    /// The loop may run forever because the test never fails before the
    /// phi wraps.
    pub fn needs_finite_test(&self, graph: &Graph) -> bool {
        let bound = graph.int_value(self.bound);
        let init = self.iv.constant_init();
        match (self.iv.direction, self.cond) {
            (_, CondKind::LessThan | CondKind::GreaterThan) => false,
            (InductionDirection::Increasing, CondKind::LessThanOrEqual) => {
                !bound.is_some_and(|u| u != i32::MAX)
            }
            (InductionDirection::Decreasing, CondKind::GreaterThanOrEqual) => {
                !bound.is_some_and(|u| u != i32::MIN)
            }
            (InductionDirection::Increasing, _) => {
                !matches!((init, bound), (Some(i), Some(u)) if i <= u)
            }
            (InductionDirection::Decreasing, _) => {
                !matches!((init, bound), (Some(i), Some(u)) if i >= u)
            }
        }
    }

    /// The body may not run at all; provable only for constants.
    pub fn needs_taken_test(&self, graph: &Graph) -> bool {
        match (self.iv.constant_init(), graph.int_value(self.bound)) {
            (Some(init), Some(bound)) => !self.cond.holds(init.cmp(&bound)),
            _ => true,
        }
    }

    /// Range of `phi + offset` in blocks dominated by the body entry.
    pub fn range_of(&self, graph: &Graph, offset: i32) -> Option<InductionRange> {
        if !self.stride_is_safe(graph) {
            return None;
        }
        let init = self.iv.init_bound(graph);
        let bound = ValueBound::new(graph, Some(self.bound), 0);
        let limit = shift(graph, bound, self.limit_adjustment())?;
        let (lower, upper) = match self.iv.direction {
            InductionDirection::Increasing => (init, limit),
            InductionDirection::Decreasing => (limit, init),
        };
        Some(InductionRange {
            lower: shift(graph, lower, offset)?,
            upper: shift(graph, upper, offset)?,
            needs_finite_test: self.needs_finite_test(graph),
            needs_taken_test: self.needs_taken_test(graph),
        })
    }
}

fn shift(graph: &Graph, bound: ValueBound, c: i32) -> Option<ValueBound> {
    let constant = bound.constant().checked_add(c)?;
    Some(ValueBound::new(graph, bound.instruction(), constant))
}

fn bound_placement(graph: &Graph, info: &LoopInfo, bound: InstId) -> BoundPlacement {
    if info.is_defined_out_of_loop(graph, bound) {
        return BoundPlacement::Invariant;
    }
    if !matches!(graph.op(bound), Operator::ArrayLength) || graph.block_of(bound) != info.header {
        return BoundPlacement::Variant;
    }
    let input = graph.input(bound, 0);
    if info.is_defined_out_of_loop(graph, input) {
        return BoundPlacement::HeaderLength {
            length: bound,
            null_check: None,
            array: input,
        };
    }
    if matches!(graph.op(input), Operator::NullCheck) && graph.block_of(input) == info.header {
        let array = graph.input(input, 0);
        if info.is_defined_out_of_loop(graph, array) {
            return BoundPlacement::HeaderLength {
                length: bound,
                null_check: Some(input),
                array,
            };
        }
    }
    BoundPlacement::Variant
}

// =============================================================================
// Induction Analysis
// =============================================================================

/// How an index relates to the loop whose checks are being hoisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexForm {
    /// `phi + offset` for the loop's own unit-stride induction variable.
    Induction { offset: i32 },
    /// `base + offset` with `base` defined before the loop, or a constant.
    Invariant { base: Option<InstId>, offset: i32 },
}

/// An index whose range can be computed ahead of its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub header: BlockId,
    pub form: IndexForm,
    pub needs_finite_test: bool,
    pub needs_taken_test: bool,
}

/// Analyzable loops of a graph, keyed by header.
#[derive(Debug, Default)]
pub struct InductionAnalysis {
    controls: FxHashMap<BlockId, LoopControl>,
}

impl InductionAnalysis {
    pub fn analyze(graph: &Graph) -> Self {
        let controls = graph
            .loops()
            .into_iter()
            .filter(|info| !info.irreducible)
            .filter_map(|info| LoopControl::analyze(graph, info))
            .map(|control| (control.header, control))
            .collect();
        Self { controls }
    }

    #[inline]
    pub fn control(&self, header: BlockId) -> Option<&LoopControl> {
        self.controls.get(&header)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// The bound was moved ahead of the loop.
    pub fn mark_bound_hoisted(&mut self, header: BlockId) {
        if let Some(control) = self.controls.get_mut(&header) {
            control.placement = BoundPlacement::Invariant;
        }
    }

    /// Range of `index` at `block` when it is an induction variable of an
    /// enclosing analyzable loop plus a constant.
    pub fn induction_range(
        &self,
        graph: &Graph,
        block: BlockId,
        index: InstId,
    ) -> Option<InductionRange> {
        let bound = ValueBound::as_value_bound(graph, index);
        let phi = bound.instruction()?;
        if !graph.inst(phi).is_phi() {
            return None;
        }
        let control = self.control(graph.block_of(phi))?;
        if control.iv.phi != phi || !graph.dominates(control.body, block) {
            return None;
        }
        control.range_of(graph, bound.constant())
    }

    /// Whether the range of `index` at `block` can be computed in front of
    /// the innermost loop containing `block`.
    pub fn can_generate_range(
        &self,
        graph: &Graph,
        block: BlockId,
        index: InstId,
    ) -> Option<RangeRequest> {
        let info = graph.loop_of(block)?;
        let control = self.control(info.header)?;
        if control.placement == BoundPlacement::Variant || !graph.dominates(control.body, block) {
            return None;
        }
        let value = ValueBound::as_value_bound(graph, index);
        let offset = value.constant();
        let (form, needs_finite_test) = match value.instruction() {
            None => (IndexForm::Invariant { base: None, offset }, false),
            Some(base) if base == control.iv.phi => {
                if !control.iv.is_unit_stride() {
                    return None;
                }
                (IndexForm::Induction { offset }, control.needs_finite_test(graph))
            }
            Some(base) if info.is_defined_out_of_loop(graph, base) => {
                (IndexForm::Invariant { base: Some(base), offset }, false)
            }
            Some(_) => return None,
        };
        Some(RangeRequest {
            header: info.header,
            form,
            needs_finite_test,
            needs_taken_test: control.needs_taken_test(graph),
        })
    }

    /// Emit `(lower, upper)` of a requested index range at the end of
    /// `block`. Invariant indexes have no separate lower value.
    pub fn generate_range(
        &self,
        graph: &mut Graph,
        block: BlockId,
        request: &RangeRequest,
    ) -> Option<(Option<InstId>, InstId)> {
        match request.form {
            IndexForm::Invariant { base, offset } => {
                Some((None, offset_value(graph, block, base, offset)))
            }
            IndexForm::Induction { offset } => {
                let control = *self.control(request.header)?;
                let init = offset_value(graph, block, Some(control.iv.entry_value), offset);
                let limit_offset = offset.wrapping_add(control.limit_adjustment());
                let limit = offset_value(graph, block, Some(control.bound), limit_offset);
                Some(match control.iv.direction {
                    InductionDirection::Increasing => (Some(init), limit),
                    InductionDirection::Decreasing => (Some(limit), init),
                })
            }
        }
    }

    /// Emit `init OP U` at the end of `if_block`, true when the body runs
    /// at least once.
    pub fn generate_taken_test(
        &self,
        graph: &mut Graph,
        control: &LoopControl,
        if_block: BlockId,
    ) -> InstId {
        graph.add(
            if_block,
            Operator::Condition(control.cond, ComparisonBias::NoBias),
            DataType::Bool,
            &[control.iv.entry_value, control.bound],
        )
    }
}

/// `base + offset` as an instruction at the end of `block`, folding constants.
fn offset_value(graph: &mut Graph, block: BlockId, base: Option<InstId>, offset: i32) -> InstId {
    match base.map(|b| (b, graph.int_value(b))) {
        None => graph.int_constant(offset),
        Some((_, Some(value))) => graph.int_constant(value.wrapping_add(offset)),
        Some((base, None)) if offset == 0 => base,
        Some((base, None)) => {
            let c = graph.int_constant(offset);
            let add = Operator::Binary(BinaryOp::Add);
            emit_before_end(graph, block, add, DataType::Int32, &[base, c])
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
