//! Range propagation and static elimination.
//!
//! [`BceVisitor`] walks blocks in reverse postorder, so every dominator is
//! visited before the blocks it dominates. Ranges are recorded per block and
//! looked up by walking the dominator chain: a range assigned in block `B`
//! holds everywhere `B` dominates.
//!
//! Ranges of array lengths are stored under the array they measure, so a
//! fact learned from one `a.length` read applies to every other read of the
//! same array.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use super::bounds::{
    add_or_sub_constant, hunt_for_declaration, same_value, would_add_overflow_or_underflow,
    MonotonicRange, Range, ValueBound, ValueRange,
};
use super::induction::InductionAnalysis;
use super::{BceConfig, BceStats};
use crate::ir::cfg::BlockId;
use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::{BinaryOp, CondKind, Operator};
use crate::ir::types::DataType;
use crate::opt::fold::absorbing::strip_div_zero_check;

/// Outcome of checking an index against its induction range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InductionFit {
    Fits,
    /// The range certainly leaves the array; guarding it would always deopt.
    OutOfBounds,
    Unknown,
}

/// Key under which the range of `id` is stored.
#[inline]
fn range_key(graph: &Graph, id: InstId) -> InstId {
    match graph.op(id) {
        Operator::ArrayLength => hunt_for_declaration(graph, id),
        _ => id,
    }
}

// =============================================================================
// Visitor State
// =============================================================================

/// State of one bounds-check elimination run over a graph.
pub(super) struct BceVisitor<'g> {
    pub(super) graph: &'g mut Graph,
    pub(super) config: BceConfig,
    pub(super) induction: InductionAnalysis,

    /// Ranges proven at the start of each block.
    ranges: FxHashMap<BlockId, FxHashMap<InstId, Range>>,

    /// First surviving check of the current block against each length,
    /// keyed by the array the length measures.
    pub(super) first_checks: Vec<(InstId, InstId)>,

    pub(super) early_exit_loops: FxHashMap<BlockId, bool>,
    /// Loop header and the guarded block of its taken test.
    pub(super) taken_test_loops: Vec<(BlockId, BlockId)>,
    /// Loops whose exit test is known to stop the loop.
    pub(super) finite_loops: FxHashSet<BlockId>,
    /// A dominator-based guard has been inserted.
    pub(super) has_dom_based_dynamic_bce: bool,

    pub(super) stats: BceStats,
}

impl<'g> BceVisitor<'g> {
    pub(super) fn new(graph: &'g mut Graph, config: BceConfig) -> Self {
        let induction = InductionAnalysis::analyze(graph);
        trace!(loops = induction.len(), "induction analysis");
        Self {
            graph,
            config,
            induction,
            ranges: FxHashMap::default(),
            first_checks: Vec::new(),
            early_exit_loops: FxHashMap::default(),
            taken_test_loops: Vec::new(),
            finite_loops: FxHashSet::default(),
            has_dom_based_dynamic_bce: false,
            stats: BceStats::default(),
        }
    }

    /// Visit every block that existed when the run started.
    pub(super) fn run(mut self) -> BceStats {
        let order = self.graph.reverse_post_order().to_vec();
        for block in order {
            if self.graph.block(block).removed {
                continue;
            }
            self.visit_block(block);
        }
        self.insert_phi_nodes();
        self.graph.rebuild_analyses();
        self.stats.kept = self.graph.count_named("BoundsCheck");
        self.stats
    }

    fn visit_block(&mut self, block: BlockId) {
        self.first_checks.clear();
        for phi in self.graph.block(block).phis.clone() {
            if !self.graph.inst(phi).is_removed() {
                self.visit_phi(phi);
            }
        }
        for id in self.graph.block(block).instructions.clone() {
            // Earlier visits may have removed or hoisted it.
            if self.graph.inst(id).is_removed() || self.graph.block_of(id) != block {
                continue;
            }
            self.visit_instruction(id);
        }
        if self.config.dynamic {
            self.add_compares_with_deoptimization(block);
        }
    }

    fn visit_instruction(&mut self, id: InstId) {
        match self.graph.op(id) {
            Operator::If => self.visit_if(id),
            Operator::BoundsCheck => self.visit_bounds_check(id),
            Operator::ArrayGet => self.visit_array_get(id),
            Operator::NewArray => self.visit_new_array(id),
            Operator::Binary(BinaryOp::Add) => self.visit_add(id),
            Operator::Binary(BinaryOp::Sub) => self.visit_sub(id),
            Operator::Binary(BinaryOp::And) => self.visit_and(id),
            Operator::Binary(BinaryOp::Rem) => self.visit_rem(id),
            Operator::Binary(BinaryOp::Div | BinaryOp::Shr | BinaryOp::UShr) => {
                self.find_and_handle_partial_array_length(id)
            }
            _ => {}
        }
    }

    // =========================================================================
    // Range Map
    // =========================================================================

    /// Range of `id` at the start of `block`, from the nearest dominator that
    /// knows one.
    pub(super) fn lookup(&self, id: InstId, block: BlockId) -> Option<Range> {
        let key = range_key(self.graph, id);
        let mut current = Some(block);
        while let Some(b) = current {
            if let Some(range) = self.ranges.get(&b).and_then(|map| map.get(&key)) {
                return Some(*range);
            }
            current = self.graph.block(b).dominator;
        }
        None
    }

    fn assign(&mut self, block: BlockId, id: InstId, range: Range) {
        let key = range_key(self.graph, id);
        trace!(?block, ?id, ?range, "range");
        self.ranges.entry(block).or_default().insert(key, range);
    }

    /// Replace a check proven redundant by its index.
    fn eliminate_statically(&mut self, check: InstId) {
        let index = self.graph.input(check, 0);
        debug!(?check, "bounds check eliminated");
        self.graph.replace_and_remove(check, index);
        self.stats.static_eliminated += 1;
    }

    // =========================================================================
    // Range Sources
    // =========================================================================

    fn visit_phi(&mut self, phi: InstId) {
        let graph = &*self.graph;
        let block = graph.block_of(phi);
        if graph.ty(phi) != DataType::Int32 || !graph.is_loop_header(block) {
            return;
        }
        let inputs = graph.inst(phi).inputs.to_vec();
        if inputs.len() < 2 || inputs[2..].iter().any(|&v| v != inputs[1]) {
            return;
        }
        let Some((left, increment)) = add_or_sub_constant(graph, inputs[1]) else {
            return;
        };
        if left != phi {
            return;
        }
        let initial = inputs[0];
        let range = if increment == 0 {
            let fixed = ValueBound::new(graph, Some(initial), 0);
            Range::Plain(ValueRange::new(fixed, fixed))
        } else {
            let bound = ValueBound::detect_from_value(graph, initial).unwrap_or_else(|| {
                match (self.lookup(initial, block), increment > 0) {
                    (Some(r), true) => r.lower(),
                    (Some(r), false) => r.upper(),
                    (None, true) => ValueBound::MIN,
                    (None, false) => ValueBound::MAX,
                }
            });
            Range::Monotonic(MonotonicRange {
                phi,
                initial,
                increment,
                bound,
            })
        };
        self.assign(block, phi, range);
    }

    fn visit_if(&mut self, id: InstId) {
        let condition = self.graph.input(id, 0);
        let Operator::Condition(cond, _) = *self.graph.op(condition) else {
            return;
        };
        let (left, right) = (self.graph.input(condition, 0), self.graph.input(condition, 1));
        if self.graph.ty(left) != DataType::Int32 {
            return;
        }
        if self.graph.int_value(left).is_none() {
            self.handle_if(id, left, right, cond);
        }
        if self.graph.int_value(right).is_none() {
            self.handle_if(id, right, left, cond.mirror());
        }
    }

    /// Narrow `left` in both successors of `if_id`, which tests
    /// `left cond right`.
    fn handle_if(&mut self, if_id: InstId, left: InstId, right: InstId, cond: CondKind) {
        let block = self.graph.block_of(if_id);
        let (on_true, on_false) = {
            let successors = &self.graph.block(block).successors;
            (successors[0], successors[1])
        };

        let left_range = self.lookup(left, block);
        if let Some(Range::Monotonic(m)) = left_range {
            // Only the test in the loop header sees every value of the phi.
            if self.graph.block_of(m.phi) != block {
                return;
            }
        }

        let (lower, upper) = match ValueBound::detect_from_value(self.graph, right) {
            Some(bound) => (bound, bound),
            None => match (self.lookup(right, block), left_range) {
                (Some(Range::Monotonic(rm)), Some(Range::Monotonic(lm))) => {
                    self.handle_if_between_two_monotonic_ranges(if_id, left, right, cond, lm, rm);
                    return;
                }
                (Some(range), _) => (range.lower(), range.upper()),
                (None, _) => (ValueBound::MIN, ValueBound::MAX),
            },
        };

        let graph = &*self.graph;
        let mut pushes: Vec<(BlockId, ValueRange)> = Vec::new();
        match cond {
            CondKind::LessThan | CondKind::LessThanOrEqual => {
                if upper != ValueBound::MAX {
                    let compensation = if cond == CondKind::LessThan { -1 } else { 0 };
                    let Ok(new_upper) = upper.add(graph, compensation) else {
                        return;
                    };
                    pushes.push((on_true, ValueRange::new(ValueBound::MIN, new_upper)));
                }
                // A length is not a useful lower bound.
                if lower != ValueBound::MIN && !lower.is_related_to_array_length(graph) {
                    let compensation = if cond == CondKind::LessThanOrEqual { 1 } else { 0 };
                    let Ok(new_lower) = lower.add(graph, compensation) else {
                        return;
                    };
                    pushes.push((on_false, ValueRange::new(new_lower, ValueBound::MAX)));
                }
            }
            CondKind::GreaterThan | CondKind::GreaterThanOrEqual => {
                if lower != ValueBound::MIN && !lower.is_related_to_array_length(graph) {
                    let compensation = if cond == CondKind::GreaterThan { 1 } else { 0 };
                    let Ok(new_lower) = lower.add(graph, compensation) else {
                        return;
                    };
                    pushes.push((on_true, ValueRange::new(new_lower, ValueBound::MAX)));
                }
                if upper != ValueBound::MAX {
                    let compensation = if cond == CondKind::GreaterThanOrEqual { -1 } else { 0 };
                    let Ok(new_upper) = upper.add(graph, compensation) else {
                        return;
                    };
                    pushes.push((on_false, ValueRange::new(ValueBound::MIN, new_upper)));
                }
            }
            CondKind::Equal | CondKind::NotEqual => {
                let (equal_side, unequal_side) = if cond == CondKind::Equal {
                    (on_true, on_false)
                } else {
                    (on_false, on_true)
                };
                if matches!(graph.op(left), Operator::ArrayLength) {
                    if lower.is_constant() && upper.is_constant() {
                        if lower != ValueBound::MIN || upper != ValueBound::MAX {
                            pushes.push((equal_side, ValueRange::new(lower, upper)));
                        }
                        if lower.constant() == 0 && upper.constant() == 0 {
                            pushes.push((
                                unequal_side,
                                ValueRange::new(ValueBound::from_constant(1), ValueBound::MAX),
                            ));
                        }
                    }
                } else if lower.is_related_to_array_length(graph) && lower == upper {
                    // `x == a.length` makes `x` an alias of the length.
                    pushes.push((equal_side, ValueRange::new(lower, upper)));
                }
            }
            _ => {}
        }
        for (successor, range) in pushes {
            self.apply_range_from_comparison(left, block, successor, range);
        }
    }

    /// `i < j` with `i` counting up from a constant and `j` counting down
    /// from `a.length - c` narrows both at once.
    fn handle_if_between_two_monotonic_ranges(
        &mut self,
        if_id: InstId,
        left: InstId,
        right: InstId,
        cond: CondKind,
        left_range: MonotonicRange,
        right_range: MonotonicRange,
    ) {
        let block = self.graph.block_of(if_id);
        if block != self.graph.block_of(left) {
            return;
        }
        let graph = &*self.graph;
        let handled = left_range.increment == 1
            && left_range.bound.is_constant()
            && right_range.increment == -1
            && right_range.bound.is_related_to_array_length(graph)
            && right_range.bound.constant() < 0;
        if !handled {
            return;
        }
        let successors = &graph.block(block).successors;
        // Crossing counters may skip past each other on `==` and `!=`.
        let (successor, left_compensation, right_compensation) = match cond {
            CondKind::LessThan => (successors[0], -1, 1),
            CondKind::LessThanOrEqual => (successors[0], 0, 0),
            CondKind::GreaterThan => (successors[1], 0, 0),
            CondKind::GreaterThanOrEqual => (successors[1], -1, 1),
            _ => return,
        };
        let new_left = right_range
            .bound
            .add(graph, left_compensation)
            .ok()
            .map(|upper| ValueRange::new(left_range.bound, upper));
        let new_right = left_range
            .bound
            .add(graph, right_compensation)
            .ok()
            .map(|lower| ValueRange::new(lower, right_range.bound));
        if let Some(range) = new_left {
            self.apply_range_from_comparison(left, block, successor, range);
        }
        if let Some(range) = new_right {
            self.apply_range_from_comparison(right, block, successor, range);
        }
    }

    /// Narrow the range `id` has at the end of `block` and push it into
    /// `successor`.
    fn apply_range_from_comparison(
        &mut self,
        id: InstId,
        block: BlockId,
        successor: BlockId,
        range: ValueRange,
    ) {
        // The fact only holds on the edge; a merge point sees other edges too.
        if self.graph.block(successor).predecessors.len() != 1 {
            return;
        }
        let narrowed = match self.lookup(id, block) {
            None => Range::Plain(range),
            Some(existing) => {
                if let Range::Monotonic(m) = existing {
                    if self.graph.block_of(m.phi) != block {
                        return;
                    }
                }
                existing.narrow(self.graph, &Range::Plain(range))
            }
        };
        self.assign(successor, id, narrowed);
    }

    // =========================================================================
    // Range Transfer
    // =========================================================================

    fn visit_add(&mut self, add: InstId) {
        let graph = &*self.graph;
        if graph.ty(add) != DataType::Int32 {
            return;
        }
        let Some(c) = graph.int_value(graph.input(add, 1)) else {
            return;
        };
        let block = graph.block_of(add);
        let range = self
            .lookup(graph.input(add, 0), block)
            .and_then(|left| left.add(graph, c));
        if let Some(range) = range {
            self.assign(block, add, Range::Plain(range));
        }
    }

    fn visit_sub(&mut self, sub: InstId) {
        let graph = &*self.graph;
        if graph.ty(sub) != DataType::Int32 {
            return;
        }
        let block = graph.block_of(sub);
        let (mut left, right) = (graph.input(sub, 0), graph.input(sub, 1));

        if let Some(c) = graph.int_value(right) {
            let range = c.checked_neg().and_then(|neg| {
                self.lookup(left, block)
                    .and_then(|left_range| left_range.add(graph, neg))
            });
            if let Some(range) = range {
                self.assign(block, sub, Range::Plain(range));
                return;
            }
        }

        // `a.length + c0 - v` with `v` in `[c1, a.length + c2]`, as in the
        // triangular inner loop `j < a.length - i`.
        let mut c0 = 0;
        if let Some((base, c)) = add_or_sub_constant(graph, left) {
            left = base;
            c0 = c;
        }
        if !matches!(graph.op(left), Operator::ArrayLength) {
            return;
        }
        let Some(right_range) = self.lookup(right, block) else {
            return;
        };
        let (lower, upper) = (right_range.lower(), right_range.upper());
        if !lower.is_constant()
            || !upper.is_related_to_array_length(graph)
            || !same_value(graph, Some(left), upper.instruction())
        {
            return;
        }
        let (c1, c2) = (lower.constant(), upper.constant());
        let (Some(neg_c1), Some(neg_c2)) = (c1.checked_neg(), c2.checked_neg()) else {
            return;
        };
        if would_add_overflow_or_underflow(c0, neg_c2)
            || would_add_overflow_or_underflow(c0, neg_c1)
        {
            return;
        }
        if c0 - c1 <= 0 {
            let range = ValueRange::new(
                ValueBound::from_constant(c0 - c2),
                ValueBound::new(graph, Some(left), c0 - c1),
            );
            self.assign(block, sub, Range::Plain(range));
        }
    }

    /// `(a.length + c) / k`, `>> k` and `>>> k` with `c <= 1` never exceed
    /// the length.
    fn find_and_handle_partial_array_length(&mut self, id: InstId) {
        let graph = &*self.graph;
        if graph.ty(id) != DataType::Int32 {
            return;
        }
        let op = match graph.op(id) {
            Operator::Binary(op) => *op,
            _ => return,
        };
        let Some(divisor) = graph.int_value(strip_div_zero_check(graph, graph.input(id, 1))) else {
            return;
        };
        let too_small = match op {
            BinaryOp::Div => divisor <= 1,
            _ => divisor < 1,
        };
        if too_small {
            return;
        }
        let (mut left, mut c) = (graph.input(id, 0), 0);
        if let Some((base, offset)) = add_or_sub_constant(graph, left) {
            left = base;
            c = offset;
        }
        if !matches!(graph.op(left), Operator::ArrayLength) || c > 1 {
            return;
        }
        // `(len - 3) >>> k` is huge when `len < 3`.
        if op == BinaryOp::UShr && c < 0 {
            return;
        }
        let range = ValueRange::new(ValueBound::MIN, ValueBound::new(graph, Some(left), 0));
        let block = graph.block_of(id);
        self.assign(block, id, Range::Plain(range));
    }

    fn visit_and(&mut self, and: InstId) {
        let graph = &*self.graph;
        if graph.ty(and) != DataType::Int32 {
            return;
        }
        if let Some(mask) = graph.int_value(graph.input(and, 1)).filter(|&m| m > 0) {
            let range =
                ValueRange::new(ValueBound::from_constant(0), ValueBound::from_constant(mask));
            let block = graph.block_of(and);
            self.assign(block, and, Range::Plain(range));
        }
    }

    fn visit_rem(&mut self, rem: InstId) {
        let graph = &*self.graph;
        if graph.ty(rem) != DataType::Int32 {
            return;
        }
        let block = graph.block_of(rem);
        let left = graph.input(rem, 0);
        // A length that passed its zero check is positive.
        let right = strip_div_zero_check(graph, graph.input(rem, 1));

        let range = if let Some(divisor) = graph.int_value(right) {
            // The sign of the divisor does not matter.
            let Some(magnitude) = divisor.checked_abs().filter(|&m| m != 0) else {
                return;
            };
            ValueRange::new(
                ValueBound::from_constant(1 - magnitude),
                ValueBound::from_constant(magnitude - 1),
            )
        } else if matches!(graph.op(right), Operator::ArrayLength) {
            ValueRange::new(ValueBound::MIN, ValueBound::new(graph, Some(right), -1))
        } else {
            return;
        };
        let narrowed = match self.lookup(left, block) {
            Some(Range::Plain(left_range)) => range.narrow(graph, &left_range),
            _ => range,
        };
        self.assign(block, rem, Range::Plain(narrowed));
    }

    /// `new T[n + c]` succeeded, so `-c <= n <= length - c`.
    fn visit_new_array(&mut self, new_array: InstId) {
        let graph = &*self.graph;
        let length = graph.input(new_array, 0);
        if graph.int_value(length).is_some() {
            return;
        }
        let Some((left, c)) = add_or_sub_constant(graph, length) else {
            return;
        };
        let Some(neg_c) = c.checked_neg() else {
            return;
        };
        let block = graph.block_of(new_array);
        let range = Range::Plain(ValueRange::new(
            ValueBound::from_constant(neg_c),
            ValueBound::new(graph, Some(new_array), neg_c),
        ));
        let range = match self.lookup(left, block) {
            Some(existing) => existing.narrow(graph, &range),
            None => range,
        };
        self.assign(block, left, range);
    }

    // =========================================================================
    // Bounds Checks
    // =========================================================================

    fn visit_bounds_check(&mut self, check: InstId) {
        let block = self.graph.block_of(check);
        let (index, length) = (self.graph.input(check, 0), self.graph.input(check, 1));
        let mut try_dynamic = self.config.dynamic;

        if let Some(constant) = self.graph.int_value(index) {
            if constant < 0 {
                trace!(?check, "negative constant index always faults");
                return;
            }
            if let Some(known_length) = self.graph.int_value(length) {
                if constant < known_length {
                    self.eliminate_statically(check);
                }
                return;
            }
            if let Some(existing) = self.lookup(length, block) {
                let lower = existing.lower();
                if lower.is_constant() && constant < lower.constant() {
                    self.eliminate_statically(check);
                    return;
                }
            }
            // `a[k]` passing means `a.length >= k + 1` from here on.
            if constant == i32::MAX {
                return;
            }
            let range = ValueRange::new(ValueBound::from_constant(constant + 1), ValueBound::MAX);
            self.assign(block, length, Range::Plain(range));
        } else {
            let zero = ValueBound::from_constant(0);
            let array_range = ValueRange::new(zero, ValueBound::new(self.graph, Some(length), -1));
            if let Some(index_range) = self.lookup(index, block) {
                if index_range.fits_in(self.graph, &array_range) {
                    self.eliminate_statically(check);
                    return;
                }
                if index_range.is_constant_range() {
                    let known = self
                        .lookup(length, block)
                        .filter(Range::is_constant_range)
                        .and_then(|r| r.lower().add(self.graph, -1).ok());
                    if let Some(last) = known {
                        if index_range.fits_in(self.graph, &ValueRange::new(zero, last)) {
                            self.eliminate_statically(check);
                            return;
                        }
                    }
                }
            }
            match self.induction_range_fits_in(&array_range, check) {
                InductionFit::Fits => {
                    self.eliminate_statically(check);
                    return;
                }
                InductionFit::OutOfBounds => {
                    trace!(?check, "induction range leaves the array");
                    try_dynamic = false;
                }
                InductionFit::Unknown => {}
            }
        }

        if !try_dynamic {
            return;
        }
        if self.try_loop_dynamic_bce(check) {
            return;
        }
        // Remember the first check against each length for the block pass.
        if matches!(self.graph.op(length), Operator::ArrayLength) {
            let key = hunt_for_declaration(self.graph, length);
            if !self.first_checks.iter().any(|&(k, _)| k == key) {
                self.first_checks.push((key, check));
            }
        }
    }

    fn induction_range_fits_in(&self, array_range: &ValueRange, check: InstId) -> InductionFit {
        let graph = &*self.graph;
        let block = graph.block_of(check);
        let Some(range) = self.induction.induction_range(graph, block, graph.input(check, 0)) else {
            return InductionFit::Unknown;
        };
        let index_range = ValueRange::new(range.lower, range.upper);
        if index_range.lower.less_than(graph, &array_range.lower)
            || index_range.upper.greater_than(graph, &array_range.upper)
        {
            InductionFit::OutOfBounds
        } else if !range.needs_finite_test && index_range.fits_in(graph, array_range) {
            InductionFit::Fits
        } else {
            InductionFit::Unknown
        }
    }

    /// Live bounds checks, in block order.
    pub(super) fn live_bounds_checks(&self) -> Vec<InstId> {
        self.graph
            .all_instructions()
            .into_iter()
            .filter(|&id| matches!(self.graph.op(id), Operator::BoundsCheck))
            .collect()
    }
}
