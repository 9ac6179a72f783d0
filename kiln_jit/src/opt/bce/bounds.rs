//! Value bounds and ranges.
//!
//! A [`ValueBound`] is either a constant `c` or `instruction + c`. Two
//! bounds are comparable when they are both constants or refer to the same
//! value; array lengths are compared through the array they measure, so
//! `a.length` read twice is still one value.
//!
//! A [`ValueRange`] is a pair of inclusive bounds. A [`MonotonicRange`]
//! describes a loop-header phi that only moves in one direction; it carries
//! no useful bounds of its own until a comparison in the loop header narrows
//! it into a plain range.

use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::{BinaryOp, Operator};
use crate::ir::types::DataType;

// =============================================================================
// Helpers
// =============================================================================

#[inline]
pub fn would_add_overflow_or_underflow(a: i32, b: i32) -> bool {
    a.checked_add(b).is_none()
}

/// Follow `ArrayLength`, `NullCheck` and `NewArray` back to the value that
/// defines the array (or its allocated size).
pub fn hunt_for_declaration(graph: &Graph, mut id: InstId) -> InstId {
    loop {
        match graph.op(id) {
            Operator::ArrayLength | Operator::NullCheck | Operator::NewArray => {
                id = graph.input(id, 0);
            }
            _ => return id,
        }
    }
}

/// Whether two optional bound instructions denote the same value.
pub fn same_value(graph: &Graph, a: Option<InstId>, b: Option<InstId>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a == b || hunt_for_declaration(graph, a) == hunt_for_declaration(graph, b)
        }
        _ => false,
    }
}

/// Decompose `((x + c1) - c2) ...` into `(x, c1 - c2 ...)`.
///
/// Only `Int32` adds and subtracts with a constant right operand are walked;
/// the walk stops before the accumulated constant would wrap.
pub fn add_or_sub_constant(graph: &Graph, mut id: InstId) -> Option<(InstId, i32)> {
    let mut base = None;
    let mut offset = 0i32;
    loop {
        let op = match graph.op(id) {
            Operator::Binary(op @ (BinaryOp::Add | BinaryOp::Sub)) => *op,
            _ => break,
        };
        if graph.ty(id) != DataType::Int32 {
            break;
        }
        let Some(value) = graph.int_value(graph.input(id, 1)) else {
            break;
        };
        let c = if op == BinaryOp::Add {
            Some(value)
        } else {
            value.checked_neg()
        };
        match c.and_then(|c| offset.checked_add(c)) {
            Some(sum) => {
                offset = sum;
                id = graph.input(id, 0);
                base = Some(id);
            }
            None => break,
        }
    }
    base.map(|b| (b, offset))
}

// =============================================================================
// Value Bound
// =============================================================================

/// Why adding to a bound gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundOverflow {
    Overflow,
    Underflow,
}

/// `instruction + constant`, or a plain constant when `instruction` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueBound {
    instruction: Option<InstId>,
    constant: i32,
}

impl ValueBound {
    pub const MIN: ValueBound = ValueBound::from_constant(i32::MIN);
    pub const MAX: ValueBound = ValueBound::from_constant(i32::MAX);

    #[inline]
    pub const fn from_constant(constant: i32) -> Self {
        Self {
            instruction: None,
            constant,
        }
    }

    /// `instruction + constant`, folding an `IntConstant` instruction into
    /// the constant part when that does not wrap.
    pub fn new(graph: &Graph, instruction: Option<InstId>, constant: i32) -> Self {
        if let Some(value) = instruction.and_then(|i| graph.int_value(i)) {
            if let Some(sum) = value.checked_add(constant) {
                return Self::from_constant(sum);
            }
        }
        Self {
            instruction,
            constant,
        }
    }

    #[inline]
    pub fn instruction(&self) -> Option<InstId> {
        self.instruction
    }

    #[inline]
    pub fn constant(&self) -> i32 {
        self.constant
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        self.instruction.is_none()
    }

    /// `NewArray` bounds stand for the length of the new array.
    pub fn is_related_to_array_length(&self, graph: &Graph) -> bool {
        self.instruction
            .is_some_and(|i| matches!(graph.op(i), Operator::ArrayLength | Operator::NewArray))
    }

    /// The bound a value trivially has: itself, split into `x + c` if possible.
    pub fn as_value_bound(graph: &Graph, id: InstId) -> Self {
        if let Some(value) = graph.int_value(id) {
            return Self::from_constant(value);
        }
        match add_or_sub_constant(graph, id) {
            Some((base, c)) => Self::new(graph, Some(base), c),
            None => Self::new(graph, Some(id), 0),
        }
    }

    /// A bound worth comparing against: a constant, `a.length` or
    /// `a.length + c`.
    pub fn detect_from_value(graph: &Graph, id: InstId) -> Option<Self> {
        if let Some(value) = graph.int_value(id) {
            return Some(Self::from_constant(value));
        }
        if matches!(graph.op(id), Operator::ArrayLength) {
            return Some(Self::new(graph, Some(id), 0));
        }
        match add_or_sub_constant(graph, id) {
            Some((base, c)) if matches!(graph.op(base), Operator::ArrayLength) => {
                Some(Self::new(graph, Some(base), c))
            }
            _ => None,
        }
    }

    /// Certainly `self >= other`.
    pub fn greater_than_or_equal_to(&self, graph: &Graph, other: &ValueBound) -> bool {
        same_value(graph, self.instruction, other.instruction) && self.constant >= other.constant
    }

    /// Certainly `self <= other`.
    pub fn less_than_or_equal_to(&self, graph: &Graph, other: &ValueBound) -> bool {
        same_value(graph, self.instruction, other.instruction) && self.constant <= other.constant
    }

    /// Certainly `self > other`.
    pub fn greater_than(&self, graph: &Graph, other: &ValueBound) -> bool {
        same_value(graph, self.instruction, other.instruction) && self.constant > other.constant
    }

    /// Certainly `self < other`.
    pub fn less_than(&self, graph: &Graph, other: &ValueBound) -> bool {
        same_value(graph, self.instruction, other.instruction) && self.constant < other.constant
    }

    /// The tighter of two lower bounds; a constant wins when incomparable.
    pub fn narrow_lower(graph: &Graph, a: ValueBound, b: ValueBound) -> ValueBound {
        if a.greater_than_or_equal_to(graph, &b) {
            a
        } else if b.greater_than_or_equal_to(graph, &a) {
            b
        } else if a.is_constant() {
            a
        } else {
            b
        }
    }

    /// The tighter of two upper bounds; an array length wins when
    /// incomparable.
    pub fn narrow_upper(graph: &Graph, a: ValueBound, b: ValueBound) -> ValueBound {
        if a.less_than_or_equal_to(graph, &b) {
            a
        } else if b.less_than_or_equal_to(graph, &a) {
            b
        } else if a.is_related_to_array_length(graph) {
            a
        } else {
            b
        }
    }

    /// Shift the bound by `c`.
    ///
    /// Fails when the result might wrap. `a.length + c` never overflows for
    /// `c <= 0` and never underflows at all.
    pub fn add(&self, graph: &Graph, c: i32) -> Result<ValueBound, BoundOverflow> {
        if c == 0 {
            return Ok(*self);
        }
        let Some(sum) = self.constant.checked_add(c) else {
            return Err(if c > 0 {
                BoundOverflow::Overflow
            } else {
                BoundOverflow::Underflow
            });
        };
        let shifted = ValueBound {
            instruction: self.instruction,
            constant: sum,
        };
        if c > 0 {
            if self.is_constant() || (self.is_related_to_array_length(graph) && sum <= 0) {
                return Ok(shifted);
            }
            Err(BoundOverflow::Overflow)
        } else {
            if self.is_constant() || self.is_related_to_array_length(graph) {
                return Ok(shifted);
            }
            Err(BoundOverflow::Underflow)
        }
    }
}

// =============================================================================
// Value Range
// =============================================================================

/// Inclusive `[lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRange {
    pub lower: ValueBound,
    pub upper: ValueBound,
}

impl ValueRange {
    #[inline]
    pub const fn new(lower: ValueBound, upper: ValueBound) -> Self {
        Self { lower, upper }
    }

    #[inline]
    pub const fn full() -> Self {
        Self::new(ValueBound::MIN, ValueBound::MAX)
    }

    #[inline]
    pub fn is_constant_range(&self) -> bool {
        self.lower.is_constant() && self.upper.is_constant()
    }

    /// Certainly contained in `other`.
    pub fn fits_in(&self, graph: &Graph, other: &ValueRange) -> bool {
        self.lower.greater_than_or_equal_to(graph, &other.lower)
            && self.upper.less_than_or_equal_to(graph, &other.upper)
    }

    /// Intersection, picking either bound where they are incomparable.
    pub fn narrow(&self, graph: &Graph, other: &ValueRange) -> ValueRange {
        ValueRange::new(
            ValueBound::narrow_lower(graph, self.lower, other.lower),
            ValueBound::narrow_upper(graph, self.upper, other.upper),
        )
    }

    /// Shift both bounds by `c`.
    ///
    /// `None` when the lower bound may underflow or the upper bound may
    /// overflow, since a wrapped bound invalidates the other one.
    pub fn add(&self, graph: &Graph, c: i32) -> Option<ValueRange> {
        let lower = match self.lower.add(graph, c) {
            Ok(bound) => bound,
            Err(BoundOverflow::Underflow) => return None,
            Err(BoundOverflow::Overflow) => ValueBound::MAX,
        };
        let upper = match self.upper.add(graph, c) {
            Ok(bound) => bound,
            Err(BoundOverflow::Overflow) => return None,
            Err(BoundOverflow::Underflow) => ValueBound::MIN,
        };
        Some(ValueRange::new(lower, upper))
    }
}

// =============================================================================
// Monotonic Range
// =============================================================================

/// A loop-header phi `i = phi(initial, i + increment)`.
///
/// The phi may wrap, so on its own the range says nothing. A comparison in
/// the loop header narrows it once overflow before the exit test is ruled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonotonicRange {
    pub phi: InstId,
    pub initial: InstId,
    pub increment: i32,
    /// Lower bound when increasing, upper bound when decreasing.
    pub bound: ValueBound,
}

impl MonotonicRange {
    /// Narrow by a comparison that holds inside the loop.
    pub fn narrow(&self, graph: &Graph, range: &ValueRange) -> Range {
        if self.increment > 0 {
            let lower = ValueBound::narrow_lower(graph, self.bound, range.lower);
            if !lower.is_constant() || lower.constant() == i32::MIN {
                return Range::Monotonic(*self);
            }

            // Largest value the exit test still lets through.
            let upper = if range.upper.is_constant() {
                range.upper.constant()
            } else if range.upper.is_related_to_array_length(graph) && range.upper.constant() <= 0 {
                i32::MAX + range.upper.constant()
            } else {
                i32::MAX
            };

            let last = match graph.int_value(self.initial) {
                Some(initial) if upper > initial => {
                    let span = i64::from(upper) - i64::from(initial);
                    let steps = span / i64::from(self.increment);
                    i64::from(initial) + steps * i64::from(self.increment)
                }
                _ => i64::from(upper),
            };
            if last <= i64::from(i32::MAX) - i64::from(self.increment) {
                return Range::Plain(ValueRange::new(lower, range.upper));
            }
            Range::Monotonic(*self)
        } else {
            let upper = ValueBound::narrow_upper(graph, self.bound, range.upper);
            let useful = (upper.is_constant() && upper.constant() != i32::MAX)
                || upper.is_related_to_array_length(graph);
            if !useful {
                return Range::Monotonic(*self);
            }
            let lowest = i64::from(i32::MIN) - i64::from(self.increment);
            if range.lower.is_constant() && i64::from(range.lower.constant()) >= lowest {
                return Range::Plain(ValueRange::new(range.lower, upper));
            }
            Range::Monotonic(*self)
        }
    }
}

// =============================================================================
// Range
// =============================================================================

/// What is known about one value in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    Plain(ValueRange),
    Monotonic(MonotonicRange),
}

impl Range {
    #[inline]
    pub fn lower(&self) -> ValueBound {
        match self {
            Range::Plain(r) => r.lower,
            Range::Monotonic(_) => ValueBound::MIN,
        }
    }

    #[inline]
    pub fn upper(&self) -> ValueBound {
        match self {
            Range::Plain(r) => r.upper,
            Range::Monotonic(_) => ValueBound::MAX,
        }
    }

    #[inline]
    pub fn as_plain(&self) -> ValueRange {
        ValueRange::new(self.lower(), self.upper())
    }

    #[inline]
    pub fn as_monotonic(&self) -> Option<&MonotonicRange> {
        match self {
            Range::Monotonic(m) => Some(m),
            Range::Plain(_) => None,
        }
    }

    #[inline]
    pub fn is_constant_range(&self) -> bool {
        matches!(self, Range::Plain(r) if r.is_constant_range())
    }

    /// A monotonic range never certainly fits anywhere.
    pub fn fits_in(&self, graph: &Graph, other: &ValueRange) -> bool {
        match self {
            Range::Plain(r) => r.fits_in(graph, other),
            Range::Monotonic(_) => false,
        }
    }

    /// Narrow by another range; a monotonic argument carries nothing.
    pub fn narrow(&self, graph: &Graph, other: &Range) -> Range {
        let Range::Plain(other) = other else {
            return *self;
        };
        match self {
            Range::Plain(r) => Range::Plain(r.narrow(graph, other)),
            Range::Monotonic(m) => m.narrow(graph, other),
        }
    }

    pub fn add(&self, graph: &Graph, c: i32) -> Option<ValueRange> {
        self.as_plain().add(graph, c)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::testing::{build, find};

    fn array_graph() -> (Graph, InstId, InstId) {
        let g = build(
            ".method static int Main.f(int[], int)
                aload 0
                arraylength
                aload 0
                arraylength
                iadd
                iload 1
                iadd
                ireturn
            .end",
        );
        let lengths = find(&g, "ArrayLength");
        (g, lengths[0], lengths[1])
    }

    #[test]
    fn test_constant_instruction_is_folded() {
        let mut g = array_graph().0;
        let five = g.int_constant(5);
        let bound = ValueBound::new(&g, Some(five), 2);
        assert!(bound.is_constant());
        assert_eq!(bound.constant(), 7);
    }

    #[test]
    fn test_two_length_reads_compare_equal() {
        let (g, len1, len2) = array_graph();
        let a = ValueBound::new(&g, Some(len1), -1);
        let b = ValueBound::new(&g, Some(len2), 0);
        assert!(a.less_than(&g, &b));
        assert!(b.greater_than_or_equal_to(&g, &a));
        assert!(!a.greater_than(&g, &ValueBound::from_constant(-10)));
    }

    #[test]
    fn test_add_on_array_length() {
        let (g, len, _) = array_graph();
        let bound = ValueBound::new(&g, Some(len), -2);
        assert_eq!(bound.add(&g, 2).map(|b| b.constant()), Ok(0));
        assert_eq!(bound.add(&g, 3), Err(BoundOverflow::Overflow));
        assert!(bound.add(&g, i32::MIN + 5).is_ok());

        let param = ValueBound::new(&g, Some(g.parameters()[1]), 0);
        assert_eq!(param.add(&g, 1), Err(BoundOverflow::Overflow));
        assert_eq!(param.add(&g, -1), Err(BoundOverflow::Underflow));
        assert_eq!(ValueBound::MAX.add(&g, 1), Err(BoundOverflow::Overflow));
    }

    #[test]
    fn test_narrowing_prefers_constants_and_lengths() {
        let (g, len, _) = array_graph();
        let param = ValueBound::new(&g, Some(g.parameters()[1]), 0);
        let zero = ValueBound::from_constant(0);
        assert_eq!(ValueBound::narrow_lower(&g, param, zero), zero);
        let length = ValueBound::new(&g, Some(len), -1);
        assert_eq!(ValueBound::narrow_upper(&g, param, length), length);
        assert_eq!(
            ValueBound::narrow_upper(
                &g,
                ValueBound::from_constant(3),
                ValueBound::from_constant(9)
            ),
            ValueBound::from_constant(3)
        );
    }

    #[test]
    fn test_range_add_and_fit() {
        let (g, len, len2) = array_graph();
        let index =
            ValueRange::new(ValueBound::from_constant(0), ValueBound::new(&g, Some(len), -2));
        let shifted = index.add(&g, 1).unwrap_or(ValueRange::full());
        let array =
            ValueRange::new(ValueBound::from_constant(0), ValueBound::new(&g, Some(len2), -1));
        assert!(shifted.fits_in(&g, &array));
        assert!(index.add(&g, 3).is_none());
        assert!(index.add(&g, -1).is_some_and(|r| !r.fits_in(&g, &array)));
    }

    #[test]
    fn test_add_or_sub_chain() {
        let g = build(
            ".method static int Main.f(int)
                iload 0
                iconst 3
                iadd
                iconst 5
                isub
                ireturn
            .end",
        );
        let sub = find(&g, "Sub")[0];
        assert_eq!(add_or_sub_constant(&g, sub), Some((g.parameters()[0], -2)));
        assert_eq!(add_or_sub_constant(&g, g.parameters()[0]), None);
    }

    #[test]
    fn test_monotonic_narrowing_checks_overflow() {
        let (mut g, len, _) = array_graph();
        let zero = g.int_constant(0);
        let phi = g.parameters()[1];
        let up = MonotonicRange {
            phi,
            initial: zero,
            increment: 1,
            bound: ValueBound::from_constant(0),
        };
        let below_len = ValueRange::new(ValueBound::MIN, ValueBound::new(&g, Some(len), -1));
        assert_eq!(
            up.narrow(&g, &below_len),
            Range::Plain(ValueRange::new(ValueBound::from_constant(0), below_len.upper))
        );

        // `i <= MAX` never stops an increasing sequence.
        let unbounded = ValueRange::new(ValueBound::MIN, ValueBound::MAX);
        assert_eq!(up.narrow(&g, &unbounded), Range::Monotonic(up));

        // Stride 2 from 0 ends at MAX - 1 and wraps.
        let two = MonotonicRange { increment: 2, ..up };
        let near_max = ValueRange::new(ValueBound::MIN, ValueBound::from_constant(i32::MAX - 1));
        assert_eq!(two.narrow(&g, &near_max), Range::Monotonic(two));

        let down = MonotonicRange {
            increment: -1,
            bound: ValueBound::new(&g, Some(len), -1),
            ..up
        };
        let non_negative = ValueRange::new(ValueBound::from_constant(0), ValueBound::MAX);
        assert_eq!(
            down.narrow(&g, &non_negative),
            Range::Plain(ValueRange::new(ValueBound::from_constant(0), down.bound))
        );
    }
}
