//! Identities whose result is a constant even when an operand is not.
//!
//! `x & 0`, `x | -1`, `x ^ x`, `x - x`, `x * 0`, the remainder identities,
//! shifts of zero, comparisons against NaN, unsigned comparisons against
//! zero and null tests of values that cannot be null.

use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::{BinaryOp, ComparisonBias, CondKind, Operator};

/// The value a `DivZeroCheck` guards, or `id` itself.
#[inline]
pub(crate) fn strip_div_zero_check(graph: &Graph, id: InstId) -> InstId {
    match graph.op(id) {
        Operator::DivZeroCheck => graph.input(id, 0),
        _ => id,
    }
}

fn is_all_ones(graph: &Graph, id: InstId) -> bool {
    graph.integral_value(id) == Some(-1)
}

fn is_integral_zero(graph: &Graph, id: InstId) -> bool {
    graph.integral_value(id) == Some(0)
}

fn is_nan(graph: &Graph, id: InstId) -> bool {
    graph.inst(id).as_fp_constant().is_some_and(f64::is_nan)
}

/// Constant that `id` always evaluates to, if an absorbing identity applies.
pub fn absorbing_value(graph: &mut Graph, id: InstId) -> Option<InstId> {
    let inst = graph.inst(id);
    if inst.inputs.len() != 2 {
        return None;
    }
    let (lhs, rhs) = (inst.input(0), inst.input(1));
    let ty = inst.ty;

    match inst.op.clone() {
        Operator::Binary(op) if ty.is_integral() => {
            let zero = match op {
                BinaryOp::And | BinaryOp::Mul => {
                    is_integral_zero(graph, lhs) || is_integral_zero(graph, rhs)
                }
                BinaryOp::Xor | BinaryOp::Sub => lhs == rhs,
                BinaryOp::Rem => {
                    let divisor = strip_div_zero_check(graph, rhs);
                    matches!(graph.integral_value(divisor), Some(1) | Some(-1))
                        || is_integral_zero(graph, lhs)
                        || lhs == divisor
                }
                BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr | BinaryOp::Ror => {
                    is_integral_zero(graph, lhs)
                }
                BinaryOp::Or => {
                    if is_all_ones(graph, lhs) || is_all_ones(graph, rhs) {
                        return Some(graph.integral_constant(ty, -1));
                    }
                    false
                }
                BinaryOp::Add | BinaryOp::Div => false,
            };
            zero.then(|| graph.integral_constant(ty, 0))
        }
        Operator::Compare(bias) if bias != ComparisonBias::NoBias => {
            (is_nan(graph, lhs) || is_nan(graph, rhs))
                .then(|| graph.int_constant(bias.unordered_result()))
        }
        Operator::Condition(kind, _) => {
            let operand_ty = graph.ty(lhs);
            let result = if operand_ty.is_integral() {
                match kind {
                    CondKind::Above if is_integral_zero(graph, lhs) => Some(false),
                    CondKind::BelowOrEqual if is_integral_zero(graph, lhs) => Some(true),
                    CondKind::AboveOrEqual if is_integral_zero(graph, rhs) => Some(true),
                    CondKind::Below if is_integral_zero(graph, rhs) => Some(false),
                    _ => None,
                }
            } else if matches!(kind, CondKind::Equal | CondKind::NotEqual) {
                let null_vs_non_null = |a: InstId, b: InstId| {
                    matches!(graph.op(a), Operator::NullConstant) && graph.cannot_be_null(b)
                };
                (null_vs_non_null(lhs, rhs) || null_vs_non_null(rhs, lhs))
                    .then_some(kind == CondKind::NotEqual)
            } else {
                None
            };
            result.map(|value| graph.bool_constant(value))
        }
        _ => None,
    }
}
