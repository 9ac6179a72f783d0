//! Rotate recognition.
//!
//! `(v >>> d) OP (v << e)` with `OP` one of `Or`, `Add`, `Xor` is a right
//! rotate of `v` by `d` when the two distances sum to a multiple of the width.
//! Three shapes of distance pair are recognized:
//!
//! - two constants: `d + e == 0 (mod W)`
//! - `#W - x` paired with `x`, where `#W` is any multiple of `W`
//! - `Neg(x)` paired with `x`
//!
//! The two shifted halves have no bits in common unless the rotate distance
//! is a multiple of `W`, where both halves are `v`. `Or` still yields `v`
//! there but `Add` and `Xor` do not, so those two only accept a constant
//! distance pair whose rotate distance is nonzero.

use super::{remove_if_dead, substitute};
use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::{BinaryOp, Intrinsic, Operator, UnaryOp};
use crate::ir::types::DataType;

/// How the two shift distances relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DistancePair {
    /// Both constant; carries the masked right-rotate distance.
    Constant(u32),
    /// One is `#W - other`.
    RegisterSub,
    /// One is `Neg(other)`.
    RegisterNeg,
}

fn is_binary(graph: &Graph, id: InstId, op: BinaryOp) -> bool {
    graph.op(id) == &Operator::Binary(op)
}

/// `sub` is `#c - other` with `c` a multiple of `bits`.
fn is_width_minus(graph: &Graph, sub: InstId, bits: u32, other: InstId) -> bool {
    is_binary(graph, sub, BinaryOp::Sub)
        && graph.input(sub, 1) == other
        && graph
            .integral_value(graph.input(sub, 0))
            .is_some_and(|c| c & (i64::from(bits) - 1) == 0)
}

fn is_negation_of(graph: &Graph, neg: InstId, other: InstId) -> bool {
    graph.op(neg) == &Operator::Unary(UnaryOp::Neg) && graph.input(neg, 0) == other
}

fn classify(
    graph: &Graph,
    ushr_distance: InstId,
    shl_distance: InstId,
    bits: u32,
) -> Option<DistancePair> {
    let mask = i64::from(bits) - 1;
    if let (Some(right), Some(left)) = (
        graph.integral_value(ushr_distance),
        graph.integral_value(shl_distance),
    ) {
        return (right.wrapping_add(left) & mask == 0)
            .then_some(DistancePair::Constant((right & mask) as u32));
    }
    if is_width_minus(graph, shl_distance, bits, ushr_distance)
        || is_width_minus(graph, ushr_distance, bits, shl_distance)
    {
        return Some(DistancePair::RegisterSub);
    }
    if is_negation_of(graph, shl_distance, ushr_distance)
        || is_negation_of(graph, ushr_distance, shl_distance)
    {
        return Some(DistancePair::RegisterNeg);
    }
    None
}

/// Replace `id`, an `Or`, `Add` or `Xor` of a `UShr` and a `Shl`, with a `Ror`.
///
/// Returns `false` and leaves the graph untouched when the shape does not
/// match or either shift has another use.
pub fn try_replace_with_rotate(graph: &mut Graph, id: InstId, op: BinaryOp) -> bool {
    debug_assert!(matches!(op, BinaryOp::Or | BinaryOp::Add | BinaryOp::Xor));
    let (lhs, rhs) = (graph.input(id, 0), graph.input(id, 1));
    let is_pair = |a, b| is_binary(graph, a, BinaryOp::UShr) && is_binary(graph, b, BinaryOp::Shl);
    let (ushr, shl) = if is_pair(lhs, rhs) {
        (lhs, rhs)
    } else if is_pair(rhs, lhs) {
        (rhs, lhs)
    } else {
        return false;
    };

    let ty = graph.ty(ushr);
    let value = graph.input(ushr, 0);
    if !ty.is_int_or_long()
        || graph.ty(shl) != ty
        || graph.ty(id) != ty
        || graph.input(shl, 0) != value
        || !graph.has_only_one_use(ushr)
        || !graph.has_only_one_use(shl)
    {
        return false;
    }

    let (ushr_distance, shl_distance) = (graph.input(ushr, 1), graph.input(shl, 1));
    let Some(pair) = classify(graph, ushr_distance, shl_distance, ty.bit_width()) else {
        return false;
    };
    let sound = match pair {
        DistancePair::Constant(distance) => op == BinaryOp::Or || distance != 0,
        DistancePair::RegisterSub | DistancePair::RegisterNeg => op == BinaryOp::Or,
    };
    if !sound {
        return false;
    }

    substitute(graph, id, Operator::Binary(BinaryOp::Ror), ty, &[value, ushr_distance]);
    graph.remove(ushr);
    graph.remove(shl);
    remove_if_dead(graph, shl_distance);
    true
}

/// Replace a rotate intrinsic invoke with `Ror`; a left rotate negates the
/// distance first.
pub fn simplify_rotate_intrinsic(graph: &mut Graph, invoke: InstId, intrinsic: Intrinsic) {
    let value = graph.input(invoke, 0);
    let mut distance = graph.input(invoke, 1);
    if matches!(
        intrinsic,
        Intrinsic::IntegerRotateLeft | Intrinsic::LongRotateLeft
    ) {
        distance = graph.insert_new_before(
            Operator::Unary(UnaryOp::Neg),
            DataType::Int32,
            &[distance],
            invoke,
        );
        let dex_pc = graph.inst(invoke).dex_pc;
        graph.inst_mut(distance).dex_pc = dex_pc;
    }
    let ty = match intrinsic {
        Intrinsic::IntegerRotateRight | Intrinsic::IntegerRotateLeft => DataType::Int32,
        Intrinsic::LongRotateRight | Intrinsic::LongRotateLeft => DataType::Int64,
    };
    substitute(graph, invoke, Operator::Binary(BinaryOp::Ror), ty, &[value, distance]);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::fold::{eval_binary, ConstValue};
    use crate::opt::simplify::InstructionSimplifier;
    use crate::opt::testing::{build, find};
    use crate::opt::OptimizationPass;

    fn simplified(source: &str) -> Graph {
        let mut g = build(source);
        InstructionSimplifier::new().run(&mut g);
        g.verify().expect("valid after simplification");
        g
    }

    #[test]
    fn test_constant_rotate_right() {
        let g = simplified(
            ".method static int Main.rotate(int)
                iload 0
                iconst 2
                iushr
                iload 0
                iconst 30
                ishl
                ior
                ireturn
            .end",
        );
        let ror = find(&g, "Ror")[0];
        assert_eq!(g.input(ror, 0), g.parameters()[0]);
        assert_eq!(g.int_value(g.input(ror, 1)), Some(2));
        assert!(find(&g, "UShr").is_empty());
        assert!(find(&g, "Shl").is_empty());
        assert!(find(&g, "Or").is_empty());
    }

    #[test]
    fn test_rotate_of_eight_by_two() {
        let shifted = eval_binary(BinaryOp::UShr, ConstValue::Int(8), ConstValue::Int(2));
        let back = eval_binary(BinaryOp::Shl, ConstValue::Int(8), ConstValue::Int(30));
        let or = eval_binary(BinaryOp::Or, shifted.unwrap(), back.unwrap());
        let ror = eval_binary(BinaryOp::Ror, ConstValue::Int(8), ConstValue::Int(2));
        assert_eq!(or, Some(ConstValue::Int(2)));
        assert_eq!(ror, Some(ConstValue::Int(2)));
    }

    #[test]
    fn test_long_rotate_with_commuted_add() {
        let g = simplified(
            ".method static long Main.rotate(long)
                lload 0
                iconst 56
                lshl
                lload 0
                iconst 8
                lushr
                ladd
                lreturn
            .end",
        );
        let ror = find(&g, "Ror")[0];
        assert_eq!(g.ty(ror), DataType::Int64);
        assert_eq!(g.int_value(g.input(ror, 1)), Some(8));
        assert!(find(&g, "Add").is_empty());
    }

    #[test]
    fn test_add_with_zero_distance_refused() {
        let mut g = build(
            ".method static int Main.f(int)
                iload 0
                iconst 0
                iushr
                iload 0
                iconst 32
                ishl
                iadd
                ireturn
            .end",
        );
        let add = find(&g, "Add")[0];
        assert!(!try_replace_with_rotate(&mut g, add, BinaryOp::Add));
        assert_eq!(find(&g, "UShr").len(), 1);

        let or_src = ".method static int Main.f(int)
                iload 0
                iconst 0
                iushr
                iload 0
                iconst 32
                ishl
                ior
                ireturn
            .end";
        let mut g = build(or_src);
        let or = find(&g, "Or")[0];
        assert!(try_replace_with_rotate(&mut g, or, BinaryOp::Or));
    }

    #[test]
    fn test_register_sub_pattern() {
        let g = simplified(
            ".method static int Main.rotate(int, int)
                iload 0
                iload 1
                iushr
                iload 0
                iconst 32
                iload 1
                isub
                ishl
                ior
                ireturn
            .end",
        );
        let ror = find(&g, "Ror")[0];
        assert_eq!(g.input(ror, 1), g.parameters()[1]);
        assert!(find(&g, "Sub").is_empty());
    }

    #[test]
    fn test_register_neg_pattern_is_left_rotate() {
        let g = simplified(
            ".method static int Main.rotate(int, int)
                iload 0
                iload 1
                ishl
                iload 0
                iload 1
                ineg
                iushr
                ior
                ireturn
            .end",
        );
        let ror = find(&g, "Ror")[0];
        let distance = g.input(ror, 1);
        assert_eq!(g.op(distance), &Operator::Unary(UnaryOp::Neg));
        assert_eq!(g.input(distance, 0), g.parameters()[1]);
    }

    #[test]
    fn test_register_pattern_with_xor_refused() {
        let g = simplified(
            ".method static int Main.f(int, int)
                iload 0
                iload 1
                iushr
                iload 0
                iload 1
                ineg
                ishl
                ixor
                ireturn
            .end",
        );
        assert!(find(&g, "Ror").is_empty());
        assert_eq!(find(&g, "Xor").len(), 1);
    }

    #[test]
    fn test_shared_shift_refused() {
        let g = simplified(
            ".method static int Main.f(int)
                iload 0
                iconst 2
                iushr
                dup
                iload 0
                iconst 30
                ishl
                ior
                iadd
                ireturn
            .end",
        );
        assert!(find(&g, "Ror").is_empty());
    }

    #[test]
    fn test_rotate_intrinsics() {
        let g = simplified(
            ".method static int Main.f(int, int)
                iload 0
                iload 1
                invokestatic int Integer.rotateLeft(int, int)
                ireturn
            .end",
        );
        assert!(find(&g, "InvokeStaticOrDirect").is_empty());
        let ror = find(&g, "Ror")[0];
        let neg = g.input(ror, 1);
        assert_eq!(g.op(neg), &Operator::Unary(UnaryOp::Neg));
        assert_eq!(g.ty(neg), DataType::Int32);

        let g = simplified(
            ".method static long Main.f(long, int)
                lload 0
                iload 1
                invokestatic long Long.rotateRight(long, int)
                lreturn
            .end",
        );
        let ror = find(&g, "Ror")[0];
        assert_eq!(g.ty(ror), DataType::Int64);
        assert_eq!(g.input(ror, 1), g.parameters()[1]);
    }
}
