//! Architecture-independent instruction simplifier.
//!
//! Canonicalizes operand order, removes neutral elements, turns
//! multiplications by powers of two into shifts, merges a `Compare` into the
//! condition that tests it, drops guards that cannot fail and recognizes
//! rotates (see [`rotate`]).
//!
//! Every rewrite either reuses an existing value or replaces the instruction
//! with a new one; instructions are never mutated into a different operator.
//! The pass sweeps the graph in reverse postorder until nothing changes.

pub mod rotate;

use tracing::{debug, trace};

use super::fold::absorbing::strip_div_zero_check;
use super::OptimizationPass;
use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::{BinaryOp, CondKind, Operator, UnaryOp};
use crate::ir::types::DataType;

// =============================================================================
// Helpers
// =============================================================================

/// Replace `old` with a new instruction at the same position and dex pc.
pub(crate) fn substitute(
    graph: &mut Graph,
    old: InstId,
    op: Operator,
    ty: DataType,
    inputs: &[InstId],
) -> InstId {
    let new = graph.create(op, ty, inputs);
    graph.inst_mut(new).dex_pc = graph.inst(old).dex_pc;
    graph.replace_with_new(old, new);
    new
}

/// Remove `id` if it is a pure instruction nothing refers to any more.
pub(crate) fn remove_if_dead(graph: &mut Graph, id: InstId) {
    let inst = graph.inst(id);
    if !inst.is_removed()
        && !inst.is_constant()
        && inst.op.is_removable_when_unused()
        && !graph.has_uses(id)
        && !graph.has_env_uses(id)
    {
        graph.remove(id);
    }
}

#[inline]
fn fp_value(graph: &Graph, id: InstId) -> Option<f64> {
    graph.inst(id).as_fp_constant()
}

// =============================================================================
// Pass
// =============================================================================

/// Instruction simplifier pass.
#[derive(Debug, Default)]
pub struct InstructionSimplifier {
    stats: SimplifyStats,
}

/// Counts of applied rewrites.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimplifyStats {
    pub simplified: usize,
    pub rotates: usize,
    pub intrinsics: usize,
}

impl SimplifyStats {
    #[inline]
    pub fn total(&self) -> usize {
        self.simplified + self.rotates + self.intrinsics
    }
}

impl InstructionSimplifier {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn stats(&self) -> &SimplifyStats {
        &self.stats
    }

    fn sweep(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        for block in graph.reverse_post_order().to_vec() {
            for id in graph.block(block).instructions.clone() {
                if graph.inst(id).is_removed() || graph.block_of(id) != block {
                    continue;
                }
                changed |= self.visit(graph, id);
            }
        }
        changed
    }

    fn visit(&mut self, graph: &mut Graph, id: InstId) -> bool {
        match graph.op(id).clone() {
            Operator::Binary(op) => self.visit_binary(graph, id, op),
            Operator::Unary(op) => self.visit_unary(graph, id, op),
            Operator::Condition(kind, _) => self.visit_condition(graph, id, kind),
            Operator::NullCheck => {
                let object = graph.input(id, 0);
                if !graph.cannot_be_null(object) {
                    return false;
                }
                trace!(check = ?id, "null check of non-null value");
                self.replace(graph, id, object)
            }
            Operator::ArrayLength => {
                let mut array = graph.input(id, 0);
                if matches!(graph.op(array), Operator::NullCheck) {
                    array = graph.input(array, 0);
                }
                if !matches!(graph.op(array), Operator::NewArray) {
                    return false;
                }
                let length = graph.input(array, 0);
                self.replace(graph, id, length)
            }
            Operator::TypeConversion => {
                let value = graph.input(id, 0);
                if graph.ty(value) != graph.ty(id) {
                    return false;
                }
                self.replace(graph, id, value)
            }
            Operator::InvokeStaticOrDirect(target) => match target.intrinsic {
                Some(intrinsic) => {
                    rotate::simplify_rotate_intrinsic(graph, id, intrinsic);
                    debug!(invoke = ?id, intrinsic = intrinsic.name(), "intrinsic to Ror");
                    self.stats.intrinsics += 1;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Replace `id` by the existing value `value`.
    fn replace(&mut self, graph: &mut Graph, id: InstId, value: InstId) -> bool {
        trace!(inst = ?id, op = %graph.op(id), ?value, "replaced by existing value");
        graph.replace_and_remove(id, value);
        self.stats.simplified += 1;
        true
    }

    fn rewrite(
        &mut self,
        graph: &mut Graph,
        id: InstId,
        op: Operator,
        inputs: &[InstId],
    ) -> bool {
        let ty = graph.ty(id);
        trace!(inst = ?id, from = %graph.op(id), to = %op, "rewritten");
        substitute(graph, id, op, ty, inputs);
        self.stats.simplified += 1;
        true
    }

    fn visit_binary(&mut self, graph: &mut Graph, id: InstId, op: BinaryOp) -> bool {
        let mut lhs = graph.input(id, 0);
        let mut rhs = graph.input(id, 1);
        let ty = graph.ty(id);
        let integral = ty.is_integral();
        let mut changed = false;

        if op.is_commutative()
            && graph.inst(lhs).is_constant()
            && !graph.inst(rhs).is_constant()
        {
            graph.set_input(id, 0, rhs);
            graph.set_input(id, 1, lhs);
            std::mem::swap(&mut lhs, &mut rhs);
            self.stats.simplified += 1;
            changed = true;
        }

        let rhs_value = graph.integral_value(rhs).filter(|_| integral);
        let neg = Operator::Unary(UnaryOp::Neg);
        let rewritten = match op {
            BinaryOp::Add => match rhs_value {
                Some(0) => self.replace(graph, id, lhs),
                _ => self.try_rotate(graph, id, op),
            },
            BinaryOp::Sub => match (graph.integral_value(lhs).filter(|_| integral), rhs_value) {
                (_, Some(0)) => self.replace(graph, id, lhs),
                (Some(0), _) => self.rewrite(graph, id, neg, &[rhs]),
                _ => false,
            },
            BinaryOp::Mul => match rhs_value {
                Some(1) => self.replace(graph, id, lhs),
                Some(-1) => self.rewrite(graph, id, neg, &[lhs]),
                Some(c) if c > 1 && (c as u64).is_power_of_two() => {
                    let distance = graph.int_constant(c.trailing_zeros() as i32);
                    self.rewrite(graph, id, Operator::Binary(BinaryOp::Shl), &[lhs, distance])
                }
                _ if fp_value(graph, rhs) == Some(1.0) => self.replace(graph, id, lhs),
                _ => false,
            },
            BinaryOp::Div => {
                let divisor = strip_div_zero_check(graph, rhs);
                match graph.integral_value(divisor).filter(|_| integral) {
                    Some(1) => self.replace(graph, id, lhs),
                    Some(-1) => self.rewrite(graph, id, neg, &[lhs]),
                    _ if fp_value(graph, rhs) == Some(1.0) => self.replace(graph, id, lhs),
                    _ => false,
                }
            }
            BinaryOp::Or => match rhs_value {
                Some(0) => self.replace(graph, id, lhs),
                _ if lhs == rhs => self.replace(graph, id, lhs),
                _ => self.try_rotate(graph, id, op),
            },
            BinaryOp::Xor => match rhs_value {
                Some(0) => self.replace(graph, id, lhs),
                Some(-1) => self.rewrite(graph, id, Operator::Unary(UnaryOp::Not), &[lhs]),
                _ => self.try_rotate(graph, id, op),
            },
            BinaryOp::And => match rhs_value {
                Some(-1) => self.replace(graph, id, lhs),
                _ if lhs == rhs => self.replace(graph, id, lhs),
                _ => false,
            },
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr | BinaryOp::Ror => {
                let mask = i64::from(ty.bit_width()) - 1;
                match graph.integral_value(rhs) {
                    Some(distance) if integral && distance & mask == 0 => {
                        self.replace(graph, id, lhs)
                    }
                    _ => false,
                }
            }
            BinaryOp::Rem => false,
        };
        changed | rewritten
    }

    fn try_rotate(&mut self, graph: &mut Graph, id: InstId, op: BinaryOp) -> bool {
        if rotate::try_replace_with_rotate(graph, id, op) {
            debug!(inst = ?id, op = op.name(), "shift pair to Ror");
            self.stats.rotates += 1;
            return true;
        }
        false
    }

    fn visit_unary(&mut self, graph: &mut Graph, id: InstId, op: UnaryOp) -> bool {
        let value = graph.input(id, 0);
        if graph.op(value) == &Operator::Unary(op) {
            let inner = graph.input(value, 0);
            self.replace(graph, id, inner);
            remove_if_dead(graph, value);
            return true;
        }
        false
    }

    /// `Cond(Compare(a, b), 0)` to `Cond(a, b)`, carrying the compare's bias.
    fn visit_condition(&mut self, graph: &mut Graph, id: InstId, kind: CondKind) -> bool {
        let (lhs, rhs) = (graph.input(id, 0), graph.input(id, 1));
        let (compare, kind) = match (graph.op(lhs), graph.op(rhs)) {
            (Operator::Compare(_), _) if graph.int_value(rhs) == Some(0) => (lhs, kind),
            (_, Operator::Compare(_)) if graph.int_value(lhs) == Some(0) => (rhs, kind.mirror()),
            _ => return false,
        };
        if !graph.has_only_one_use(compare) {
            return false;
        }
        let Operator::Compare(bias) = *graph.op(compare) else {
            return false;
        };
        let (a, b) = (graph.input(compare, 0), graph.input(compare, 1));
        substitute(graph, id, Operator::Condition(kind, bias), DataType::Bool, &[a, b]);
        graph.remove(compare);
        trace!(cond = ?id, "compare merged into condition");
        self.stats.simplified += 1;
        true
    }
}

impl OptimizationPass for InstructionSimplifier {
    fn name(&self) -> &'static str {
        "instruction_simplifier"
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let before = self.stats.total();
        while self.sweep(graph) {}
        debug!(rewrites = self.stats.total() - before, "instruction simplifier done");
        self.stats.total() != before
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::ComparisonBias;
    use crate::opt::testing::{build, find};

    fn simplified(source: &str) -> Graph {
        let mut g = build(source);
        InstructionSimplifier::new().run(&mut g);
        g.verify().expect("valid after simplification");
        g
    }

    fn returned(g: &Graph) -> InstId {
        g.input(find(g, "Return")[0], 0)
    }

    #[test]
    fn test_add_zero_removed() {
        let g = simplified(
            ".method static int Main.f(int)
                iload 0
                iconst 0
                iadd
                ireturn
            .end",
        );
        assert_eq!(returned(&g), g.parameters()[0]);
        assert!(find(&g, "Add").is_empty());
    }

    #[test]
    fn test_constant_moved_right() {
        let g = simplified(
            ".method static int Main.f(int)
                iconst 3
                iload 0
                iadd
                ireturn
            .end",
        );
        let add = find(&g, "Add")[0];
        assert_eq!(g.input(add, 0), g.parameters()[0]);
        assert_eq!(g.int_value(g.input(add, 1)), Some(3));
    }

    #[test]
    fn test_mul_power_of_two_becomes_shift() {
        let g = simplified(
            ".method static long Main.f(long)
                lload 0
                lconst 8
                lmul
                lreturn
            .end",
        );
        assert!(find(&g, "Mul").is_empty());
        let shl = find(&g, "Shl")[0];
        assert_eq!(g.ty(shl), DataType::Int64);
        assert_eq!(g.int_value(g.input(shl, 1)), Some(3));
    }

    #[test]
    fn test_negations_collapse() {
        let g = simplified(
            ".method static int Main.f(int)
                iload 0
                iconst -1
                imul
                ineg
                ireturn
            .end",
        );
        assert_eq!(returned(&g), g.parameters()[0]);
        assert!(find(&g, "Neg").is_empty());
        assert!(find(&g, "Mul").is_empty());
    }

    #[test]
    fn test_zero_minus_x_is_neg() {
        let g = simplified(
            ".method static int Main.f(int)
                iconst 0
                iload 0
                isub
                ireturn
            .end",
        );
        assert_eq!(g.op(returned(&g)), &Operator::Unary(UnaryOp::Neg));
    }

    #[test]
    fn test_xor_all_ones_is_not() {
        let g = simplified(
            ".method static int Main.f(int)
                iload 0
                iconst -1
                ixor
                ireturn
            .end",
        );
        assert_eq!(g.op(returned(&g)), &Operator::Unary(UnaryOp::Not));
    }

    #[test]
    fn test_div_by_one_through_check() {
        let g = simplified(
            ".method static int Main.f(int)
                iload 0
                iconst 1
                idiv
                ireturn
            .end",
        );
        assert_eq!(returned(&g), g.parameters()[0]);
        assert!(find(&g, "Div").is_empty());
    }

    #[test]
    fn test_float_add_zero_kept() {
        // -0.0 + 0.0 is +0.0, so the add is not an identity.
        let g = simplified(
            ".method static float Main.f(float)
                fload 0
                fconst 0
                fadd
                freturn
            .end",
        );
        assert_eq!(find(&g, "Add").len(), 1);
    }

    #[test]
    fn test_shift_by_width_removed() {
        let g = simplified(
            ".method static int Main.f(int)
                iload 0
                iconst 32
                ishl
                ireturn
            .end",
        );
        assert_eq!(returned(&g), g.parameters()[0]);
    }

    #[test]
    fn test_compare_merged_into_condition() {
        let g = simplified(
            ".method static int Main.f(float, float)
                fload 0
                fload 1
                fcmpg
                ifgt yes
                iconst 0
                ireturn
            yes:
                iconst 1
                ireturn
            .end",
        );
        assert!(find(&g, "Compare").is_empty());
        let cond = find(&g, "GreaterThan")[0];
        assert_eq!(
            g.op(cond),
            &Operator::Condition(CondKind::GreaterThan, ComparisonBias::GtBias)
        );
        assert_eq!(g.input(cond, 0), g.parameters()[0]);
        assert_eq!(g.input(cond, 1), g.parameters()[1]);
    }

    #[test]
    fn test_new_array_length_and_null_check() {
        let g = simplified(
            ".method static int Main.f(int)
                iload 0
                newarray int
                arraylength
                ireturn
            .end",
        );
        assert_eq!(returned(&g), g.parameters()[0]);
        assert!(find(&g, "NullCheck").is_empty());
        assert!(find(&g, "ArrayLength").is_empty());
    }

    #[test]
    fn test_simplifier_reaches_fixpoint() {
        let mut g = build(
            ".method static int Main.f(int)
                iconst 2
                iload 0
                imul
                iconst 0
                ior
                ireturn
            .end",
        );
        let mut pass = InstructionSimplifier::new();
        assert!(pass.run(&mut g));
        assert!(!pass.run(&mut g));
        assert_eq!(find(&g, "Shl").len(), 1);
        assert!(find(&g, "Or").is_empty());
    }
}
