//! Arm64 instruction simplifier.
//!
//! Folds a shift by a constant or an integral conversion into the operand of
//! the data-processing instructions that consume it:
//!
//! ```text
//!   s = Shl(x, #3)
//!   a = Add(y, s)          ==>   a = DataProcWithShifterOp [y, x] kind:Add+LSL shift:3
//!   b = Sub(z, s)                b = DataProcWithShifterOp [z, x] kind:Sub+LSL shift:3
//! ```
//!
//! The bitfield op merges into all of its users or into none, so it always
//! disappears when merged. Extensions are only encodable on `Add` and `Sub`.

use tracing::{debug, trace};

use super::simplify::substitute;
use super::OptimizationPass;
use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::{
    BinaryOp, DataProcKind, Operator, ShifterOpKind, ShifterOperation, UnaryOp,
};
use crate::ir::types::DataType;

// =============================================================================
// Operand Encoding
// =============================================================================

/// Shifter operand a bitfield op can be encoded as, with its shift amount.
pub fn shifter_operand_of(graph: &Graph, id: InstId) -> Option<(ShifterOpKind, u32)> {
    match graph.op(id) {
        Operator::Binary(op @ (BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr)) => {
            let distance = graph.int_value(graph.input(id, 1))?;
            let mask = graph.ty(id).bit_width() - 1;
            let kind = match op {
                BinaryOp::Shl => ShifterOpKind::Lsl,
                BinaryOp::Shr => ShifterOpKind::Asr,
                _ => ShifterOpKind::Lsr,
            };
            Some((kind, distance as u32 & mask))
        }
        Operator::TypeConversion => {
            let result = graph.ty(id);
            let input = graph.ty(graph.input(id, 0));
            if !result.is_integral() || !input.is_integral() || result == input {
                return None;
            }
            Some((extension_kind(input, result), 0))
        }
        _ => None,
    }
}

/// Encoding of an integral conversion from `input` to `result`.
fn extension_kind(input: DataType, result: DataType) -> ShifterOpKind {
    // Narrowing a long to an int reads the low word as is.
    if result == DataType::Int32 && input == DataType::Int64 {
        return ShifterOpKind::Lsl;
    }
    let widens = input.size() < result.size();
    if result == DataType::Uint8 || (input == DataType::Uint8 && widens) {
        ShifterOpKind::Uxtb
    } else if result == DataType::Uint16 || (input == DataType::Uint16 && widens) {
        ShifterOpKind::Uxth
    } else {
        match input.size().min(result.size()) {
            1 => ShifterOpKind::Sxtb,
            2 => ShifterOpKind::Sxth,
            _ => ShifterOpKind::Sxtw,
        }
    }
}

/// Data-processing kind of an instruction with a shifter operand.
fn data_proc_kind(op: &Operator) -> Option<DataProcKind> {
    Some(match op {
        Operator::Binary(BinaryOp::Add) => DataProcKind::Add,
        Operator::Binary(BinaryOp::Sub) => DataProcKind::Sub,
        Operator::Binary(BinaryOp::And) => DataProcKind::And,
        Operator::Binary(BinaryOp::Or) => DataProcKind::Or,
        Operator::Binary(BinaryOp::Xor) => DataProcKind::Xor,
        Operator::Unary(UnaryOp::Neg) => DataProcKind::Neg,
        _ => return None,
    })
}

/// `neg` aliases `sub` with the zero register, which the extended-register
/// form reads as the stack pointer.
#[inline]
fn supports_extension(kind: DataProcKind) -> bool {
    matches!(kind, DataProcKind::Add | DataProcKind::Sub)
}

/// How a user would be rewritten: its kind and the operand that stays.
#[derive(Debug, Clone, Copy)]
struct Merge {
    user: InstId,
    kind: DataProcKind,
    /// `None` stands for the zero of a `Neg`.
    other: Option<InstId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    NoUses,
    EnvironmentUse,
    UnsupportedUser,
    SameInputs,
    LeftOperand,
    Extension,
}

fn plan_merge(
    graph: &Graph,
    op: InstId,
    op_kind: ShifterOpKind,
    user: InstId,
) -> Result<Merge, Refusal> {
    let kind = data_proc_kind(graph.op(user)).ok_or(Refusal::UnsupportedUser)?;
    if !matches!(graph.ty(user), DataType::Int32 | DataType::Int64) {
        return Err(Refusal::UnsupportedUser);
    }
    let other = if kind == DataProcKind::Neg {
        None
    } else {
        let (left, right) = (graph.input(user, 0), graph.input(user, 1));
        if left == right {
            return Err(Refusal::SameInputs);
        }
        let commutative = matches!(graph.op(user), Operator::Binary(b) if b.is_commutative());
        if right == op {
            Some(left)
        } else if commutative {
            Some(right)
        } else {
            return Err(Refusal::LeftOperand);
        }
    };
    if op_kind.is_extension() && !supports_extension(kind) {
        return Err(Refusal::Extension);
    }
    Ok(Merge { user, kind, other })
}

// =============================================================================
// Pass
// =============================================================================

/// Statistics from the Arm64 simplifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arm64Stats {
    /// Bitfield ops merged into their users.
    pub ops_merged: usize,
    /// Users rewritten into `DataProcWithShifterOp`.
    pub users_rewritten: usize,
    /// Eligible bitfield ops left alone.
    pub refused: usize,
}

impl Arm64Stats {
    #[inline]
    pub fn total(&self) -> usize {
        self.ops_merged + self.users_rewritten
    }
}

/// Shifter-operand fusion for Arm64.
#[derive(Debug, Default)]
pub struct InstructionSimplifierArm64 {
    stats: Arm64Stats,
}

impl InstructionSimplifierArm64 {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn stats(&self) -> &Arm64Stats {
        &self.stats
    }

    fn try_merge_into_users(&mut self, graph: &mut Graph, op: InstId) -> Result<(), Refusal> {
        let Some((op_kind, shift)) = shifter_operand_of(graph, op) else {
            return Ok(());
        };
        if graph.has_env_uses(op) {
            return Err(Refusal::EnvironmentUse);
        }
        let mut users: Vec<InstId> = graph.uses(op).iter().map(|u| u.user).collect();
        if users.is_empty() {
            return Err(Refusal::NoUses);
        }
        users.dedup();
        let merges = users
            .iter()
            .map(|&user| plan_merge(graph, op, op_kind, user))
            .collect::<Result<Vec<_>, _>>()?;

        let source = graph.input(op, 0);
        for merge in merges {
            let other = match merge.other {
                Some(other) => other,
                None => graph.integral_constant(graph.ty(merge.user), 0),
            };
            let attrs = ShifterOperation {
                kind: merge.kind,
                op_kind,
                shift: if op_kind.is_shift() { shift } else { 0 },
            };
            let ty = graph.ty(merge.user);
            let fused = substitute(
                graph,
                merge.user,
                Operator::DataProcWithShifterOp(attrs),
                ty,
                &[other, source],
            );
            trace!(
                user = ?merge.user,
                ?fused,
                kind = merge.kind.name(),
                op = op_kind.name(),
                "merged"
            );
            self.stats.users_rewritten += 1;
        }
        if !graph.has_uses(op) {
            graph.remove(op);
        }
        self.stats.ops_merged += 1;
        Ok(())
    }
}

impl OptimizationPass for InstructionSimplifierArm64 {
    fn name(&self) -> &'static str {
        "instruction_simplifier_arm64"
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let before = self.stats.total();
        for block in graph.reverse_post_order().to_vec() {
            for id in graph.block(block).instructions.clone() {
                if graph.inst(id).is_removed() || shifter_operand_of(graph, id).is_none() {
                    continue;
                }
                if let Err(refusal) = self.try_merge_into_users(graph, id) {
                    trace!(op = ?id, ?refusal, "not merged");
                    self.stats.refused += 1;
                }
            }
        }
        debug!(stats = ?self.stats, "arm64 simplifier done");
        self.stats.total() != before
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::testing::{build, find};

    fn fuse(source: &str) -> (Graph, Arm64Stats) {
        let mut g = build(source);
        let mut pass = InstructionSimplifierArm64::new();
        pass.run(&mut g);
        g.verify().expect("valid after fusion");
        (g, pass.stats().clone())
    }

    fn attrs(g: &Graph, id: InstId) -> ShifterOperation {
        match g.op(id) {
            Operator::DataProcWithShifterOp(attrs) => *attrs,
            other => panic!("not fused: {other}"),
        }
    }

    #[test]
    fn test_shift_merged_into_all_users() {
        let (g, stats) = fuse(
            ".method static int Main.f(int, int, int)
                iload 0
                iconst 3
                ishl
                istore 3
                iload 1
                iload 3
                iadd
                iload 2
                iload 3
                isub
                ixor
                ireturn
            .end",
        );
        assert!(find(&g, "Shl").is_empty());
        let fused = find(&g, "DataProcWithShifterOp");
        assert_eq!(fused.len(), 2);
        let kinds: Vec<DataProcKind> = fused.iter().map(|&id| attrs(&g, id).kind).collect();
        assert!(kinds.contains(&DataProcKind::Add) && kinds.contains(&DataProcKind::Sub));
        for id in fused {
            assert_eq!(attrs(&g, id).op_kind, ShifterOpKind::Lsl);
            assert_eq!(attrs(&g, id).shift, 3);
            assert_eq!(g.input(id, 1), g.parameters()[0]);
        }
        assert_eq!(stats.users_rewritten, 2);
        assert_eq!(stats.ops_merged, 1);
    }

    #[test]
    fn test_shift_amount_masked() {
        let (g, _) = fuse(
            ".method static long Main.f(long, long)
                lload 0
                lload 1
                iconst 67
                lushr
                lor
                lreturn
            .end",
        );
        let fused = find(&g, "DataProcWithShifterOp")[0];
        assert_eq!(attrs(&g, fused).op_kind, ShifterOpKind::Lsr);
        assert_eq!(attrs(&g, fused).shift, 3);
    }

    #[test]
    fn test_extension_refused_on_logical_op() {
        let (g, stats) = fuse(
            ".method static long Main.f(long, int)
                lload 0
                iload 1
                i2l
                land
                lreturn
            .end",
        );
        assert!(find(&g, "DataProcWithShifterOp").is_empty());
        assert_eq!(find(&g, "TypeConversion").len(), 1);
        assert_eq!(find(&g, "And").len(), 1);
        assert_eq!(stats.refused, 1);
    }

    #[test]
    fn test_sub_with_sign_extended_byte() {
        let (g, _) = fuse(
            ".method static long Main.f(long, byte)
                lload 0
                iload 1
                i2l
                lsub
                lreturn
            .end",
        );
        let fused = find(&g, "DataProcWithShifterOp")[0];
        let attrs = attrs(&g, fused);
        assert_eq!((attrs.kind, attrs.op_kind), (DataProcKind::Sub, ShifterOpKind::Sxtb));
        assert_eq!(g.ty(fused), DataType::Int64);
        assert!(find(&g, "TypeConversion").is_empty());
    }

    #[test]
    fn test_narrowing_conversions_fuse_as_extensions() {
        for (conversion, expected) in [
            ("i2b", ShifterOpKind::Sxtb),
            ("i2s", ShifterOpKind::Sxth),
            ("i2c", ShifterOpKind::Uxth),
        ] {
            let (g, _) = fuse(&format!(
                ".method static int Main.f(int, int)
                    iload 0
                    iload 1
                    {conversion}
                    iadd
                    ireturn
                .end"
            ));
            let fused = find(&g, "DataProcWithShifterOp")[0];
            let attrs = attrs(&g, fused);
            assert_eq!((attrs.kind, attrs.op_kind), (DataProcKind::Add, expected), "{conversion}");
            assert_eq!(g.ty(fused), DataType::Int32);
        }
    }

    #[test]
    fn test_same_inputs_refused() {
        let (g, stats) = fuse(
            ".method static int Main.f(int)
                iload 0
                iconst 1
                ishl
                dup
                iadd
                ireturn
            .end",
        );
        assert!(find(&g, "DataProcWithShifterOp").is_empty());
        assert_eq!(find(&g, "Shl").len(), 1);
        assert_eq!(stats.refused, 1);
    }

    #[test]
    fn test_environment_use_refused() {
        let (g, _) = fuse(
            ".method static int Main.f(int, int)
                iload 0
                iconst 2
                ishl
                istore 2
                invokestatic void Main.g()
                iload 1
                iload 2
                iadd
                ireturn
            .end",
        );
        assert!(find(&g, "DataProcWithShifterOp").is_empty());
        assert_eq!(find(&g, "Shl").len(), 1);
    }

    #[test]
    fn test_left_operand_of_sub_refused() {
        let (g, _) = fuse(
            ".method static int Main.f(int, int)
                iload 0
                iconst 2
                ishl
                iload 1
                isub
                ireturn
            .end",
        );
        assert!(find(&g, "DataProcWithShifterOp").is_empty());
    }

    #[test]
    fn test_neg_takes_shift_with_zero_operand() {
        let (g, _) = fuse(
            ".method static int Main.f(int)
                iload 0
                iconst 4
                ishr
                ineg
                ireturn
            .end",
        );
        let fused = find(&g, "DataProcWithShifterOp")[0];
        assert_eq!(attrs(&g, fused).kind, DataProcKind::Neg);
        assert_eq!(attrs(&g, fused).op_kind, ShifterOpKind::Asr);
        assert_eq!(g.int_value(g.input(fused, 0)), Some(0));
    }

    #[test]
    fn test_extension_kinds() {
        use DataType::*;
        assert_eq!(extension_kind(Int64, Int32), ShifterOpKind::Lsl);
        assert_eq!(extension_kind(Int32, Uint8), ShifterOpKind::Uxtb);
        assert_eq!(extension_kind(Uint16, Int64), ShifterOpKind::Uxth);
        assert_eq!(extension_kind(Int32, Int8), ShifterOpKind::Sxtb);
        assert_eq!(extension_kind(Int16, Int32), ShifterOpKind::Sxth);
        assert_eq!(extension_kind(Int32, Int64), ShifterOpKind::Sxtw);
    }
}
