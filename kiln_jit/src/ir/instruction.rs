//! Instructions of the block-structured SSA IR.
//!
//! # Instruction Structure
//!
//! Each instruction has:
//! - **Operator**: what it computes
//! - **Inputs**: ordered SSA operands (use-def edges)
//! - **Type**: the [`DataType`] of the produced value
//! - **Block**: the owning basic block, or invalid while unplaced
//! - **Environment**: for guards, invokes and suspend points, the local
//!   variable values needed to resume execution in the interpreter
//!
//! Uses of a value by environments are tracked apart from ordinary uses, so
//! passes can ask whether a value is merely kept alive for deoptimization.

use smallvec::SmallVec;

use super::arena::Id;
use super::cfg::BlockId;
use super::operators::Operator;
use super::types::DataType;

// =============================================================================
// Instruction ID Type Alias
// =============================================================================

/// Identifier of an instruction in its graph.
pub type InstId = Id<Instruction>;

// =============================================================================
// Input List
// =============================================================================

/// Operand list sized for the common arities.
///
/// Almost every instruction takes at most three inputs; only phis and invokes
/// spill to the heap.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum InputList {
    #[default]
    Empty,
    Single(InstId),
    Pair(InstId, InstId),
    Triple(InstId, InstId, InstId),
    Many(Vec<InstId>),
}

impl InputList {
    pub fn from_slice(inputs: &[InstId]) -> Self {
        match *inputs {
            [] => InputList::Empty,
            [a] => InputList::Single(a),
            [a, b] => InputList::Pair(a, b),
            [a, b, c] => InputList::Triple(a, b, c),
            _ => InputList::Many(inputs.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            InputList::Empty => 0,
            InputList::Single(_) => 1,
            InputList::Pair(..) => 2,
            InputList::Triple(..) => 3,
            InputList::Many(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<InstId> {
        match (self, index) {
            (InputList::Single(a), 0)
            | (InputList::Pair(a, _), 0)
            | (InputList::Triple(a, _, _), 0) => Some(*a),
            (InputList::Pair(_, b), 1) | (InputList::Triple(_, b, _), 1) => Some(*b),
            (InputList::Triple(_, _, c), 2) => Some(*c),
            (InputList::Many(v), i) => v.get(i).copied(),
            _ => None,
        }
    }

    fn slot_mut(&mut self, index: usize) -> Option<&mut InstId> {
        match (self, index) {
            (InputList::Single(a), 0)
            | (InputList::Pair(a, _), 0)
            | (InputList::Triple(a, _, _), 0) => Some(a),
            (InputList::Pair(_, b), 1) | (InputList::Triple(_, b, _), 1) => Some(b),
            (InputList::Triple(_, _, c), 2) => Some(c),
            (InputList::Many(v), i) => v.get_mut(i),
            _ => None,
        }
    }

    /// Overwrite the input at `index`. Out-of-range writes are ignored.
    pub fn set(&mut self, index: usize, value: InstId) {
        if let Some(slot) = self.slot_mut(index) {
            *slot = value;
        }
    }

    pub fn push(&mut self, value: InstId) {
        let mut all = self.to_vec();
        all.push(value);
        *self = InputList::from_slice(&all);
    }

    /// Remove the input at `index`, shifting later inputs down.
    pub fn remove(&mut self, index: usize) -> Option<InstId> {
        let mut all = self.to_vec();
        if index >= all.len() {
            return None;
        }
        let removed = all.remove(index);
        *self = InputList::from_slice(&all);
        Some(removed)
    }

    pub fn iter(&self) -> InputIter<'_> {
        InputIter {
            list: self,
            index: 0,
        }
    }

    pub fn to_vec(&self) -> Vec<InstId> {
        self.iter().collect()
    }
}

impl std::ops::Index<usize> for InputList {
    type Output = InstId;

    fn index(&self, index: usize) -> &InstId {
        match (self, index) {
            (InputList::Single(a), 0)
            | (InputList::Pair(a, _), 0)
            | (InputList::Triple(a, _, _), 0) => a,
            (InputList::Pair(_, b), 1) | (InputList::Triple(_, b, _), 1) => b,
            (InputList::Triple(_, _, c), 2) => c,
            (InputList::Many(v), i) => &v[i],
            _ => panic!("input index {} out of range for {} inputs", index, self.len()),
        }
    }
}

impl std::fmt::Debug for InputList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over an [`InputList`].
pub struct InputIter<'a> {
    list: &'a InputList,
    index: usize,
}

impl Iterator for InputIter<'_> {
    type Item = InstId;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.list.get(self.index);
        self.index += 1;
        result
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.list.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for InputIter<'_> {}

// =============================================================================
// Uses and Environments
// =============================================================================

/// One use of a value: `user` reads it as input (or vreg) number `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub user: InstId,
    pub index: u32,
}

/// Interpreter state captured at a guard, invoke or suspend point.
///
/// One slot per local variable; `None` marks a local that holds no value at
/// this point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub vregs: SmallVec<[Option<InstId>; 8]>,
    pub dex_pc: u32,
}

impl Environment {
    pub fn new(vregs: impl IntoIterator<Item = Option<InstId>>, dex_pc: u32) -> Self {
        Self {
            vregs: vregs.into_iter().collect(),
            dex_pc,
        }
    }

    /// Values referenced by the environment, with their slot index.
    pub fn values(&self) -> impl Iterator<Item = (usize, InstId)> + '_ {
        self.vregs
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|id| (i, id)))
    }
}

// =============================================================================
// Instruction
// =============================================================================

/// A typed operation placed in a basic block.
#[derive(Clone)]
pub struct Instruction {
    pub op: Operator,
    pub inputs: InputList,
    pub ty: DataType,
    /// Owning block; invalid until the instruction is inserted.
    pub block: BlockId,
    /// Bytecode offset the instruction was created for.
    pub dex_pc: u32,
    pub env: Option<Environment>,
    pub flags: InstFlags,
}

impl Instruction {
    pub fn new(op: Operator, ty: DataType, inputs: InputList) -> Self {
        Instruction {
            op,
            inputs,
            ty,
            block: BlockId::INVALID,
            dex_pc: 0,
            env: None,
            flags: InstFlags::empty(),
        }
    }

    #[inline]
    pub fn input(&self, index: usize) -> InstId {
        self.inputs[index]
    }

    #[inline]
    pub fn is_phi(&self) -> bool {
        matches!(self.op, Operator::Phi)
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        self.op.is_constant()
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.flags.contains(InstFlags::REMOVED)
    }

    /// Integer value of an `IntConstant` or `LongConstant`.
    pub fn as_integral_constant(&self) -> Option<i64> {
        match self.op {
            Operator::IntConstant(v) => Some(v as i64),
            Operator::LongConstant(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_int_constant(&self) -> Option<i32> {
        match self.op {
            Operator::IntConstant(v) => Some(v),
            _ => None,
        }
    }

    /// Value of a floating-point constant, widened to `f64`.
    pub fn as_fp_constant(&self) -> Option<f64> {
        match self.op {
            Operator::FloatConstant(bits) => Some(f32::from_bits(bits) as f64),
            Operator::DoubleConstant(bits) => Some(f64::from_bits(bits)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{:?} : {}", self.op.name(), self.inputs, self.ty)
    }
}

// =============================================================================
// Instruction Flags
// =============================================================================

bitflags::bitflags! {
    /// Per-instruction properties maintained by the graph and passes.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct InstFlags: u8 {
        /// Unlinked from its block; the id must no longer be used.
        const REMOVED = 0b0000_0001;
        /// The value is known to be a non-null reference.
        const NON_NULL = 0b0000_0010;
        /// Moved into a loop preheader by bounds-check elimination.
        const HOISTED = 0b0000_0100;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::BinaryOp;

    fn ids(n: u32) -> Vec<InstId> {
        (0..n).map(InstId::new).collect()
    }

    #[test]
    fn test_input_list_shapes() {
        assert!(InputList::from_slice(&[]).is_empty());
        assert!(matches!(InputList::from_slice(&ids(2)), InputList::Pair(..)));
        assert!(matches!(InputList::from_slice(&ids(5)), InputList::Many(_)));
    }

    #[test]
    fn test_input_list_push_and_remove() {
        let mut list = InputList::from_slice(&ids(3));
        list.push(InstId::new(9));
        assert_eq!(list.len(), 4);
        assert_eq!(list[3], InstId::new(9));

        assert_eq!(list.remove(1), Some(InstId::new(1)));
        assert!(matches!(list, InputList::Triple(..)));
        assert_eq!(list.to_vec(), vec![InstId::new(0), InstId::new(2), InstId::new(9)]);
        assert_eq!(list.remove(7), None);
    }

    #[test]
    fn test_input_list_set() {
        let mut list = InputList::from_slice(&ids(2));
        list.set(1, InstId::new(5));
        list.set(4, InstId::new(6));
        assert_eq!(list.get(1), Some(InstId::new(5)));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_instruction_constant_accessors() {
        let c = Instruction::new(Operator::IntConstant(-3), DataType::Int32, InputList::Empty);
        assert_eq!(c.as_integral_constant(), Some(-3));
        assert_eq!(c.as_int_constant(), Some(-3));
        assert!(c.is_constant());

        let add = Instruction::new(
            Operator::Binary(BinaryOp::Add),
            DataType::Int32,
            InputList::from_slice(&ids(2)),
        );
        assert!(!add.is_constant());
        assert_eq!(add.input(1), InstId::new(1));
    }

    #[test]
    fn test_environment_values_skip_empty_slots() {
        let env = Environment::new([Some(InstId::new(1)), None, Some(InstId::new(4))], 7);
        let values: Vec<_> = env.values().collect();
        assert_eq!(values, vec![(0, InstId::new(1)), (2, InstId::new(4))]);
    }
}
