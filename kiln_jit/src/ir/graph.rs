//! Per-method IR graph.
//!
//! The graph provides:
//! - **Arena-based storage** for instructions and blocks
//! - **Use-def chains** for ordinary and environment uses
//! - **A constant cache** so each constant value exists once, in the entry block
//! - **Incremental editing**: insert, replace and remove without a rebuild
//!
//! Structural analyses (reverse postorder, dominators, loops) live in
//! [`super::cfg`] and are recomputed by [`Graph::rebuild_analyses`] after
//! passes that change the block structure.

use rustc_hash::FxHashMap;

use super::arena::{Arena, SecondaryMap};
use super::cfg::{BasicBlock, BlockId, LoopInfo};
use super::instruction::{Environment, InputList, InstFlags, InstId, Instruction, Use};
use super::operators::Operator;
use super::types::DataType;
use crate::bytecode::Signature;

/// Key of the constant cache. Floats are keyed by their bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConstKey {
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Null,
}

// =============================================================================
// Graph Structure
// =============================================================================

/// The IR of one method.
#[derive(Clone)]
pub struct Graph {
    insts: Arena<Instruction>,
    blocks: Arena<BasicBlock>,

    /// Ordinary uses of each instruction.
    uses: SecondaryMap<Instruction, Vec<Use>>,

    /// Uses by environments; `Use::index` is the vreg slot.
    env_uses: SecondaryMap<Instruction, Vec<Use>>,

    pub entry: BlockId,
    pub exit: BlockId,

    pub(super) rpo: Vec<BlockId>,
    pub(super) loops: FxHashMap<BlockId, LoopInfo>,

    constants: FxHashMap<ConstKey, InstId>,
    parameters: Vec<InstId>,
    signature: Signature,

    /// Number of local variable slots, the width of every environment.
    num_vregs: usize,

    /// Bytecode offset stamped on newly created instructions.
    next_dex_pc: u32,
}

impl Graph {
    /// Create a graph with empty entry and exit blocks.
    pub fn new(signature: Signature, num_vregs: usize) -> Self {
        let mut blocks = Arena::with_capacity(16);
        let entry = blocks.alloc(BasicBlock::new(0));
        let exit = blocks.alloc(BasicBlock::new(0));

        Graph {
            insts: Arena::with_capacity(128),
            blocks,
            uses: SecondaryMap::new(),
            env_uses: SecondaryMap::new(),
            entry,
            exit,
            rpo: Vec::new(),
            loops: FxHashMap::default(),
            constants: FxHashMap::default(),
            parameters: Vec::new(),
            signature,
            num_vregs,
            next_dex_pc: 0,
        }
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub fn num_vregs(&self) -> usize {
        self.num_vregs
    }

    #[inline]
    pub fn parameters(&self) -> &[InstId] {
        &self.parameters
    }

    /// Set the bytecode offset for instructions created from now on.
    #[inline]
    pub fn set_dex_pc(&mut self, dex_pc: u32) {
        self.next_dex_pc = dex_pc;
    }

    // =========================================================================
    // Instruction Access
    // =========================================================================

    #[inline]
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id]
    }

    #[inline]
    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id]
    }

    #[inline]
    pub fn op(&self, id: InstId) -> &Operator {
        &self.insts[id].op
    }

    #[inline]
    pub fn ty(&self, id: InstId) -> DataType {
        self.insts[id].ty
    }

    #[inline]
    pub fn input(&self, id: InstId, index: usize) -> InstId {
        self.insts[id].inputs[index]
    }

    #[inline]
    pub fn block_of(&self, id: InstId) -> BlockId {
        self.insts[id].block
    }

    /// Number of instruction slots ever allocated, including removed ones.
    #[inline]
    pub fn instruction_capacity(&self) -> usize {
        self.insts.len()
    }

    #[inline]
    pub fn int_value(&self, id: InstId) -> Option<i32> {
        self.insts[id].as_int_constant()
    }

    #[inline]
    pub fn integral_value(&self, id: InstId) -> Option<i64> {
        self.insts[id].as_integral_constant()
    }

    /// Constant whose value is zero, of any numeric type.
    pub fn is_zero(&self, id: InstId) -> bool {
        match self.insts[id].op {
            Operator::IntConstant(0) | Operator::LongConstant(0) => true,
            Operator::FloatConstant(bits) => f32::from_bits(bits) == 0.0,
            Operator::DoubleConstant(bits) => f64::from_bits(bits) == 0.0,
            _ => false,
        }
    }

    /// Whether `id` is a reference that can never be null.
    pub fn cannot_be_null(&self, id: InstId) -> bool {
        let inst = &self.insts[id];
        inst.flags.contains(InstFlags::NON_NULL)
            || matches!(inst.op, Operator::NewArray | Operator::NullCheck)
    }

    // =========================================================================
    // Use-Def Chains
    // =========================================================================

    #[inline]
    pub fn uses(&self, id: InstId) -> &[Use] {
        self.uses.get(id).map_or(&[], |v| v.as_slice())
    }

    #[inline]
    pub fn env_uses(&self, id: InstId) -> &[Use] {
        self.env_uses.get(id).map_or(&[], |v| v.as_slice())
    }

    #[inline]
    pub fn has_uses(&self, id: InstId) -> bool {
        !self.uses(id).is_empty()
    }

    #[inline]
    pub fn has_env_uses(&self, id: InstId) -> bool {
        !self.env_uses(id).is_empty()
    }

    /// Exactly one ordinary use and no environment uses.
    pub fn has_only_one_use(&self, id: InstId) -> bool {
        self.uses(id).len() == 1 && !self.has_env_uses(id)
    }

    /// Distinct users of `id`, in use order.
    pub fn users(&self, id: InstId) -> Vec<InstId> {
        let mut users: Vec<InstId> = Vec::with_capacity(self.uses(id).len());
        for u in self.uses(id) {
            if !users.contains(&u.user) {
                users.push(u.user);
            }
        }
        users
    }

    fn add_use(&mut self, def: InstId, user: InstId, index: usize) {
        self.uses.entry(def).push(Use {
            user,
            index: index as u32,
        });
    }

    fn remove_use(&mut self, def: InstId, user: InstId, index: usize) {
        let uses = self.uses.entry(def);
        if let Some(pos) = uses
            .iter()
            .position(|u| u.user == user && u.index == index as u32)
        {
            uses.swap_remove(pos);
        }
    }

    fn add_env_use(&mut self, def: InstId, holder: InstId, slot: usize) {
        self.env_uses.entry(def).push(Use {
            user: holder,
            index: slot as u32,
        });
    }

    fn remove_env_use(&mut self, def: InstId, holder: InstId, slot: usize) {
        let uses = self.env_uses.entry(def);
        if let Some(pos) = uses
            .iter()
            .position(|u| u.user == holder && u.index == slot as u32)
        {
            uses.swap_remove(pos);
        }
    }

    // =========================================================================
    // Instruction Creation
    // =========================================================================

    /// Allocate an instruction without placing it in a block.
    ///
    /// Uses of the inputs are registered immediately.
    pub fn create(&mut self, op: Operator, ty: DataType, inputs: &[InstId]) -> InstId {
        let mut inst = Instruction::new(op, ty, InputList::from_slice(inputs));
        inst.dex_pc = self.next_dex_pc;
        let id = self.insts.alloc(inst);
        for (i, &input) in inputs.iter().enumerate() {
            self.add_use(input, id, i);
        }
        id
    }

    /// Append an unplaced instruction at the end of `block`.
    pub fn append(&mut self, block: BlockId, id: InstId) {
        debug_assert!(!self.insts[id].block.is_valid());
        self.insts[id].block = block;
        self.blocks[block].instructions.push(id);
    }

    /// Create and append in one step.
    pub fn add(&mut self, block: BlockId, op: Operator, ty: DataType, inputs: &[InstId]) -> InstId {
        let id = self.create(op, ty, inputs);
        self.append(block, id);
        id
    }

    /// Add an unplaced phi to `block`.
    pub fn add_phi(&mut self, block: BlockId, phi: InstId) {
        debug_assert!(self.insts[phi].is_phi());
        self.insts[phi].block = block;
        self.blocks[block].phis.push(phi);
    }

    /// Insert an unplaced instruction immediately before `before`.
    pub fn insert_before(&mut self, id: InstId, before: InstId) {
        let block = self.insts[before].block;
        let pos = self.position_in_block(before);
        self.insts[id].block = block;
        self.blocks[block].instructions.insert(pos, id);
    }

    /// Create an instruction and insert it before `before`.
    pub fn insert_new_before(
        &mut self,
        op: Operator,
        ty: DataType,
        inputs: &[InstId],
        before: InstId,
    ) -> InstId {
        let id = self.create(op, ty, inputs);
        self.insert_before(id, before);
        id
    }

    /// Move a placed, non-phi instruction so it sits right before `before`.
    pub fn move_before(&mut self, id: InstId, before: InstId) {
        let old_block = self.insts[id].block;
        self.blocks[old_block].instructions.retain(|&i| i != id);
        self.insts[id].block = BlockId::INVALID;
        self.insert_before(id, before);
    }

    fn position_in_block(&self, id: InstId) -> usize {
        let block = self.insts[id].block;
        self.blocks[block]
            .instructions
            .iter()
            .position(|&i| i == id)
            .unwrap_or(self.blocks[block].instructions.len())
    }

    /// Attach an environment and register its uses.
    pub fn set_environment(&mut self, id: InstId, env: Environment) {
        self.clear_environment(id);
        for (slot, value) in env.values() {
            self.add_env_use(value, id, slot);
        }
        self.insts[id].env = Some(env);
    }

    fn clear_environment(&mut self, id: InstId) {
        if let Some(env) = self.insts[id].env.take() {
            for (slot, value) in env.values() {
                self.remove_env_use(value, id, slot);
            }
        }
    }

    /// Drop one slot of an environment (used when a value dies).
    pub fn clear_env_slot(&mut self, holder: InstId, slot: usize) {
        let old = self.insts[holder]
            .env
            .as_mut()
            .and_then(|env| env.vregs.get_mut(slot))
            .and_then(Option::take);
        if let Some(value) = old {
            self.remove_env_use(value, holder, slot);
        }
    }

    // =========================================================================
    // Constants
    // =========================================================================

    fn cached_constant(&mut self, key: ConstKey, op: Operator, ty: DataType) -> InstId {
        if let Some(&id) = self.constants.get(&key) {
            if !self.insts[id].is_removed() {
                return id;
            }
        }
        let id = self.create(op, ty, &[]);
        self.insts[id].dex_pc = 0;
        let entry = self.entry;
        self.insts[id].block = entry;
        // After the parameters and earlier constants, ahead of any code the
        // entry block may have absorbed through block merging.
        let insts = &self.insts;
        let list = &mut self.blocks[entry].instructions;
        let pos = list
            .iter()
            .position(|&i| {
                let op = &insts[i].op;
                !(op.is_constant() || matches!(op, Operator::ParameterValue(_)))
            })
            .unwrap_or(list.len());
        list.insert(pos, id);
        self.constants.insert(key, id);
        id
    }

    pub fn int_constant(&mut self, value: i32) -> InstId {
        self.cached_constant(
            ConstKey::Int(value),
            Operator::IntConstant(value),
            DataType::Int32,
        )
    }

    pub fn long_constant(&mut self, value: i64) -> InstId {
        self.cached_constant(
            ConstKey::Long(value),
            Operator::LongConstant(value),
            DataType::Int64,
        )
    }

    pub fn float_constant(&mut self, value: f32) -> InstId {
        let bits = value.to_bits();
        self.cached_constant(
            ConstKey::Float(bits),
            Operator::FloatConstant(bits),
            DataType::Float32,
        )
    }

    pub fn double_constant(&mut self, value: f64) -> InstId {
        let bits = value.to_bits();
        self.cached_constant(
            ConstKey::Double(bits),
            Operator::DoubleConstant(bits),
            DataType::Float64,
        )
    }

    pub fn null_constant(&mut self) -> InstId {
        self.cached_constant(ConstKey::Null, Operator::NullConstant, DataType::Reference)
    }

    /// Integral constant of type `ty`; `Int64` yields a long, anything else an int.
    pub fn integral_constant(&mut self, ty: DataType, value: i64) -> InstId {
        if ty == DataType::Int64 {
            self.long_constant(value)
        } else {
            self.int_constant(value as i32)
        }
    }

    /// Boolean results are represented as int constants 0 and 1.
    pub fn bool_constant(&mut self, value: bool) -> InstId {
        self.int_constant(value as i32)
    }

    /// Register a `ParameterValue` in the entry block.
    pub fn add_parameter(&mut self, index: u16, ty: DataType) -> InstId {
        let entry = self.entry;
        let id = self.add(entry, Operator::ParameterValue(index), ty, &[]);
        self.parameters.push(id);
        id
    }

    // =========================================================================
    // Instruction Modification
    // =========================================================================

    /// Replace input `index` of `user`.
    pub fn set_input(&mut self, user: InstId, index: usize, new_input: InstId) {
        let old = self.insts[user].inputs[index];
        self.remove_use(old, user, index);
        self.insts[user].inputs.set(index, new_input);
        self.add_use(new_input, user, index);
    }

    /// Append an input to a phi or invoke.
    pub fn push_input(&mut self, user: InstId, input: InstId) {
        let index = self.insts[user].inputs.len();
        self.insts[user].inputs.push(input);
        self.add_use(input, user, index);
    }

    /// Remove input `index` of `user`, renumbering the uses of later inputs.
    pub fn remove_input(&mut self, user: InstId, index: usize) {
        let all = self.insts[user].inputs.to_vec();
        for (i, &input) in all.iter().enumerate().skip(index) {
            self.remove_use(input, user, i);
        }
        self.insts[user].inputs.remove(index);
        for (i, &input) in all.iter().enumerate().skip(index + 1) {
            self.add_use(input, user, i - 1);
        }
    }

    /// Redirect every ordinary and environment use of `old` to `new`.
    pub fn replace_uses_with(&mut self, old: InstId, new: InstId) {
        if old == new {
            return;
        }
        let uses = std::mem::take(self.uses.entry(old));
        for u in uses {
            self.insts[u.user].inputs.set(u.index as usize, new);
            self.add_use(new, u.user, u.index as usize);
        }
        let env_uses = std::mem::take(self.env_uses.entry(old));
        for u in env_uses {
            if let Some(slot) = self.insts[u.user]
                .env
                .as_mut()
                .and_then(|env| env.vregs.get_mut(u.index as usize))
            {
                *slot = Some(new);
            }
            self.add_env_use(new, u.user, u.index as usize);
        }
    }

    /// Unlink an instruction from its block and drop the uses it holds.
    ///
    /// The instruction must no longer have ordinary uses.
    pub fn remove(&mut self, id: InstId) {
        debug_assert!(
            !self.has_uses(id),
            "removing {:?} {} which still has uses",
            id,
            self.insts[id].op
        );
        let block = self.insts[id].block;
        if block.is_valid() {
            let bb = &mut self.blocks[block];
            if self.insts[id].is_phi() {
                bb.phis.retain(|&p| p != id);
            } else {
                bb.instructions.retain(|&i| i != id);
            }
        }
        let inputs = self.insts[id].inputs.to_vec();
        for (i, input) in inputs.into_iter().enumerate() {
            self.remove_use(input, id, i);
        }
        self.clear_environment(id);

        // Environments that still mention the value forget it.
        let env_uses = std::mem::take(self.env_uses.entry(id));
        for u in env_uses {
            if let Some(slot) = self.insts[u.user]
                .env
                .as_mut()
                .and_then(|env| env.vregs.get_mut(u.index as usize))
            {
                *slot = None;
            }
        }

        let inst = &mut self.insts[id];
        inst.block = BlockId::INVALID;
        inst.flags.insert(InstFlags::REMOVED);
    }

    /// Replace all uses of `old` with the existing value `new` and remove `old`.
    pub fn replace_and_remove(&mut self, old: InstId, new: InstId) {
        self.replace_uses_with(old, new);
        self.remove(old);
    }

    /// Insert the unplaced `new` where `old` is, take over its uses and remove `old`.
    pub fn replace_with_new(&mut self, old: InstId, new: InstId) {
        if self.insts[old].is_phi() {
            let block = self.insts[old].block;
            self.add_phi(block, new);
        } else {
            self.insert_before(new, old);
        }
        self.replace_and_remove(old, new);
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    /// Number of block slots ever allocated, including removed ones.
    #[inline]
    pub fn block_capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Live blocks in id order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .filter(|(_, b)| !b.removed)
            .map(|(id, _)| id)
    }

    pub fn create_block(&mut self, dex_pc: u32) -> BlockId {
        self.blocks.alloc(BasicBlock::new(dex_pc))
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].successors.push(to);
        self.blocks[to].predecessors.push(from);
    }

    /// Last instruction of a block, its control instruction once built.
    pub fn last_instruction(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block].instructions.last().copied()
    }

    /// Index of `pred` among the predecessors of `block`.
    pub fn predecessor_index(&self, block: BlockId, pred: BlockId) -> Option<usize> {
        self.blocks[block].predecessors.iter().position(|&p| p == pred)
    }

    /// Retarget the edge `block -> old` to `block -> new` on the source side.
    pub fn replace_successor(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        for s in self.blocks[block].successors.iter_mut() {
            if *s == old {
                *s = new;
            }
        }
    }

    /// Rename predecessor `old` of `block` to `new`, keeping its index.
    pub fn replace_predecessor(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        for p in self.blocks[block].predecessors.iter_mut() {
            if *p == old {
                *p = new;
            }
        }
    }

    /// Split the edge `from -> to` with a new block ending in `Goto`.
    ///
    /// The new block takes the place of `from` in the predecessor list of
    /// `to`, so phi input positions are preserved.
    pub fn split_edge(&mut self, from: BlockId, to: BlockId) -> BlockId {
        let dex_pc = self.blocks[to].dex_pc;
        let middle = self.create_block(dex_pc);
        self.replace_successor(from, to, middle);
        self.replace_predecessor(to, from, middle);
        self.blocks[middle].predecessors.push(from);
        self.blocks[middle].successors.push(to);
        self.set_dex_pc(dex_pc);
        self.add(middle, Operator::Goto, DataType::Void, &[]);
        middle
    }

    /// Drop the edge `from -> to`, removing the matching phi inputs of `to`.
    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) {
        if let Some(index) = self.predecessor_index(to, from) {
            self.blocks[to].predecessors.remove(index);
            for phi in self.blocks[to].phis.clone() {
                self.remove_input(phi, index);
            }
        }
        if let Some(pos) = self.blocks[from].successors.iter().position(|&s| s == to) {
            self.blocks[from].successors.remove(pos);
        }
    }

    /// Delete a block that is no longer reachable.
    ///
    /// Outgoing edges are dropped first; the block's values may only be used
    /// by other unreachable code, whose uses are severed here.
    pub fn remove_block(&mut self, block: BlockId) {
        for succ in self.blocks[block].successors.clone() {
            self.remove_edge(block, succ);
        }
        let mut all: Vec<InstId> = self.blocks[block].phis.clone();
        all.extend(self.blocks[block].instructions.iter().rev().copied());
        for &id in &all {
            // Remaining users are themselves dead; detach them.
            for u in self.uses(id).to_vec() {
                self.remove_use(id, u.user, u.index as usize);
                self.insts[u.user].inputs.set(u.index as usize, InstId::INVALID);
            }
        }
        for &id in &all {
            self.remove_detached(id);
        }
        let bb = &mut self.blocks[block];
        bb.predecessors.clear();
        bb.phis.clear();
        bb.instructions.clear();
        bb.removed = true;
    }

    fn remove_detached(&mut self, id: InstId) {
        let inputs = self.insts[id].inputs.to_vec();
        for (i, input) in inputs.into_iter().enumerate() {
            if input.is_valid() {
                self.remove_use(input, id, i);
            }
        }
        self.clear_environment(id);
        let env_uses = std::mem::take(self.env_uses.entry(id));
        for u in env_uses {
            if let Some(slot) = self.insts[u.user]
                .env
                .as_mut()
                .and_then(|env| env.vregs.get_mut(u.index as usize))
            {
                *slot = None;
            }
        }
        let inst = &mut self.insts[id];
        inst.block = BlockId::INVALID;
        inst.flags.insert(InstFlags::REMOVED);
    }

    /// Fold `succ` into `block`: `block` must end in `Goto` to `succ`, and
    /// `succ` must have `block` as its only predecessor.
    pub fn merge_with_successor(&mut self, block: BlockId, succ: BlockId) {
        debug_assert_eq!(self.blocks[succ].predecessors, vec![block]);
        for phi in self.blocks[succ].phis.clone() {
            let value = self.input(phi, 0);
            self.replace_and_remove(phi, value);
        }
        if let Some(goto) = self.last_instruction(block) {
            self.remove(goto);
        }
        let moved = std::mem::take(&mut self.blocks[succ].instructions);
        for &id in &moved {
            self.insts[id].block = block;
        }
        self.blocks[block].instructions.extend(moved);

        let succs = std::mem::take(&mut self.blocks[succ].successors);
        self.blocks[block].successors = succs.clone();
        for s in succs {
            self.replace_predecessor(s, succ, block);
        }
        let bb = &mut self.blocks[succ];
        bb.predecessors.clear();
        bb.removed = true;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Every live instruction (phis first within each block), in block id order.
    pub fn all_instructions(&self) -> Vec<InstId> {
        let mut out = Vec::with_capacity(self.insts.len());
        for (_, bb) in self.blocks.iter().filter(|(_, b)| !b.removed) {
            out.extend_from_slice(&bb.phis);
            out.extend_from_slice(&bb.instructions);
        }
        out
    }

    /// Count live instructions with the given operator name.
    pub fn count_named(&self, name: &str) -> usize {
        self.all_instructions()
            .into_iter()
            .filter(|&id| self.insts[id].op.name() == name)
            .count()
    }

    /// Whether any live instruction satisfies `pred`.
    pub fn any_instruction(&self, mut pred: impl FnMut(&Instruction) -> bool) -> bool {
        self.all_instructions()
            .into_iter()
            .any(|id| pred(&self.insts[id]))
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph {} ({} blocks):", self.signature, self.blocks.len())?;
        for block in self.block_ids() {
            writeln!(f, "  {:?}:", block)?;
            let bb = &self.blocks[block];
            for &id in bb.phis.iter().chain(&bb.instructions) {
                writeln!(f, "    {:?}: {:?}", id, self.insts[id])?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::JavaType;
    use crate::ir::operators::BinaryOp;

    fn graph() -> Graph {
        let sig = Signature::new(JavaType::Int, "Main", "test", vec![JavaType::Int]);
        Graph::new(sig, 2)
    }

    #[test]
    fn test_constants_are_cached_in_entry() {
        let mut g = graph();
        let a = g.int_constant(5);
        let b = g.int_constant(5);
        let c = g.long_constant(5);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(g.block_of(a), g.entry);
        assert_eq!(g.integral_value(c), Some(5));
    }

    #[test]
    fn test_constants_precede_entry_goto() {
        let mut g = graph();
        let entry = g.entry;
        g.add(entry, Operator::Goto, DataType::Void, &[]);
        let k = g.int_constant(1);
        assert_eq!(g.block(entry).instructions.first(), Some(&k));
    }

    #[test]
    fn test_constants_precede_merged_code() {
        let mut g = graph();
        let entry = g.entry;
        let p = g.add_parameter(0, DataType::Int32);
        let one = g.int_constant(1);
        let add = g.add(entry, Operator::Binary(BinaryOp::Add), DataType::Int32, &[p, one]);
        g.add(entry, Operator::Return, DataType::Void, &[add]);

        let two = g.int_constant(2);
        let order = &g.block(entry).instructions;
        assert_eq!(&order[..3], &[p, one, two]);
    }

    #[test]
    fn test_use_chains_track_input_positions() {
        let mut g = graph();
        let entry = g.entry;
        let c = g.int_constant(3);
        let add = g.add(entry, Operator::Binary(BinaryOp::Add), DataType::Int32, &[c, c]);
        assert_eq!(g.uses(c).len(), 2);
        assert_eq!(g.users(c), vec![add]);

        let d = g.int_constant(4);
        g.set_input(add, 1, d);
        assert_eq!(g.uses(c), &[Use { user: add, index: 0 }]);
        assert_eq!(g.uses(d), &[Use { user: add, index: 1 }]);
    }

    #[test]
    fn test_replace_uses_includes_environments() {
        let mut g = graph();
        let entry = g.entry;
        let p = g.add_parameter(0, DataType::Int32);
        let check = g.add(entry, Operator::DivZeroCheck, DataType::Int32, &[p]);
        g.set_environment(check, Environment::new([Some(p), None], 0));
        let k = g.int_constant(7);

        g.replace_uses_with(p, k);
        assert!(!g.has_uses(p));
        assert!(!g.has_env_uses(p));
        assert_eq!(g.input(check, 0), k);
        let env = g.inst(check).env.as_ref().map(|e| e.vregs[0]);
        assert_eq!(env, Some(Some(k)));
    }

    #[test]
    fn test_remove_clears_environment_slots() {
        let mut g = graph();
        let entry = g.entry;
        let p = g.add_parameter(0, DataType::Int32);
        let add = g.add(entry, Operator::Binary(BinaryOp::Add), DataType::Int32, &[p, p]);
        let check = g.add(entry, Operator::SuspendCheck, DataType::Void, &[]);
        g.set_environment(check, Environment::new([Some(add), None], 0));

        g.remove(add);
        assert!(g.inst(add).is_removed());
        assert!(g.uses(p).is_empty());
        let env = g.inst(check).env.as_ref().map(|e| e.vregs[0]);
        assert_eq!(env, Some(None));
    }

    #[test]
    fn test_remove_input_renumbers_uses() {
        let mut g = graph();
        let b = g.create_block(0);
        let x = g.int_constant(1);
        let y = g.int_constant(2);
        let z = g.int_constant(3);
        let phi = g.create(Operator::Phi, DataType::Int32, &[x, y, z]);
        g.add_phi(b, phi);

        g.remove_input(phi, 0);
        assert_eq!(g.inst(phi).inputs.to_vec(), vec![y, z]);
        assert!(g.uses(x).is_empty());
        assert_eq!(g.uses(z), &[Use { user: phi, index: 1 }]);
    }

    #[test]
    fn test_split_edge_keeps_predecessor_slot() {
        let mut g = graph();
        let a = g.create_block(0);
        let b = g.create_block(0);
        let join = g.create_block(0);
        g.add_edge(a, join);
        g.add_edge(b, join);

        let mid = g.split_edge(b, join);
        assert_eq!(g.block(join).predecessors, vec![a, mid]);
        assert_eq!(g.block(b).successors, vec![mid]);
        assert_eq!(g.count_named("Goto"), 1);
    }
}
