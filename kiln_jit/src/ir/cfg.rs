//! Control flow structure and analyses.
//!
//! Blocks own their phis and instructions; the graph owns the blocks. This
//! module adds the structural analyses every pass relies on:
//! - **Reverse postorder**: dominators-first traversal order
//! - **Dominator tree**: Cooper-Harvey-Kennedy iteration over postorder numbers
//! - **Loop analysis**: natural loops from back edges, nesting, irreducibility
//! - **Normalization**: critical-edge splitting and single loop preheaders
//!
//! Analyses are stored on the blocks themselves and refreshed with
//! [`Graph::rebuild_analyses`] after structural edits.

use std::collections::VecDeque;

use super::arena::{BitSet, Id, SecondaryMap};
use super::graph::Graph;
use super::instruction::InstId;
use super::operators::Operator;
use super::types::DataType;

// =============================================================================
// Basic Block
// =============================================================================

/// A basic block: phis, then straight-line instructions ending in control flow.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    pub phis: Vec<InstId>,
    pub instructions: Vec<InstId>,

    /// Immediate dominator, `None` for the entry block and unreachable blocks.
    pub dominator: Option<BlockId>,

    /// Children in the dominator tree, in reverse postorder.
    pub dominated: Vec<BlockId>,

    /// Header of the innermost loop containing this block.
    pub loop_header: Option<BlockId>,

    pub dex_pc: u32,
    pub removed: bool,
}

impl BasicBlock {
    pub(super) fn new(dex_pc: u32) -> Self {
        BasicBlock {
            predecessors: Vec::new(),
            successors: Vec::new(),
            phis: Vec::new(),
            instructions: Vec::new(),
            dominator: None,
            dominated: Vec::new(),
            loop_header: None,
            dex_pc,
            removed: false,
        }
    }

    #[inline]
    pub fn single_successor(&self) -> Option<BlockId> {
        match self.successors.as_slice() {
            [s] => Some(*s),
            _ => None,
        }
    }
}

/// Block identifier.
pub type BlockId = Id<BasicBlock>;

// =============================================================================
// Loop Information
// =============================================================================

/// A loop identified by its header.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub header: BlockId,

    /// Sources of edges back to the header.
    pub back_edges: Vec<BlockId>,

    /// All blocks of the loop, including nested loops.
    pub blocks: BitSet,

    /// Header of the immediately enclosing loop.
    pub outer: Option<BlockId>,

    /// Entered at more than one block.
    pub irreducible: bool,

    /// Nesting depth, 1 for outermost loops.
    pub depth: u32,
}

impl LoopInfo {
    #[inline]
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(block.as_usize())
    }

    /// Predecessor 0 of the header, established by normalization.
    pub fn pre_header(&self, graph: &Graph) -> BlockId {
        graph.block(self.header).predecessors[0]
    }

    /// The header's `SuspendCheck`, when it has one.
    pub fn suspend_check(&self, graph: &Graph) -> Option<InstId> {
        graph
            .block(self.header)
            .instructions
            .iter()
            .copied()
            .find(|&i| matches!(graph.op(i), Operator::SuspendCheck))
    }

    /// Whether `inst` is computed outside this loop.
    pub fn is_defined_out_of_loop(&self, graph: &Graph, inst: InstId) -> bool {
        !self.contains(graph.block_of(inst))
    }

    /// Whether `block` dominates every back edge.
    pub fn dominates_all_back_edges(&self, graph: &Graph, block: BlockId) -> bool {
        self.back_edges.iter().all(|&b| graph.dominates(block, b))
    }

    /// Whether a block other than the header can leave the loop.
    pub fn has_early_exit(&self, graph: &Graph) -> bool {
        self.blocks
            .iter()
            .map(|i| BlockId::new(i as u32))
            .filter(|&b| b != self.header)
            .any(|b| graph.block(b).successors.iter().any(|&s| !self.contains(s)))
    }

    /// Blocks of the loop, in id order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().map(|i| BlockId::new(i as u32))
    }
}

/// Blocks created by [`Graph::insert_taken_test`].
#[derive(Debug, Clone, Copy)]
pub struct TakenTestBlocks {
    /// Ends without a control instruction; the caller appends the `If`.
    pub if_block: BlockId,
    /// Executed when the loop is entered at least once.
    pub true_block: BlockId,
    pub false_block: BlockId,
    /// The loop's new preheader where both arms join.
    pub new_pre_header: BlockId,
}

// =============================================================================
// Analyses
// =============================================================================

impl Graph {
    /// Blocks reachable from the entry, dominators first.
    #[inline]
    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Recompute reverse postorder, dominator tree and loops.
    pub fn rebuild_analyses(&mut self) {
        let postorder = self.compute_rpo();
        self.build_dominator_tree(&postorder);
        self.analyze_loops();
    }

    /// Compute `self.rpo` with an explicit-stack DFS; returns postorder numbers.
    fn compute_rpo(&mut self) -> SecondaryMap<BasicBlock, u32> {
        let mut visited = BitSet::with_capacity(self.block_capacity());
        let mut order = Vec::with_capacity(self.block_capacity());
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        visited.insert(self.entry.as_usize());

        while let Some(&(block, next)) = stack.last() {
            let succs = &self.block(block).successors;
            if next < succs.len() {
                let succ = succs[next];
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if visited.insert(succ.as_usize()) {
                    stack.push((succ, 0));
                }
            } else {
                order.push(block);
                stack.pop();
            }
        }

        let mut postorder = SecondaryMap::with_capacity(self.block_capacity());
        for (i, &block) in order.iter().enumerate() {
            postorder.set(block, i as u32);
        }
        order.reverse();
        self.rpo = order;
        postorder
    }

    fn build_dominator_tree(&mut self, postorder: &SecondaryMap<BasicBlock, u32>) {
        let ids: Vec<BlockId> = self.block_ids().collect();
        for &b in &ids {
            let bb = self.block_mut(b);
            bb.dominator = None;
            bb.dominated.clear();
        }

        let mut idom: SecondaryMap<BasicBlock, BlockId> =
            SecondaryMap::with_capacity(self.block_capacity());
        for &b in &ids {
            idom.set(b, BlockId::INVALID);
        }
        idom.set(self.entry, self.entry);

        let intersect = |idom: &SecondaryMap<BasicBlock, BlockId>, mut a: BlockId, mut b: BlockId| {
            while a != b {
                while postorder[a] < postorder[b] {
                    a = idom[a];
                }
                while postorder[b] < postorder[a] {
                    b = idom[b];
                }
            }
            a
        };

        let rpo = self.rpo.clone();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom = BlockId::INVALID;
                for &pred in &self.block(block).predecessors {
                    if idom.get(pred).map_or(true, |d| !d.is_valid()) {
                        continue;
                    }
                    new_idom = if new_idom.is_valid() {
                        intersect(&idom, pred, new_idom)
                    } else {
                        pred
                    };
                }
                if new_idom.is_valid() && idom[block] != new_idom {
                    idom.set(block, new_idom);
                    changed = true;
                }
            }
        }

        for &block in rpo.iter().skip(1) {
            let d = idom[block];
            self.block_mut(block).dominator = Some(d);
            self.block_mut(d).dominated.push(block);
        }
    }

    /// Whether block `a` dominates block `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = Some(b);
        while let Some(block) = current {
            if block == a {
                return true;
            }
            current = self.block(block).dominator;
        }
        false
    }

    #[inline]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Whether the value `def` is available at instruction `at`.
    ///
    /// Phis of a block are available to all its instructions.
    pub fn instruction_dominates(&self, def: InstId, at: InstId) -> bool {
        let db = self.block_of(def);
        let ab = self.block_of(at);
        if db != ab {
            return self.dominates(db, ab);
        }
        if self.inst(def).is_phi() {
            return !self.inst(at).is_phi();
        }
        if self.inst(at).is_phi() {
            return false;
        }
        let list = &self.block(db).instructions;
        let d = list.iter().position(|&i| i == def);
        let a = list.iter().position(|&i| i == at);
        matches!((d, a), (Some(d), Some(a)) if d < a)
    }

    fn analyze_loops(&mut self) {
        self.loops.clear();
        let ids: Vec<BlockId> = self.block_ids().collect();
        for &b in &ids {
            self.block_mut(b).loop_header = None;
        }

        let mut rpo_index: SecondaryMap<BasicBlock, u32> =
            SecondaryMap::with_capacity(self.block_capacity());
        let mut reachable = BitSet::with_capacity(self.block_capacity());
        for (i, &b) in self.rpo.iter().enumerate() {
            rpo_index.set(b, i as u32);
            reachable.insert(b.as_usize());
        }

        // Retreating edges go to an earlier block in reverse postorder.
        let mut retreating = Vec::new();
        for &block in &self.rpo {
            for &succ in &self.block(block).successors {
                if rpo_index[succ] <= rpo_index[block] {
                    retreating.push((block, succ, !self.dominates(succ, block)));
                }
            }
        }
        for (block, succ, irreducible) in retreating {
            let info = self.loops.entry(succ).or_insert_with(|| LoopInfo {
                header: succ,
                back_edges: Vec::new(),
                blocks: BitSet::new(),
                outer: None,
                irreducible: false,
                depth: 1,
            });
            info.back_edges.push(block);
            info.irreducible |= irreducible;
        }

        let headers: Vec<BlockId> = self.loops.keys().copied().collect();
        for &header in &headers {
            let info = &self.loops[&header];
            let body =
                self.collect_loop_body(header, &info.back_edges, info.irreducible, &reachable);
            if let Some(info) = self.loops.get_mut(&header) {
                info.blocks = body;
            }
        }

        // Innermost enclosing loop: the smallest other loop containing the header.
        for &header in &headers {
            let outer = headers
                .iter()
                .copied()
                .filter(|&h| h != header && self.loops[&h].contains(header))
                .min_by_key(|h| self.loops[h].blocks.count());
            if let Some(info) = self.loops.get_mut(&header) {
                info.outer = outer;
            }
        }
        for &header in &headers {
            let mut depth = 1;
            let mut current = self.loops[&header].outer;
            while let Some(h) = current {
                depth += 1;
                current = self.loops[&h].outer;
            }
            if let Some(info) = self.loops.get_mut(&header) {
                info.depth = depth;
            }
        }

        for &block in &self.rpo.clone() {
            let innermost = headers
                .iter()
                .copied()
                .filter(|h| self.loops[h].contains(block))
                .max_by_key(|h| self.loops[h].depth);
            self.block_mut(block).loop_header = innermost;
        }
    }

    /// Blocks that reach a back edge without passing the header. For
    /// irreducible loops this is limited to blocks reachable from the header.
    fn collect_loop_body(
        &self,
        header: BlockId,
        back_edges: &[BlockId],
        irreducible: bool,
        reachable: &BitSet,
    ) -> BitSet {
        let forward = if irreducible {
            let mut seen = BitSet::with_capacity(self.block_capacity());
            let mut work = vec![header];
            seen.insert(header.as_usize());
            while let Some(b) = work.pop() {
                for &s in &self.block(b).successors {
                    if seen.insert(s.as_usize()) {
                        work.push(s);
                    }
                }
            }
            Some(seen)
        } else {
            None
        };

        let mut body = BitSet::with_capacity(self.block_capacity());
        body.insert(header.as_usize());
        let mut worklist: VecDeque<BlockId> = back_edges.iter().copied().collect();
        while let Some(block) = worklist.pop_front() {
            if !reachable.contains(block.as_usize()) {
                continue;
            }
            if forward.as_ref().is_some_and(|f| !f.contains(block.as_usize())) {
                continue;
            }
            if body.insert(block.as_usize()) {
                worklist.extend(self.block(block).predecessors.iter().copied());
            }
        }
        body
    }

    /// Loop whose header is `header`.
    #[inline]
    pub fn loop_info(&self, header: BlockId) -> Option<&LoopInfo> {
        self.loops.get(&header)
    }

    /// Innermost loop containing `block`.
    pub fn loop_of(&self, block: BlockId) -> Option<&LoopInfo> {
        self.block(block)
            .loop_header
            .and_then(|h| self.loops.get(&h))
    }

    #[inline]
    pub fn is_loop_header(&self, block: BlockId) -> bool {
        self.loops.contains_key(&block)
    }

    /// All loops, outermost first.
    pub fn loops(&self) -> Vec<&LoopInfo> {
        let mut all: Vec<&LoopInfo> = self.loops.values().collect();
        all.sort_by_key(|l| (l.depth, l.header));
        all
    }

    // =========================================================================
    // Normalization
    // =========================================================================

    /// Split critical edges and give each loop a dedicated preheader placed
    /// first among the header's predecessors.
    ///
    /// Runs on the block skeleton before SSA construction: headers must not
    /// have phis yet. New blocks are empty; the caller terminates them.
    pub fn normalize_skeleton(&mut self) -> Vec<BlockId> {
        let mut created = Vec::new();
        self.rebuild_analyses();

        let blocks: Vec<BlockId> = self.rpo.clone();
        for &block in &blocks {
            if self.block(block).successors.len() < 2 {
                continue;
            }
            for succ in self.block(block).successors.clone() {
                if self.block(succ).predecessors.len() > 1 {
                    created.push(self.split_edge_skeleton(block, succ));
                }
            }
        }
        self.rebuild_analyses();

        let headers: Vec<BlockId> = self.loops.keys().copied().collect();
        for header in headers {
            debug_assert!(self.block(header).phis.is_empty());
            let back_edges = self.loops[&header].back_edges.clone();
            let entries: Vec<BlockId> = self
                .block(header)
                .predecessors
                .iter()
                .copied()
                .filter(|p| !back_edges.contains(p))
                .collect();

            let pre_header = match entries.as_slice() {
                [single] if self.block(*single).successors.len() == 1 => *single,
                _ => {
                    let dex_pc = self.block(header).dex_pc;
                    let ph = self.create_block(dex_pc);
                    for &p in &entries {
                        self.replace_successor(p, header, ph);
                        self.block_mut(ph).predecessors.push(p);
                    }
                    self.block_mut(header)
                        .predecessors
                        .retain(|p| !entries.contains(p));
                    self.block_mut(header).predecessors.insert(0, ph);
                    self.block_mut(ph).successors.push(header);
                    created.push(ph);
                    ph
                }
            };
            let preds = &mut self.block_mut(header).predecessors;
            if let Some(pos) = preds.iter().position(|&p| p == pre_header) {
                preds.remove(pos);
                preds.insert(0, pre_header);
            }
        }
        self.rebuild_analyses();
        created
    }

    fn split_edge_skeleton(&mut self, from: BlockId, to: BlockId) -> BlockId {
        let dex_pc = self.block(to).dex_pc;
        let middle = self.create_block(dex_pc);
        self.replace_successor(from, to, middle);
        self.replace_predecessor(to, from, middle);
        self.block_mut(middle).predecessors.push(from);
        self.block_mut(middle).successors.push(to);
        middle
    }

    /// Insert `if (?) {} else {}` between a loop and its preheader.
    ///
    /// The old preheader flows into the new `if_block`, whose arms join in a
    /// new preheader. Dominators and loop membership of the new blocks are
    /// updated in place; reverse postorder is left stale until the next
    /// [`Graph::rebuild_analyses`].
    pub fn insert_taken_test(&mut self, header: BlockId) -> TakenTestBlocks {
        let old_pre_header = self.block(header).predecessors[0];
        let dex_pc = self.block(header).dex_pc;

        let if_block = self.create_block(dex_pc);
        let true_block = self.create_block(dex_pc);
        let false_block = self.create_block(dex_pc);
        let new_pre_header = self.create_block(dex_pc);

        self.set_dex_pc(dex_pc);
        self.add(true_block, Operator::Goto, DataType::Void, &[]);
        self.add(false_block, Operator::Goto, DataType::Void, &[]);
        self.add(new_pre_header, Operator::Goto, DataType::Void, &[]);

        self.replace_successor(old_pre_header, header, if_block);
        self.block_mut(if_block).predecessors.push(old_pre_header);
        self.add_edge(if_block, true_block);
        self.add_edge(if_block, false_block);
        self.add_edge(true_block, new_pre_header);
        self.add_edge(false_block, new_pre_header);
        self.replace_predecessor(header, old_pre_header, new_pre_header);
        self.block_mut(new_pre_header).successors.push(header);

        // Dominator tree.
        self.block_mut(if_block).dominator = Some(old_pre_header);
        for b in [true_block, false_block, new_pre_header] {
            self.block_mut(b).dominator = Some(if_block);
        }
        self.block_mut(if_block).dominated = vec![true_block, false_block, new_pre_header];
        for d in self.block_mut(old_pre_header).dominated.iter_mut() {
            if *d == header {
                *d = if_block;
            }
        }
        self.block_mut(header).dominator = Some(new_pre_header);
        self.block_mut(new_pre_header).dominated.push(header);

        // New blocks sit wherever the old preheader sits.
        let outer = self.block(old_pre_header).loop_header;
        let mut current = outer;
        while let Some(h) = current {
            if let Some(info) = self.loops.get_mut(&h) {
                for b in [if_block, true_block, false_block, new_pre_header] {
                    info.blocks.insert(b.as_usize());
                }
                current = info.outer;
            } else {
                break;
            }
        }
        for b in [if_block, true_block, false_block, new_pre_header] {
            self.block_mut(b).loop_header = outer;
        }

        TakenTestBlocks {
            if_block,
            true_block,
            false_block,
            new_pre_header,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{JavaType, Signature};

    fn skeleton(edges: &[(u32, u32)], n: u32) -> (Graph, Vec<BlockId>) {
        let sig = Signature::new(JavaType::Void, "Main", "cfg", vec![]);
        let mut g = Graph::new(sig, 0);
        let mut blocks = vec![g.entry];
        for _ in 1..n {
            blocks.push(g.create_block(0));
        }
        for &(a, b) in edges {
            g.add_edge(blocks[a as usize], blocks[b as usize]);
        }
        (g, blocks)
    }

    #[test]
    fn test_dominators_of_diamond() {
        let (mut g, b) = skeleton(&[(0, 2), (2, 3), (2, 4), (3, 5), (4, 5)], 6);
        g.rebuild_analyses();
        assert_eq!(g.block(b[5]).dominator, Some(b[2]));
        assert!(g.dominates(b[2], b[4]));
        assert!(!g.dominates(b[3], b[5]));
        assert_eq!(g.reverse_post_order()[0], g.entry);
    }

    #[test]
    fn test_natural_loop_detection() {
        // entry -> 2 (header) -> 3 -> 2, 2 -> 4
        let (mut g, b) = skeleton(&[(0, 2), (2, 3), (3, 2), (2, 4)], 5);
        g.rebuild_analyses();
        let info = g.loop_info(b[2]).map(|l| (l.back_edges.clone(), l.irreducible));
        assert_eq!(info, Some((vec![b[3]], false)));
        assert!(g.loop_of(b[3]).is_some());
        assert!(g.loop_of(b[4]).is_none());
    }

    #[test]
    fn test_nested_loop_depth() {
        let (mut g, b) = skeleton(
            &[(0, 2), (2, 3), (3, 4), (4, 3), (3, 5), (5, 2), (2, 6)],
            7,
        );
        g.rebuild_analyses();
        let inner = g.loop_info(b[3]).map(|l| (l.depth, l.outer));
        assert_eq!(inner, Some((2, Some(b[2]))));
        assert_eq!(g.block(b[4]).loop_header, Some(b[3]));
    }

    #[test]
    fn test_normalize_adds_preheader_first() {
        // Two entries into the loop header plus a back edge.
        let (mut g, b) = skeleton(&[(0, 2), (2, 3), (2, 4), (3, 4), (4, 5), (5, 4), (4, 6)], 7);
        let created = g.normalize_skeleton();
        assert!(!created.is_empty());
        let header = b[4];
        let info = g.loop_info(header).map(|l| l.pre_header(&g));
        let pre = info.unwrap_or(BlockId::INVALID);
        assert!(created.contains(&pre));
        assert_eq!(g.block(pre).successors, vec![header]);
        // No critical edges remain.
        for id in g.block_ids() {
            let bb = g.block(id);
            if bb.successors.len() > 1 {
                for &s in &bb.successors {
                    assert_eq!(g.block(s).predecessors.len(), 1);
                }
            }
        }
    }

    #[test]
    fn test_irreducible_loop_flagged() {
        // entry branches into both 3 and 4, which jump to each other.
        let (mut g, b) = skeleton(&[(0, 2), (2, 3), (2, 4), (3, 4), (4, 3), (4, 5)], 6);
        g.rebuild_analyses();
        assert!(g.loops().iter().any(|l| l.irreducible));
        let _ = b;
    }
}
