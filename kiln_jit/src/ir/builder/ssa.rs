//! Phi placement and cleanup.
//!
//! A block whose predecessors have all been interpreted gets phis only for
//! slots whose incoming values differ. A block reached by a back edge gets a
//! phi for every defined slot up front; the inputs are filled once every
//! block has been visited. Phis that turn out dead, type-conflicting or
//! trivial are then removed.

use rustc_hash::FxHashSet;
use tracing::trace;

use super::{BuildResult, FrameState, GraphBuilder};
use crate::error::BuildError;
use crate::ir::cfg::BlockId;
use crate::ir::instruction::InstId;
use crate::ir::operators::Operator;
use crate::ir::types::DataType;

/// A local or operand stack position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Slot {
    Local(usize),
    Stack(usize),
}

impl FrameState {
    fn slot(&self, slot: Slot) -> Option<InstId> {
        match slot {
            Slot::Local(i) => self.local(i),
            Slot::Stack(i) => self.stack.get(i).copied(),
        }
    }
}

/// A phi created before all of its block's predecessors were visited.
#[derive(Debug, Clone, Copy)]
pub(super) struct PendingPhi {
    phi: InstId,
    block: BlockId,
    slot: Slot,
}

/// A pending phi whose inputs could not be reconciled.
struct Conflict {
    phi: InstId,
    block: BlockId,
    slot: Slot,
    found: Option<DataType>,
}

impl GraphBuilder<'_> {
    /// Merge the exit states of the predecessors of `block`.
    pub(super) fn entry_state(&mut self, block: BlockId) -> BuildResult<FrameState> {
        let preds = self.graph.block(block).predecessors.clone();
        let states: Vec<Option<FrameState>> = preds
            .iter()
            .map(|p| self.exit_states.get(p).cloned())
            .collect();

        if let [Some(single)] = states.as_slice() {
            self.entry_depths.insert(block, single.stack.len());
            return Ok(single.clone());
        }

        let dex_pc = self.graph.block(block).dex_pc;
        self.pc = dex_pc as usize;
        self.graph.set_dex_pc(dex_pc);

        let depth = states
            .iter()
            .flatten()
            .map(|s| s.stack.len())
            .next()
            .unwrap_or(0);
        for state in states.iter().flatten() {
            if state.stack.len() != depth {
                return Err(self.unbalanced(depth, state.stack.len()));
            }
        }
        self.entry_depths.insert(block, depth);

        let complete = states.iter().all(Option::is_some);
        let num_locals = self.method.num_locals as usize;
        let mut state = FrameState::new(num_locals);
        for i in 0..num_locals {
            state.locals[i] = self.merge_slot(block, &states, Slot::Local(i), complete)?;
        }
        for i in 0..depth {
            match self.merge_slot(block, &states, Slot::Stack(i), complete)? {
                Some(value) => state.stack.push(value),
                None => return Err(self.unbalanced(depth, i)),
            }
        }
        Ok(state)
    }

    fn merge_slot(
        &mut self,
        block: BlockId,
        states: &[Option<FrameState>],
        slot: Slot,
        complete: bool,
    ) -> BuildResult<Option<InstId>> {
        let mut values = Vec::with_capacity(states.len());
        let mut kind: Option<DataType> = None;
        for state in states.iter().flatten() {
            let Some(value) = state.slot(slot) else {
                return Ok(None);
            };
            let ty = self.graph.ty(value).kind();
            match kind {
                None => kind = Some(ty),
                Some(expected) if expected != ty => {
                    if let Slot::Stack(_) = slot {
                        return Err(BuildError::TypeMismatch {
                            method: self.method_name(),
                            pc: self.pc,
                            expected,
                            found: ty,
                        });
                    }
                    // Conflicting locals are dead here; reading one fails.
                    return Ok(None);
                }
                Some(_) => {}
            }
            values.push(value);
        }
        let Some(kind) = kind else {
            return Ok(None);
        };

        if complete {
            if values.iter().all(|&v| v == values[0]) {
                return Ok(Some(values[0]));
            }
            let phi = self.graph.create(Operator::Phi, kind, &values);
            self.graph.add_phi(block, phi);
            return Ok(Some(phi));
        }

        let phi = self.graph.create(Operator::Phi, kind, &[]);
        self.graph.add_phi(block, phi);
        self.pending.push(PendingPhi { phi, block, slot });
        Ok(Some(phi))
    }

    fn unbalanced(&self, expected: usize, found: usize) -> BuildError {
        BuildError::UnbalancedStack {
            method: self.method_name(),
            pc: self.pc,
            expected,
            found,
        }
    }

    /// Fill back-edge inputs, then drop dead, conflicting and trivial phis.
    pub(super) fn complete_phis(&mut self) -> BuildResult<()> {
        for block in self.graph.reverse_post_order().to_vec() {
            let Some(&depth) = self.entry_depths.get(&block) else {
                continue;
            };
            for pred in self.graph.block(block).predecessors.clone() {
                let found = self.exit_states.get(&pred).map_or(depth, |s| s.stack.len());
                if found != depth {
                    self.pc = self.graph.block(block).dex_pc as usize;
                    return Err(self.unbalanced(depth, found));
                }
            }
        }

        let mut conflicts = Vec::new();
        for pending in std::mem::take(&mut self.pending) {
            let kind = self.graph.ty(pending.phi);
            let preds = self.graph.block(pending.block).predecessors.clone();
            let mut inputs = Vec::with_capacity(preds.len());
            let mut conflict = None;
            for pred in preds {
                let value = self.exit_states.get(&pred).and_then(|s| s.slot(pending.slot));
                match value {
                    Some(v) if self.graph.ty(v).kind() == kind => inputs.push(v),
                    other => {
                        conflict = Some(other.map(|v| self.graph.ty(v)));
                        break;
                    }
                }
            }
            match conflict {
                Some(found) => conflicts.push(Conflict {
                    phi: pending.phi,
                    block: pending.block,
                    slot: pending.slot,
                    found,
                }),
                None => {
                    for input in inputs {
                        self.graph.push_input(pending.phi, input);
                    }
                }
            }
        }

        self.eliminate_dead_phis(&conflicts)?;
        self.eliminate_trivial_phis();
        Ok(())
    }

    fn all_phis(&self) -> Vec<InstId> {
        self.graph
            .block_ids()
            .flat_map(|b| self.graph.block(b).phis.iter().copied())
            .collect()
    }

    /// Remove phis not reachable from a non-phi use. Environment uses do not
    /// keep a phi alive. A conflicting phi that is live is an error.
    fn eliminate_dead_phis(&mut self, conflicts: &[Conflict]) -> BuildResult<()> {
        let phis = self.all_phis();
        let mut live: FxHashSet<InstId> = FxHashSet::default();
        let mut work = Vec::new();
        for &phi in &phis {
            let used = self
                .graph
                .uses(phi)
                .iter()
                .any(|u| !self.graph.inst(u.user).is_phi());
            if used && live.insert(phi) {
                work.push(phi);
            }
        }
        while let Some(phi) = work.pop() {
            for input in self.graph.inst(phi).inputs.to_vec() {
                if self.graph.inst(input).is_phi() && live.insert(input) {
                    work.push(input);
                }
            }
        }

        for conflict in conflicts {
            if !live.contains(&conflict.phi) {
                continue;
            }
            let pc = self.graph.block(conflict.block).dex_pc as usize;
            return Err(match (conflict.found, conflict.slot) {
                (None, Slot::Local(slot)) => BuildError::UndefinedLocal {
                    method: self.method_name(),
                    pc,
                    slot: slot as u16,
                },
                (found, _) => BuildError::TypeMismatch {
                    method: self.method_name(),
                    pc,
                    expected: self.graph.ty(conflict.phi),
                    found: found.unwrap_or(DataType::Void),
                },
            });
        }

        let dead: Vec<InstId> = phis.into_iter().filter(|p| !live.contains(p)).collect();
        for &phi in &dead {
            while !self.graph.inst(phi).inputs.is_empty() {
                let last = self.graph.inst(phi).inputs.len() - 1;
                self.graph.remove_input(phi, last);
            }
        }
        for &phi in &dead {
            self.graph.remove(phi);
        }
        trace!(removed = dead.len(), "dead phis");
        Ok(())
    }

    /// Replace phis whose inputs are one value (besides the phi itself).
    fn eliminate_trivial_phis(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for phi in self.all_phis() {
                if let Some(value) = trivial_value(&self.graph, phi) {
                    self.graph.replace_and_remove(phi, value);
                    changed = true;
                }
            }
        }
    }
}

fn trivial_value(graph: &crate::ir::graph::Graph, phi: InstId) -> Option<InstId> {
    let mut same = None;
    for input in graph.inst(phi).inputs.iter() {
        if input == phi || Some(input) == same {
            continue;
        }
        if same.is_some() {
            return None;
        }
        same = Some(input);
    }
    same
}
