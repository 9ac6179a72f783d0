//! Bounds-check elimination.
//!
//! Every `BoundsCheck(index, length)` ends in one of three states:
//!
//! 1. **Eliminated statically**: the range of `index` is proven to lie in
//!    `[0, length - 1]`, from comparisons dominating the check or from the
//!    induction range of the enclosing loop.
//! 2. **Eliminated dynamically**: the checks of a loop, or a group of checks
//!    in straight-line code, are replaced by `Deoptimize` guards evaluated
//!    once ahead of them.
//! 3. **Kept**.
//!
//! # Module Structure
//!
//! - [`bounds`]: value bounds `instruction + c`, plain and monotonic ranges
//! - [`induction`]: basic induction variables and loop control tests
//! - `elimination`: range propagation in reverse postorder, static removal
//! - `guard_insert`: loop and dominator based guards, taken tests, hoisting

pub mod bounds;
pub mod induction;

mod elimination;
mod guard_insert;

use serde::Deserialize;
use tracing::debug;

use super::OptimizationPass;
use crate::ir::graph::Graph;
use elimination::BceVisitor;

/// Minimum number of checks a dominator-based guard must cover, one more
/// when the index has a symbolic base.
pub const THRESHOLD_FOR_ADDING_DEOPTIMIZE: usize = 2;

/// Offset spans wider than this are left to fault at run time.
pub const MAX_LENGTH_FOR_ADDING_DEOPTIMIZE: u32 = i32::MAX as u32 - (1 << 20);

// =============================================================================
// Configuration
// =============================================================================

/// Knobs of the bounds-check elimination pass.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BceConfig {
    /// Replace unprovable checks by deoptimization guards.
    pub dynamic: bool,
    /// Hoist invariant array loads out of loops that write no arrays.
    pub hoist_array_gets: bool,
}

impl Default for BceConfig {
    fn default() -> Self {
        Self {
            dynamic: true,
            hoist_array_gets: true,
        }
    }
}

impl BceConfig {
    /// Static elimination only; the graph gains no guards.
    pub fn minimal() -> Self {
        Self {
            dynamic: false,
            hoist_array_gets: false,
        }
    }

    pub fn full() -> Self {
        Self::default()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from bounds-check elimination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BceStats {
    /// Checks proven in bounds.
    pub static_eliminated: usize,
    /// Checks covered by loop preheader guards.
    pub dynamic_loop: usize,
    /// Checks covered by guards in straight-line code.
    pub dynamic_block: usize,
    pub deopts_inserted: usize,
    pub taken_tests: usize,
    pub array_gets_hoisted: usize,
    /// Checks left in the graph after the last run.
    pub kept: usize,
}

impl BceStats {
    /// Number of graph changes; kept checks are not changes.
    #[inline]
    pub fn total(&self) -> usize {
        self.static_eliminated
            + self.dynamic_loop
            + self.dynamic_block
            + self.deopts_inserted
            + self.taken_tests
            + self.array_gets_hoisted
    }

    #[inline]
    pub fn eliminated(&self) -> usize {
        self.static_eliminated + self.dynamic_loop + self.dynamic_block
    }

    fn merge(&mut self, run: &BceStats) {
        self.static_eliminated += run.static_eliminated;
        self.dynamic_loop += run.dynamic_loop;
        self.dynamic_block += run.dynamic_block;
        self.deopts_inserted += run.deopts_inserted;
        self.taken_tests += run.taken_tests;
        self.array_gets_hoisted += run.array_gets_hoisted;
        self.kept = run.kept;
    }
}

// =============================================================================
// Pass
// =============================================================================

/// Bounds-check elimination pass.
#[derive(Debug, Default)]
pub struct BoundsCheckElimination {
    config: BceConfig,
    stats: BceStats,
}

impl BoundsCheckElimination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BceConfig) -> Self {
        Self {
            config,
            stats: BceStats::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> &BceConfig {
        &self.config
    }

    /// Statistics accumulated over all runs.
    #[inline]
    pub fn stats(&self) -> &BceStats {
        &self.stats
    }
}

impl OptimizationPass for BoundsCheckElimination {
    fn name(&self) -> &'static str {
        "BCE"
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        if graph.count_named("BoundsCheck") == 0 {
            return false;
        }
        let run = BceVisitor::new(graph, self.config.clone()).run();
        debug!(
            method = %graph.signature(),
            static_eliminated = run.static_eliminated,
            dynamic_loop = run.dynamic_loop,
            dynamic_block = run.dynamic_block,
            deopts = run.deopts_inserted,
            kept = run.kept,
            "bounds-check elimination done"
        );
        self.stats.merge(&run);
        run.total() != 0
    }
}

// =============================================================================
// Tests
// =============================================================================
