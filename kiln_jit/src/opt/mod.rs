//! Optimization passes.
//!
//! Passes run in a fixed order driven by [`pipeline::OptPipeline`]:
//!
//! 1. [`simplify`]: canonicalization, algebraic identities, rotate recognition
//! 2. [`fold`]: constant folding and absorbing identities
//! 3. [`dce`]: branch folding, block merging and dead instruction removal
//! 4. [`bce`]: bounds-check elimination
//! 5. [`arm64`]: shifter-operand fusion, Arm64 only
//! 6. [`dce`] again as the final cleanup
//!
//! A pass that cannot prove a rewrite safe leaves the graph untouched. Every
//! pass leaves the graph verifiable and its analyses current.

pub mod arm64;
pub mod bce;
pub mod dce;
pub mod fold;
pub mod pipeline;
pub mod simplify;

use crate::ir::graph::Graph;

/// A transformation over one method graph.
pub trait OptimizationPass {
    /// Name used in dumps and CHECK-START lines.
    fn name(&self) -> &'static str;

    /// Run the pass, returning whether the graph changed.
    fn run(&mut self, graph: &mut Graph) -> bool;
}
