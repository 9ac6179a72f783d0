//! Explicit guards ahead of faulting operations.
//!
//! ```text
//!     array      index
//!       │          │
//!   NullCheck      │
//!       │          │
//!   ArrayLength    │
//!       │          │
//!       └─► BoundsCheck ──► ArrayGet / ArraySet
//! ```
//!
//! Every guard dominates the operation it protects and records the locals in
//! an environment, so a later pass can turn a failing guard into a
//! deoptimization.

use super::GraphBuilder;
use crate::ir::instruction::InstId;
use crate::ir::operators::Operator;
use crate::ir::types::DataType;

/// Builder trait for guard instructions.
pub trait GuardBuilder {
    /// Fault if `object` is null; the result is the non-null reference.
    fn null_check(&mut self, object: InstId) -> InstId;

    /// Fault unless `0 <= index < length`; the result is the index.
    fn bounds_check(&mut self, index: InstId, length: InstId) -> InstId;

    /// Fault if `divisor` is zero; the result is the divisor.
    fn div_zero_check(&mut self, divisor: InstId) -> InstId;
}

impl GuardBuilder for GraphBuilder<'_> {
    fn null_check(&mut self, object: InstId) -> InstId {
        self.emit_with_env(Operator::NullCheck, DataType::Reference, &[object])
    }

    fn bounds_check(&mut self, index: InstId, length: InstId) -> InstId {
        self.emit_with_env(Operator::BoundsCheck, DataType::Int32, &[index, length])
    }

    fn div_zero_check(&mut self, divisor: InstId) -> InstId {
        let ty = self.graph.ty(divisor).kind();
        self.emit_with_env(Operator::DivZeroCheck, ty, &[divisor])
    }
}
