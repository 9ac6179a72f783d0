//! Block-structured SSA intermediate representation.
//!
//! # Core Components
//!
//! - **Types** (`types.rs`): value types and their stack kinds
//! - **Operators** (`operators.rs`): instruction kinds and their effects
//! - **Arena** (`arena.rs`): id-indexed storage and bit sets
//! - **Instruction** (`instruction.rs`): instructions, inputs, environments
//! - **Graph** (`graph.rs`): per-method storage, use chains, editing
//! - **CFG** (`cfg.rs`): reverse postorder, dominators, loops, normalization
//! - **Builder** (`builder/`): bytecode to SSA translation
//! - **Verify** (`verify.rs`): structural invariant checks
//!
//! # Design Principles
//!
//! - **Arena allocation**: ids instead of pointers, cheap cloning of graphs
//! - **Use-def chains**: ordinary and environment uses kept apart
//! - **Blocks own order**: phis first, then instructions, then one terminator

pub mod arena;
pub mod builder;
pub mod cfg;
pub mod graph;
pub mod instruction;
pub mod operators;
pub mod types;
pub mod verify;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::{build_graph, GraphBuilder};
pub use cfg::{BasicBlock, BlockId, LoopInfo, TakenTestBlocks};
pub use graph::Graph;
pub use instruction::{Environment, InputList, InstFlags, InstId, Instruction, Use};
pub use operators::{
    BinaryOp, ComparisonBias, CondKind, DataProcKind, DeoptimizationKind, Intrinsic,
    InvokeTarget, Operator, ShifterOpKind, ShifterOperation, UnaryOp,
};
pub use types::DataType;
pub use verify::GraphError;
