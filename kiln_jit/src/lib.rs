//! Optimizing compiler core for a JVM-flavoured stack bytecode.
//!
//! The crate provides:
//! - A typed SSA IR with explicit guards, environments and loop analysis
//! - Constant folding, algebraic simplification and dead code elimination
//! - Bounds-check elimination, static and through deoptimization guards
//! - Rotate recognition and Arm64 shifter-operand fusion
//! - IR dumps, a CHECK-annotation matcher and a reference interpreter
//!
//! Typical use goes through [`opt::pipeline::OptPipeline`]:
//!
//! ```no_run
//! use kiln_jit::bytecode::parse_program;
//! use kiln_jit::ir::build_graph;
//! use kiln_jit::opt::pipeline::OptPipeline;
//!
//! let program = parse_program(".method static int f()\n iconst 1\n ireturn\n.end\n")?;
//! let mut graph = build_graph(&program.methods[0])?;
//! OptPipeline::new().run(&mut graph)?;
//! # Ok::<(), kiln_jit::error::KilnError>(())
//! ```

pub mod bytecode;
pub mod checker;
pub mod error;
pub mod interp;
pub mod ir;
pub mod opt;

pub use error::{KilnError, Result};
