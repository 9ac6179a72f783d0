//! Command-line arguments.
//!
//! ```text
//! kiln <FILE> [--isa arm64|x86_64] [--dump] [--method <glob>] [--pass <name>]
//!             [--config <toml>] [--list-passes] [-v|-vv]
//! ```
//!
//! Usage errors are reported by clap, which exits with status 2.

use std::path::PathBuf;

use clap::Parser;
use kiln_jit::opt::pipeline::InstructionSet;

// =============================================================================
// Parsed Arguments
// =============================================================================

/// Compile an assembly file and check its `///` annotations against the IR
/// dumps of each pass.
#[derive(Debug, Clone, Parser)]
#[command(name = "kiln", version, about, long_about = None)]
pub struct KilnArgs {
    /// Assembly file to compile.
    #[arg(required_unless_present = "list_passes")]
    pub file: Option<PathBuf>,

    /// Target instruction set; overrides the config file.
    #[arg(long, value_name = "ISA")]
    pub isa: Option<InstructionSet>,

    /// Print the IR dumps instead of checking annotations.
    #[arg(long)]
    pub dump: bool,

    /// Only compile methods matching this glob (signature or bare name).
    #[arg(long, value_name = "GLOB")]
    pub method: Option<String>,

    /// Only dump or check this pass.
    #[arg(long, value_name = "NAME")]
    pub pass: Option<String>,

    /// Pipeline configuration in TOML.
    #[arg(long, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Print the passes the pipeline would run, then exit.
    #[arg(long)]
    pub list_passes: bool,

    /// More logging: `-v` for debug, `-vv` for trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl KilnArgs {
    /// Default log filter for the verbosity level; `RUST_LOG` wins when set.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "kiln_jit=debug,kiln_cli=debug",
            _ => "kiln_jit=trace,kiln_cli=trace",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
