//! Optimization Pipeline.
//!
//! Runs the passes of one method graph in a fixed order:
//!
//! ```text
//! instruction_simplifier -> constant_folding -> dead_code_elimination
//!     -> BCE -> instruction_simplifier_arm64 (Arm64 only)
//!     -> dead_code_elimination$final
//! ```
//!
//! Each pass runs inside an `info_span!("pass")`. A [`PassObserver`] sees the
//! graph before and after every pass, which is how the checker collects its
//! dumps. With `verify` set the graph is checked after every pass and a broken
//! graph stops the pipeline with [`KilnError::Verify`].

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info_span};

use super::arm64::InstructionSimplifierArm64;
use super::bce::{BceConfig, BoundsCheckElimination};
use super::dce::Dce;
use super::fold::ConstantFolding;
use super::simplify::InstructionSimplifier;
use super::OptimizationPass;
use crate::error::{KilnError, Result};
use crate::ir::graph::Graph;

// =============================================================================
// Target
// =============================================================================

/// Instruction set the graph is optimized for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
pub enum InstructionSet {
    #[default]
    #[serde(rename = "arm64", alias = "ARM64")]
    Arm64,
    #[serde(rename = "x86_64", alias = "X86_64")]
    X86_64,
}

impl InstructionSet {
    pub const ALL: [InstructionSet; 2] = [InstructionSet::Arm64, InstructionSet::X86_64];

    pub const fn name(self) -> &'static str {
        match self {
            InstructionSet::Arm64 => "arm64",
            InstructionSet::X86_64 => "x86_64",
        }
    }

    /// Whether data-processing instructions take shifted or extended operands.
    #[inline]
    pub const fn has_shifter_operands(self) -> bool {
        matches!(self, InstructionSet::Arm64)
    }
}

impl fmt::Display for InstructionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name that is not a supported instruction set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown instruction set `{0}` (expected arm64 or x86_64)")]
pub struct UnknownIsa(pub String);

impl FromStr for InstructionSet {
    type Err = UnknownIsa;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        InstructionSet::ALL
            .into_iter()
            .find(|isa| isa.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownIsa(s.to_string()))
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Configuration for the optimization pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub isa: InstructionSet,

    /// Enable the arch-independent simplifier.
    pub enable_simplify: bool,

    /// Enable constant folding.
    pub enable_folding: bool,

    /// Enable both DCE runs.
    pub enable_dce: bool,

    /// Enable bounds-check elimination.
    pub enable_bce: bool,

    /// Verify the graph after every pass.
    pub verify: bool,

    /// Collect timing statistics.
    pub collect_timing: bool,

    pub bce: BceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            isa: InstructionSet::default(),
            enable_simplify: true,
            enable_folding: true,
            enable_dce: true,
            enable_bce: true,
            verify: cfg!(debug_assertions),
            collect_timing: true,
            bce: BceConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Folding and cleanup only, with static bounds-check elimination.
    pub fn minimal() -> Self {
        Self {
            enable_simplify: false,
            collect_timing: false,
            bce: BceConfig::minimal(),
            ..Default::default()
        }
    }

    /// Every pass, verified after each one.
    pub fn full() -> Self {
        Self {
            verify: true,
            bce: BceConfig::full(),
            ..Default::default()
        }
    }

    pub fn with_isa(mut self, isa: InstructionSet) -> Self {
        self.isa = isa;
        self
    }
}

// =============================================================================
// Observation
// =============================================================================

/// Hook called around every pass.
pub trait PassObserver {
    fn before_pass(&mut self, _pass: &'static str, _graph: &Graph) {}

    fn after_pass(&mut self, _pass: &'static str, _graph: &Graph, _changed: bool) {}
}

/// Observer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoObserver;

impl PassObserver for NoObserver {}

// =============================================================================
// Pass Entry
// =============================================================================

/// A registered pass in the pipeline.
struct PassEntry {
    pass: Box<dyn OptimizationPass>,
    runs: usize,
    changes: usize,
    time: Duration,
}

impl PassEntry {
    fn new<P: OptimizationPass + 'static>(pass: P) -> Self {
        Self {
            pass: Box::new(pass),
            runs: 0,
            changes: 0,
            time: Duration::ZERO,
        }
    }
}

// =============================================================================
// Optimization Pipeline
// =============================================================================

/// The main optimization pipeline.
pub struct OptPipeline {
    config: PipelineConfig,

    /// Registered passes in order.
    passes: Vec<PassEntry>,

    total_time: Duration,
}

impl OptPipeline {
    /// Create a new pipeline with default configuration.
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Create a pipeline with custom configuration.
    pub fn with_config(config: PipelineConfig) -> Self {
        let mut pipeline = Self {
            config,
            passes: Vec::new(),
            total_time: Duration::ZERO,
        };
        pipeline.register_default_passes();
        pipeline
    }

    fn register_default_passes(&mut self) {
        if self.config.enable_simplify {
            self.register(InstructionSimplifier::new());
        }
        if self.config.enable_folding {
            self.register(ConstantFolding::new());
        }
        if self.config.enable_dce {
            self.register(Dce::new());
        }
        if self.config.enable_bce {
            self.register(BoundsCheckElimination::with_config(self.config.bce.clone()));
        }
        if self.config.isa.has_shifter_operands() {
            self.register(InstructionSimplifierArm64::new());
        }
        if self.config.enable_dce {
            self.register(Dce::final_cleanup());
        }
    }

    /// Append a pass after the registered ones.
    pub fn register<P: OptimizationPass + 'static>(&mut self, pass: P) {
        self.passes.push(PassEntry::new(pass));
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Names of the registered passes, in run order.
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|e| e.pass.name()).collect()
    }

    /// Run every pass on a graph.
    pub fn run(&mut self, graph: &mut Graph) -> Result<PipelineStats> {
        self.run_observed(graph, &mut NoObserver)
    }

    /// Run every pass, reporting the graph around each one to `observer`.
    pub fn run_observed(
        &mut self,
        graph: &mut Graph,
        observer: &mut dyn PassObserver,
    ) -> Result<PipelineStats> {
        let start = Instant::now();
        let mut stats = PipelineStats {
            initial_size: graph.all_instructions().len(),
            ..PipelineStats::default()
        };

        for entry in &mut self.passes {
            let name = entry.pass.name();
            let span = info_span!("pass", pass = name);
            let _enter = span.enter();

            observer.before_pass(name, graph);
            let pass_start = self.config.collect_timing.then(Instant::now);
            let changed = entry.pass.run(graph);
            if let Some(pass_start) = pass_start {
                entry.time += pass_start.elapsed();
            }
            entry.runs += 1;
            stats.passes_run += 1;
            if changed {
                entry.changes += 1;
                stats.passes_changed += 1;
            }
            if self.config.verify {
                graph
                    .verify()
                    .map_err(|source| KilnError::Verify { pass: name, source })?;
            }
            debug!(changed, "pass done");
            observer.after_pass(name, graph, changed);
        }

        self.total_time += start.elapsed();
        stats.total_time = start.elapsed();
        stats.final_size = graph.all_instructions().len();
        Ok(stats)
    }

    /// Get pass statistics.
    pub fn pass_stats(&self) -> Vec<PassStat> {
        self.passes
            .iter()
            .map(|e| PassStat {
                name: e.pass.name(),
                runs: e.runs,
                changes: e.changes,
                time: e.time,
            })
            .collect()
    }

    #[inline]
    pub fn total_time(&self) -> Duration {
        self.total_time
    }
}

impl Default for OptPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from a single pass.
#[derive(Debug, Clone)]
pub struct PassStat {
    pub name: &'static str,
    /// Number of times run.
    pub runs: usize,
    /// Number of times it made changes.
    pub changes: usize,
    pub time: Duration,
}

/// Statistics from one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub passes_run: usize,
    pub passes_changed: usize,
    pub total_time: Duration,
    /// Live instructions before the first pass.
    pub initial_size: usize,
    /// Live instructions after the last pass.
    pub final_size: usize,
}

impl PipelineStats {
    /// Get size reduction ratio.
    pub fn size_reduction(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}

// =============================================================================
// Quick Optimize Functions
// =============================================================================

/// Run the default pipeline on a graph.
pub fn optimize(graph: &mut Graph) -> Result<PipelineStats> {
    OptPipeline::new().run(graph)
}

/// Run the minimal pipeline on a graph.
pub fn optimize_minimal(graph: &mut Graph) -> Result<PipelineStats> {
    OptPipeline::with_config(PipelineConfig::minimal()).run(graph)
}

// =============================================================================
// Tests
// =============================================================================
