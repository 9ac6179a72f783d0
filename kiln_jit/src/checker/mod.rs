//! Annotation-driven checks over IR dumps.
//!
//! ```text
//! source.kasm ──► assemble ──► build ──► pipeline ──► DumpRecorder
//!      │                                                  │
//!      └──► parse_annotations ──► CheckBlock ──► match_block ◄┘
//! ```
//!
//! A method that fails to build or to verify is recorded as a compile
//! failure and its blocks fail with "no dump". Blocks for another ISA are
//! skipped.

pub mod dump;
pub mod matcher;
pub mod parser;

pub use dump::{dump_graph, dump_pass, DumpPhase, DumpRecorder};
pub use matcher::{match_block, CheckFailure};
pub use parser::{parse_annotations, Assertion, AssertionKind, CheckBlock};

use regex::Regex;
use tracing::{debug, warn};

use crate::bytecode::{parse_program, Program};
use crate::error::{CheckError, Result};
use crate::ir::build_graph;
use crate::opt::pipeline::{OptPipeline, PipelineConfig};

/// A method the pipeline could not compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    pub method: String,
    pub message: String,
}

// =============================================================================
// Selection
// =============================================================================

/// Which methods and passes a run covers.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    method: Option<Regex>,
    pass: Option<String>,
}

impl Selection {
    /// Every method and pass.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only methods whose printed signature matches `glob`, where `*` is
    /// any run of characters and `?` any one character.
    pub fn with_method_glob(mut self, glob: &str) -> Result<Self, CheckError> {
        let mut pattern = String::from("^");
        for c in glob.chars() {
            match c {
                '*' => pattern.push_str(".*"),
                '?' => pattern.push('.'),
                c => pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        pattern.push('$');
        let regex = Regex::new(&pattern).map_err(|source| CheckError::Regex {
            line: 0,
            pattern: glob.to_string(),
            source,
        })?;
        self.method = Some(regex);
        Ok(self)
    }

    /// Only dumps of `pass`.
    pub fn with_pass(mut self, pass: impl Into<String>) -> Self {
        self.pass = Some(pass.into());
        self
    }

    #[inline]
    pub fn pass(&self) -> Option<&str> {
        self.pass.as_deref()
    }

    /// Whether a signature is selected. A glob without a `.` matches the
    /// method name alone, so `sum*` selects `int Main.sum(int[])`.
    pub fn selects_method(&self, signature: &str) -> bool {
        let Some(regex) = &self.method else {
            return true;
        };
        if regex.is_match(signature) {
            return true;
        }
        let name = signature
            .split_once('(')
            .and_then(|(head, _)| head.rsplit(|c: char| c == '.' || c == ' ').next());
        name.is_some_and(|n| regex.is_match(n))
    }

    #[inline]
    pub fn selects_pass(&self, pass: &str) -> bool {
        self.pass.as_deref().map_or(true, |p| p == pass)
    }
}

// =============================================================================
// Running
// =============================================================================

/// Outcome of checking one source file.
#[derive(Debug, Default)]
pub struct CheckReport {
    /// Blocks matched, whether or not they held.
    pub checked: usize,
    /// Blocks for another ISA or outside the selection.
    pub skipped: usize,
    pub failures: Vec<CheckFailure>,
    pub compile_failures: Vec<CompileFailure>,
    /// Dumps of every compiled method.
    pub dumps: DumpRecorder,
}

impl CheckReport {
    #[inline]
    pub fn passed(&self) -> bool {
        self.failures.is_empty() && self.compile_failures.is_empty()
    }

    /// Blocks that held.
    #[inline]
    pub fn succeeded(&self) -> usize {
        self.checked - self.failures.len()
    }
}

/// Build and optimize the selected methods, recording their dumps.
fn compile_selected(
    program: &Program,
    config: &PipelineConfig,
    selection: &Selection,
    dumps: &mut DumpRecorder,
) -> Vec<CompileFailure> {
    let mut failures = Vec::new();
    for method in &program.methods {
        let signature = method.signature.to_string();
        if !selection.selects_method(&signature) {
            continue;
        }
        let compiled = build_graph(method)
            .map_err(|e| e.to_string())
            .and_then(|mut graph| {
                OptPipeline::with_config(config.clone())
                    .run_observed(&mut graph, &mut *dumps)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            });
        if let Err(message) = compiled {
            warn!(method = %signature, %message, "method not compiled");
            failures.push(CompileFailure {
                method: signature,
                message,
            });
        }
    }
    failures
}

/// Compile the selected methods of `source` and return their dumps.
pub fn dump_source(
    source: &str,
    config: &PipelineConfig,
    selection: &Selection,
) -> Result<(DumpRecorder, Vec<CompileFailure>)> {
    let program = parse_program(source)?;
    let mut dumps = match selection.pass() {
        Some(pass) => DumpRecorder::for_pass(pass),
        None => DumpRecorder::new(),
    };
    let failures = compile_selected(&program, config, selection, &mut dumps);
    Ok((dumps, failures))
}

/// Compile every method of `source` and run every check block in it.
///
/// Assembly and annotation errors are fatal for the file.
pub fn check_source(source: &str, config: &PipelineConfig) -> Result<CheckReport> {
    check_selected(source, config, &Selection::all())
}

/// [`check_source`] restricted to a selection of methods and passes.
pub fn check_selected(
    source: &str,
    config: &PipelineConfig,
    selection: &Selection,
) -> Result<CheckReport> {
    let program = parse_program(source)?;
    let blocks = parse_annotations(source)?;
    let mut report = CheckReport {
        dumps: match selection.pass() {
            Some(pass) => DumpRecorder::for_pass(pass),
            None => DumpRecorder::new(),
        },
        ..CheckReport::default()
    };
    report.compile_failures = compile_selected(&program, config, selection, &mut report.dumps);

    for block in &blocks {
        if !block.applies_to(config.isa)
            || !selection.selects_method(&block.method)
            || !selection.selects_pass(&block.pass)
        {
            report.skipped += 1;
            continue;
        }
        report.checked += 1;
        let key = block.dump_key();
        let result = match report.dumps.get(&key) {
            Some(dump) => match_block(block, dump),
            None => Err(CheckFailure {
                key: key.clone(),
                line: block.line,
                assertion: format!("CHECK-START: {key}"),
                message: "no dump recorded under this key".to_string(),
                bindings: Vec::new(),
            }),
        };
        match result {
            Ok(()) => debug!(%key, "check passed"),
            Err(failure) => report.failures.push(failure),
        }
    }

    Ok(report)
}
