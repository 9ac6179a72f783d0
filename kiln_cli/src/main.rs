//! kiln: compile assembly files and check their IR annotations.
//!
//! Exits 0 when every selected check holds, 1 when a check or a method
//! fails, and 2 on usage errors.

mod args;
mod config;
mod diagnostics;
mod error;

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use kiln_jit::checker::{check_selected, dump_source, CheckReport, CompileFailure};
use kiln_jit::opt::pipeline::OptPipeline;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::args::KilnArgs;
use crate::config::RunConfig;
use crate::error::{format_error, CliError, EXIT_ERROR, EXIT_SUCCESS};

fn main() -> ExitCode {
    let args = KilnArgs::parse();
    init_logging(&args);
    run(&args)
}

fn init_logging(args: &KilnArgs) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: &KilnArgs) -> ExitCode {
    let config = match RunConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => return fail(&e, None, ""),
    };

    // clap only lets the file be absent when listing passes.
    match &args.file {
        Some(path) if !args.list_passes => compile_file(args, &config, path),
        _ => list_passes(&config),
    }
}

fn list_passes(config: &RunConfig) -> ExitCode {
    for name in OptPipeline::with_config(config.pipeline.clone()).pass_names() {
        println!("{name}");
    }
    ExitCode::from(EXIT_SUCCESS)
}

fn compile_file(args: &KilnArgs, config: &RunConfig, path: &Path) -> ExitCode {
    let filename = path.display().to_string();
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(source) => {
            let e = CliError::Io {
                path: path.to_path_buf(),
                source,
            };
            return fail(&e, None, &filename);
        }
    };
    info!(file = %filename, isa = %config.pipeline.isa, "compiling");

    if args.dump {
        match dump_source(&source, &config.pipeline, &config.selection) {
            Ok((dumps, failures)) => {
                for (_, dump) in dumps.iter() {
                    println!("{dump}");
                }
                report_compile_failures(&failures)
            }
            Err(e) => fail(&CliError::from(e), Some(&source), &filename),
        }
    } else {
        match check_selected(&source, &config.pipeline, &config.selection) {
            Ok(report) => report_checks(&report, &filename),
            Err(e) => fail(&CliError::from(e), Some(&source), &filename),
        }
    }
}

fn fail(error: &CliError, source: Option<&str>, filename: &str) -> ExitCode {
    eprint!("{}", format_error(error, source, filename));
    error.exit_code()
}

fn report_compile_failures(failures: &[CompileFailure]) -> ExitCode {
    for failure in failures {
        eprintln!("error: {}: {}", failure.method, failure.message);
    }
    if failures.is_empty() {
        ExitCode::from(EXIT_SUCCESS)
    } else {
        ExitCode::from(EXIT_ERROR)
    }
}

fn report_checks(report: &CheckReport, filename: &str) -> ExitCode {
    for failure in &report.failures {
        eprintln!("FAIL {filename}: {failure}");
        if let Some(dump) = report.dumps.get(&failure.key) {
            debug!("dump for failing block:\n{dump}");
        }
    }
    let code = report_compile_failures(&report.compile_failures);
    println!(
        "{filename}: {} passed, {} failed, {} skipped",
        report.succeeded(),
        report.failures.len(),
        report.skipped
    );
    if report.passed() {
        code
    } else {
        ExitCode::from(EXIT_ERROR)
    }
}
