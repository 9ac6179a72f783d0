//! Pipeline configuration resolved from the config file and CLI flags.
//!
//! The TOML file holds `PipelineConfig` fields at top level and BCE options
//! in a `[bce]` table; anything missing keeps its default:
//!
//! ```toml
//! isa = "x86_64"
//! enable_bce = true
//!
//! [bce]
//! dynamic = false
//! ```
//!
//! Flags override the file, which overrides the defaults.

use std::fs;
use std::path::Path;

use kiln_jit::checker::Selection;
use kiln_jit::opt::pipeline::PipelineConfig;
use tracing::debug;

use crate::args::KilnArgs;
use crate::error::CliError;

/// Everything a run needs besides the source text.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub pipeline: PipelineConfig,
    pub selection: Selection,
}

impl RunConfig {
    /// Resolve the configuration for `args`.
    pub fn from_args(args: &KilnArgs) -> Result<Self, CliError> {
        let mut pipeline = match &args.config {
            Some(path) => load_pipeline_config(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(isa) = args.isa {
            pipeline.isa = isa;
        }

        let mut selection = Selection::all();
        if let Some(glob) = &args.method {
            selection = selection
                .with_method_glob(glob)
                .map_err(|e| CliError::Usage(e.to_string()))?;
        }
        if let Some(pass) = &args.pass {
            selection = selection.with_pass(pass.clone());
        }

        debug!(isa = %pipeline.isa, verify = pipeline.verify, "configuration resolved");
        Ok(Self { pipeline, selection })
    }
}

/// Read a pipeline configuration from a TOML file.
pub fn load_pipeline_config(path: &Path) -> Result<PipelineConfig, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_pipeline_config(&text).map_err(|source| CliError::Config {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a pipeline configuration from TOML text.
pub fn parse_pipeline_config(text: &str) -> Result<PipelineConfig, toml::de::Error> {
    toml::from_str(text)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use kiln_jit::opt::pipeline::InstructionSet;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_default() {
        let config = parse_pipeline_config("").expect("parses");
        assert_eq!(config.isa, PipelineConfig::default().isa);
        assert!(config.enable_bce);
        assert!(config.bce.dynamic);
    }

    #[test]
    fn test_fields_and_bce_table() {
        let config = parse_pipeline_config(
            "isa = \"x86_64\"\nenable_simplify = false\n\n[bce]\ndynamic = false\n",
        )
        .expect("parses");
        assert_eq!(config.isa, InstructionSet::X86_64);
        assert!(!config.enable_simplify);
        assert!(!config.bce.dynamic);
        assert!(config.bce.hoist_array_gets);
    }

    #[test]
    fn test_bad_toml_rejected() {
        assert!(parse_pipeline_config("isa = \"sparc\"").is_err());
        assert!(parse_pipeline_config("enable_bce = 3").is_err());
    }

    #[test]
    fn test_flag_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "isa = \"x86_64\"").expect("write");
        let path = file.path().to_str().expect("utf-8 path").to_string();

        let args = KilnArgs::try_parse_from(["kiln", "f.kasm", "--config", &path]).expect("parses");
        let run = RunConfig::from_args(&args).expect("resolves");
        assert_eq!(run.pipeline.isa, InstructionSet::X86_64);

        let args = KilnArgs::try_parse_from(["kiln", "f.kasm", "--config", &path, "--isa", "arm64"])
            .expect("parses");
        let run = RunConfig::from_args(&args).expect("resolves");
        assert_eq!(run.pipeline.isa, InstructionSet::Arm64);
    }

    #[test]
    fn test_missing_config_file() {
        let args =
            KilnArgs::try_parse_from(["kiln", "f.kasm", "--config", "/nonexistent/kiln.toml"])
                .expect("parses");
        assert!(matches!(RunConfig::from_args(&args), Err(CliError::Io { .. })));
    }
}
