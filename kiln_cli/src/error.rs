//! CLI errors and exit codes.

use std::path::PathBuf;
use std::process::ExitCode;

use kiln_jit::KilnError;
use thiserror::Error;

use crate::diagnostics::{self, SourceMap};

// =============================================================================
// Exit Codes
// =============================================================================

/// Every selected check held.
pub const EXIT_SUCCESS: u8 = 0;
/// A check failed, a method did not compile, or the input was malformed.
pub const EXIT_ERROR: u8 = 1;
/// Bad flags, unreadable files or an invalid config.
pub const EXIT_USAGE_ERROR: u8 = 2;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config `{}`: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Kiln(#[from] KilnError),
}

impl CliError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Kiln(_) => ExitCode::from(EXIT_ERROR),
            CliError::Io { .. } | CliError::Config { .. } | CliError::Usage(_) => {
                ExitCode::from(EXIT_USAGE_ERROR)
            }
        }
    }
}

/// Format an error for stderr, pointing into `source` when it has a line.
pub fn format_error(error: &CliError, source: Option<&str>, filename: &str) -> String {
    match (error, source) {
        (CliError::Kiln(inner), Some(source)) => {
            let map = SourceMap::new(source, filename);
            diagnostics::render(&map, inner.line(), "error", &inner.to_string())
        }
        _ => format!("error: {error}\n"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_jit::error::AsmError;

    #[test]
    fn test_exit_codes() {
        let kiln = CliError::Kiln(AsmError::OutsideMethod { line: 1 }.into());
        assert_eq!(kiln.exit_code(), ExitCode::from(EXIT_ERROR));
        assert_eq!(
            CliError::Usage("bad glob".into()).exit_code(),
            ExitCode::from(EXIT_USAGE_ERROR)
        );
        let io = CliError::Io {
            path: "missing.kasm".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(io.exit_code(), ExitCode::from(EXIT_USAGE_ERROR));
    }

    #[test]
    fn test_format_asm_error_with_source() {
        let err = CliError::Kiln(
            AsmError::UnknownMnemonic {
                line: 2,
                mnemonic: "frob".into(),
            }
            .into(),
        );
        let source = ".method static void Main.f()\n    frob\n.end\n";
        let out = format_error(&err, Some(source), "f.kasm");
        assert!(out.starts_with("error: line 2: unknown instruction `frob`\n"));
        assert!(out.contains("  --> f.kasm:2\n"));
        assert!(out.contains(" 2 |     frob\n"));
    }

    #[test]
    fn test_format_without_source() {
        let err = CliError::Io {
            path: "missing.kasm".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let out = format_error(&err, None, "missing.kasm");
        assert!(out.starts_with("error: cannot read `missing.kasm`"));
    }

    #[test]
    fn test_exit_code_constants() {
        assert_eq!(EXIT_SUCCESS, 0);
        assert_eq!(EXIT_ERROR, 1);
        assert_eq!(EXIT_USAGE_ERROR, 2);
    }
}
