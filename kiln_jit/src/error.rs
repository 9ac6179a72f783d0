//! Error types for assembling, building and checking.
//!
//! All of these are fatal for the method or file they describe. Passes never
//! fail: a transformation that cannot be proven safe is simply not applied.

use thiserror::Error;

use crate::ir::types::DataType;
use crate::ir::verify::GraphError;

/// Failure to parse assembly text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("line {line}: unknown instruction `{mnemonic}`")]
    UnknownMnemonic { line: u32, mnemonic: String },

    #[error("line {line}: {message}")]
    BadOperand { line: u32, message: String },

    #[error("line {line}: undefined label `{label}`")]
    UnknownLabel { line: u32, label: String },

    #[error("line {line}: duplicate label `{label}`")]
    DuplicateLabel { line: u32, label: String },

    #[error("line {line}: malformed method signature `{text}`")]
    BadSignature { line: u32, text: String },

    #[error("line {line}: method `{method}` has no `.end`")]
    MissingEnd { line: u32, method: String },

    #[error("line {line}: instruction outside of a method")]
    OutsideMethod { line: u32 },
}

impl AsmError {
    /// 1-based source line the error refers to.
    pub fn line(&self) -> u32 {
        match self {
            AsmError::UnknownMnemonic { line, .. }
            | AsmError::BadOperand { line, .. }
            | AsmError::UnknownLabel { line, .. }
            | AsmError::DuplicateLabel { line, .. }
            | AsmError::BadSignature { line, .. }
            | AsmError::MissingEnd { line, .. }
            | AsmError::OutsideMethod { line } => *line,
        }
    }
}

/// Failure to translate a method's bytecode into SSA form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{method}: empty method body")]
    EmptyMethod { method: String },

    #[error("{method}: operand stack underflow at pc {pc}")]
    StackUnderflow { method: String, pc: usize },

    #[error("{method}: stack depth {found} at pc {pc} does not match {expected} on another path")]
    UnbalancedStack {
        method: String,
        pc: usize,
        expected: usize,
        found: usize,
    },

    #[error("{method}: expected {expected} at pc {pc}, found {found}")]
    TypeMismatch {
        method: String,
        pc: usize,
        expected: DataType,
        found: DataType,
    },

    #[error("{method}: local {slot} read before assignment at pc {pc}")]
    UndefinedLocal { method: String, pc: usize, slot: u16 },

    #[error("{method}: local {slot} out of range at pc {pc}")]
    BadLocal { method: String, pc: usize, slot: u16 },

    #[error("{method}: branch target {target} at pc {pc} is outside the method")]
    BadTarget {
        method: String,
        pc: usize,
        target: usize,
    },

    #[error("{method}: execution falls off the end of the code")]
    FallOffEnd { method: String },

    #[error("{method}: return at pc {pc} does not match declared type {expected}")]
    BadReturn {
        method: String,
        pc: usize,
        expected: DataType,
    },
}

/// Malformed checker annotations.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("line {line}: {message}")]
    Syntax { line: u32, message: String },

    #[error("line {line}: invalid pattern `{pattern}`: {source}")]
    Regex {
        line: u32,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("line {line}: variable `{name}` used before definition")]
    UndefinedVariable { line: u32, name: String },

    #[error("line {line}: variable `{name}` defined twice")]
    RedefinedVariable { line: u32, name: String },
}

impl CheckError {
    /// 1-based source line of the offending annotation.
    pub fn line(&self) -> u32 {
        match self {
            CheckError::Syntax { line, .. }
            | CheckError::Regex { line, .. }
            | CheckError::UndefinedVariable { line, .. }
            | CheckError::RedefinedVariable { line, .. } => *line,
        }
    }
}

/// Any error surfaced by the library entry points.
#[derive(Debug, Error)]
pub enum KilnError {
    #[error(transparent)]
    Asm(#[from] AsmError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error("graph invalid after `{pass}`: {source}")]
    Verify {
        pass: &'static str,
        #[source]
        source: GraphError,
    },
}

impl KilnError {
    /// Source line for errors that point into the input file.
    pub fn line(&self) -> Option<u32> {
        match self {
            KilnError::Asm(e) => Some(e.line()),
            KilnError::Check(e) => Some(e.line()),
            KilnError::Build(_) | KilnError::Verify { .. } => None,
        }
    }
}

pub type Result<T, E = KilnError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AsmError::UnknownLabel {
            line: 4,
            label: "loop".into(),
        };
        assert_eq!(err.to_string(), "line 4: undefined label `loop`");
        assert_eq!(err.line(), 4);

        let err = BuildError::TypeMismatch {
            method: "int Main.f()".into(),
            pc: 3,
            expected: DataType::Int32,
            found: DataType::Int64,
        };
        assert_eq!(err.to_string(), "int Main.f(): expected int32 at pc 3, found int64");
    }

    #[test]
    fn test_kiln_error_from() {
        let err: KilnError = AsmError::OutsideMethod { line: 1 }.into();
        assert!(matches!(err, KilnError::Asm(_)));
        assert_eq!(err.line(), Some(1));

        let err: KilnError = CheckError::UndefinedVariable {
            line: 7,
            name: "Len".into(),
        }
        .into();
        assert_eq!(err.line(), Some(7));
    }
}
