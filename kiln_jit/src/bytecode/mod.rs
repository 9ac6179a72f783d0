//! Stack bytecode consumed by the IR builder.
//!
//! The instruction set is a compact, statically typed stack machine in the
//! style of JVM bytecode: typed constants, local slots, arithmetic, branches
//! and primitive arrays. Methods are static; parameter `i` arrives in local
//! slot `i` regardless of its width.
//!
//! Methods are usually produced by the textual assembler in [`asm`].

pub mod asm;

use std::fmt;

use crate::ir::operators::{BinaryOp, ComparisonBias, CondKind};
use crate::ir::types::DataType;

pub use asm::{parse_program, Program};

// =============================================================================
// Source Types
// =============================================================================

/// Declared type of a parameter, return value or array element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JavaType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
    Array(Box<JavaType>),
}

impl JavaType {
    /// Parse `int`, `long[]`, `byte[][]` and friends.
    pub fn parse(text: &str) -> Option<JavaType> {
        let text = text.trim();
        if let Some(elem) = text.strip_suffix("[]") {
            return JavaType::parse(elem).map(|t| JavaType::Array(Box::new(t)));
        }
        Some(match text {
            "boolean" => JavaType::Boolean,
            "byte" => JavaType::Byte,
            "char" => JavaType::Char,
            "short" => JavaType::Short,
            "int" => JavaType::Int,
            "long" => JavaType::Long,
            "float" => JavaType::Float,
            "double" => JavaType::Double,
            "void" => JavaType::Void,
            _ => return None,
        })
    }

    /// IR type of values of this declared type.
    pub fn data_type(&self) -> DataType {
        match self {
            JavaType::Boolean => DataType::Bool,
            JavaType::Byte => DataType::Int8,
            JavaType::Char => DataType::Uint16,
            JavaType::Short => DataType::Int16,
            JavaType::Int => DataType::Int32,
            JavaType::Long => DataType::Int64,
            JavaType::Float => DataType::Float32,
            JavaType::Double => DataType::Float64,
            JavaType::Void => DataType::Void,
            JavaType::Array(_) => DataType::Reference,
        }
    }
}

impl fmt::Display for JavaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JavaType::Boolean => f.write_str("boolean"),
            JavaType::Byte => f.write_str("byte"),
            JavaType::Char => f.write_str("char"),
            JavaType::Short => f.write_str("short"),
            JavaType::Int => f.write_str("int"),
            JavaType::Long => f.write_str("long"),
            JavaType::Float => f.write_str("float"),
            JavaType::Double => f.write_str("double"),
            JavaType::Void => f.write_str("void"),
            JavaType::Array(elem) => write!(f, "{}[]", elem),
        }
    }
}

/// `<ret> <Class>.<name>(<params>)`, the key under which dumps are filed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub return_type: JavaType,
    pub class: String,
    pub name: String,
    pub params: Vec<JavaType>,
}

impl Signature {
    pub fn new(
        return_type: JavaType,
        class: impl Into<String>,
        name: impl Into<String>,
        params: Vec<JavaType>,
    ) -> Self {
        Self {
            return_type,
            class: class.into(),
            name: name.into(),
            params,
        }
    }

    /// Parse `int Main.foo(int, int[])`; the class may be omitted when a
    /// default is supplied.
    pub fn parse(text: &str, default_class: Option<&str>) -> Option<Signature> {
        let text = text.trim();
        let open = text.find('(')?;
        let close = text.rfind(')')?;
        if close < open || !text[close + 1..].trim().is_empty() {
            return None;
        }
        let head = text[..open].trim();
        let (ret, qualified) = head.rsplit_once(char::is_whitespace)?;
        let return_type = JavaType::parse(ret)?;
        let (class, name) = match qualified.rsplit_once('.') {
            Some((class, name)) => (class.to_string(), name.to_string()),
            None => (default_class?.to_string(), qualified.to_string()),
        };
        if class.is_empty() || name.is_empty() {
            return None;
        }
        let params_text = text[open + 1..close].trim();
        let params = if params_text.is_empty() {
            Vec::new()
        } else {
            params_text
                .split(',')
                .map(JavaType::parse)
                .collect::<Option<Vec<_>>>()?
        };
        Some(Signature {
            return_type,
            class,
            name,
            params,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}(", self.return_type, self.class, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", p)?;
        }
        f.write_str(")")
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// Literal pushed by a constant instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
}

/// Bytecode instruction. Branch targets are instruction indices.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    Nop,
    Const(Constant),
    /// Push local `slot`, which must hold a value of the given stack kind.
    Load(DataType, u16),
    Store(DataType, u16),
    /// Add a constant to an int local.
    Iinc(u16, i32),
    Binary(DataType, BinaryOp),
    Neg(DataType),
    /// Convert the top of stack from one kind to a target type.
    Convert(DataType, DataType),
    /// `lcmp`, `fcmpl/g`, `dcmpl/g`: push -1, 0 or 1.
    Compare(DataType, ComparisonBias),
    /// Compare the int on top of the stack with zero.
    If(CondKind, usize),
    /// Compare the two ints on top of the stack.
    IfCmp(CondKind, usize),
    /// Compare two references for identity.
    IfACmp(CondKind, usize),
    /// Branch if the reference on top of the stack is (not) null.
    IfNull(bool, usize),
    Goto(usize),
    NewArray(DataType),
    ArrayLength,
    ArrayLoad(DataType),
    ArrayStore(DataType),
    InvokeStatic(Signature),
    /// Return the top of stack, or nothing for `None`.
    Return(Option<DataType>),
    Dup,
    Pop,
    Swap,
}

impl Insn {
    /// Branch target, if the instruction can jump.
    pub fn target(&self) -> Option<usize> {
        match *self {
            Insn::If(_, t)
            | Insn::IfCmp(_, t)
            | Insn::IfACmp(_, t)
            | Insn::IfNull(_, t)
            | Insn::Goto(t) => Some(t),
            _ => None,
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn ends_flow(&self) -> bool {
        matches!(self, Insn::Goto(_) | Insn::Return(_))
    }

    #[inline]
    pub fn is_branch(&self) -> bool {
        self.target().is_some()
    }
}

/// A method ready for graph building.
#[derive(Debug, Clone)]
pub struct Method {
    pub signature: Signature,
    pub code: Vec<Insn>,
    /// Source line of each instruction, for diagnostics.
    pub lines: Vec<u32>,
    /// Local slots, at least one per parameter.
    pub num_locals: u16,
}

impl Method {
    /// Create a method, sizing the locals from parameters and slot uses.
    pub fn new(signature: Signature, code: Vec<Insn>) -> Self {
        let lines = vec![0; code.len()];
        let mut method = Method {
            signature,
            code,
            lines,
            num_locals: 0,
        };
        method.num_locals = method.required_locals();
        method
    }

    fn required_locals(&self) -> u16 {
        let used = self
            .code
            .iter()
            .filter_map(|insn| match insn {
                Insn::Load(_, slot) | Insn::Store(_, slot) | Insn::Iinc(slot, _) => Some(*slot + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        used.max(self.signature.params.len() as u16)
    }

    /// Source line of instruction `pc`, 0 when unknown.
    pub fn line_of(&self, pc: usize) -> u32 {
        self.lines.get(pc).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let sig = Signature::parse("int Main.foo(int, int[])", None);
        let sig = sig.map(|s| s.to_string());
        assert_eq!(sig.as_deref(), Some("int Main.foo(int, int[])"));
    }

    #[test]
    fn test_signature_default_class() {
        let sig = Signature::parse("void run()", Some("Main"));
        assert_eq!(sig.map(|s| (s.class, s.params.len())), Some(("Main".into(), 0)));
        assert!(Signature::parse("void run()", None).is_none());
        assert!(Signature::parse("void Main.run(intt)", None).is_none());
    }

    #[test]
    fn test_java_type_nesting() {
        let t = JavaType::parse("byte[][]");
        assert_eq!(t.as_ref().map(|t| t.to_string()).as_deref(), Some("byte[][]"));
        assert_eq!(t.map(|t| t.data_type()), Some(DataType::Reference));
        assert_eq!(JavaType::Char.data_type(), DataType::Uint16);
    }

    #[test]
    fn test_method_locals_cover_params_and_slots() {
        let sig = Signature::new(JavaType::Int, "Main", "f", vec![JavaType::Int]);
        let m = Method::new(
            sig,
            vec![
                Insn::Load(DataType::Int32, 0),
                Insn::Store(DataType::Int32, 3),
                Insn::Load(DataType::Int32, 3),
                Insn::Return(Some(DataType::Int32)),
            ],
        );
        assert_eq!(m.num_locals, 4);
        assert!(m.code[3].ends_flow());
    }
}
