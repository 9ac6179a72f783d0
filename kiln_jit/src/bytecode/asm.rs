//! Textual assembler for the stack bytecode.
//!
//! ```text
//! .class Main
//!
//! .method static int sum(int[])
//!     iconst 0
//!     istore 1
//!     iconst 0
//!     istore 2
//! loop:
//!     iload 2
//!     aload 0
//!     arraylength
//!     if_icmpge done
//!     ...
//!     goto loop
//! done:
//!     iload 1
//!     ireturn
//! .end
//! ```
//!
//! One instruction per line. Labels end with `:` and may share a line with an
//! instruction. `;` and `//` start comments; `///` lines carry checker
//! annotations and are skipped here.

use rustc_hash::FxHashMap;

use super::{Constant, Insn, JavaType, Method, Signature};
use crate::error::AsmError;
use crate::ir::operators::{BinaryOp, ComparisonBias, CondKind};
use crate::ir::types::DataType;

/// Methods of one assembly file, in source order.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub methods: Vec<Method>,
}

impl Program {
    /// Find a method by its printed signature.
    pub fn method(&self, signature: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.signature.to_string() == signature)
    }
}

/// Parse a whole assembly file.
pub fn parse_program(source: &str) -> Result<Program, AsmError> {
    let mut program = Program::default();
    let mut class: Option<String> = None;
    let mut current: Option<MethodAsm> = None;

    for (index, raw) in source.lines().enumerate() {
        let line = index as u32 + 1;
        let text = strip_comment(raw);
        if text.is_empty() {
            continue;
        }

        if let Some(rest) = text.strip_prefix(".class") {
            let name = rest.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(AsmError::BadOperand {
                    line,
                    message: format!("bad class name `{}`", name),
                });
            }
            class = Some(name.to_string());
            continue;
        }

        if let Some(rest) = text.strip_prefix(".method") {
            if let Some(open) = current.take() {
                return Err(AsmError::MissingEnd {
                    line: open.start_line,
                    method: open.signature.to_string(),
                });
            }
            let rest = rest.trim();
            let rest = rest.strip_prefix("static ").unwrap_or(rest);
            let signature = Signature::parse(rest, class.as_deref()).ok_or_else(|| {
                AsmError::BadSignature {
                    line,
                    text: rest.to_string(),
                }
            })?;
            current = Some(MethodAsm::new(signature, line));
            continue;
        }

        if text == ".end" {
            let method = current.take().ok_or(AsmError::OutsideMethod { line })?;
            program.methods.push(method.finish()?);
            continue;
        }

        let method = current.as_mut().ok_or(AsmError::OutsideMethod { line })?;
        method.line(text, line)?;
    }

    if let Some(open) = current {
        return Err(AsmError::MissingEnd {
            line: open.start_line,
            method: open.signature.to_string(),
        });
    }
    Ok(program)
}

fn strip_comment(raw: &str) -> &str {
    let mut end = raw.len();
    if let Some(pos) = raw.find("//") {
        end = end.min(pos);
    }
    if let Some(pos) = raw.find(';') {
        end = end.min(pos);
    }
    raw[..end].trim()
}

// =============================================================================
// Method Assembly
// =============================================================================

/// A branch whose label is resolved at `.end`.
struct Fixup {
    pc: usize,
    label: String,
    line: u32,
}

struct MethodAsm {
    signature: Signature,
    start_line: u32,
    code: Vec<Insn>,
    lines: Vec<u32>,
    labels: FxHashMap<String, usize>,
    fixups: Vec<Fixup>,
}

impl MethodAsm {
    fn new(signature: Signature, start_line: u32) -> Self {
        Self {
            signature,
            start_line,
            code: Vec::new(),
            lines: Vec::new(),
            labels: FxHashMap::default(),
            fixups: Vec::new(),
        }
    }

    fn line(&mut self, mut text: &str, line: u32) -> Result<(), AsmError> {
        while let Some((label, rest)) = split_label(text) {
            if self.labels.insert(label.to_string(), self.code.len()).is_some() {
                return Err(AsmError::DuplicateLabel {
                    line,
                    label: label.to_string(),
                });
            }
            text = rest;
        }
        if text.is_empty() {
            return Ok(());
        }

        let (mnemonic, operands) = match text.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (text, ""),
        };
        let insn = self.instruction(mnemonic, operands, line)?;
        self.code.push(insn);
        self.lines.push(line);
        Ok(())
    }

    fn finish(mut self) -> Result<Method, AsmError> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = *self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| AsmError::UnknownLabel {
                    line: fixup.line,
                    label: fixup.label.clone(),
                })?;
            set_target(&mut self.code[fixup.pc], target);
        }
        let mut method = Method::new(self.signature, self.code);
        method.lines = self.lines;
        Ok(method)
    }

    fn branch(&mut self, operands: &str, line: u32) -> Result<usize, AsmError> {
        let label = single_operand(operands, line)?;
        self.fixups.push(Fixup {
            pc: self.code.len(),
            label: label.to_string(),
            line,
        });
        Ok(usize::MAX)
    }

    fn instruction(&mut self, mnemonic: &str, ops: &str, line: u32) -> Result<Insn, AsmError> {
        use DataType::*;

        if let Some(insn) = simple_instruction(mnemonic) {
            if !ops.is_empty() {
                return Err(bad(line, format!("`{}` takes no operands", mnemonic)));
            }
            return Ok(insn);
        }

        let insn = match mnemonic {
            "iconst" => Insn::Const(Constant::Int(parse_int(ops, line)? as i32)),
            "lconst" => Insn::Const(Constant::Long(parse_int(ops, line)?)),
            "fconst" => Insn::Const(Constant::Float(parse_float(ops, line)? as f32)),
            "dconst" => Insn::Const(Constant::Double(parse_float(ops, line)?)),

            "iload" => Insn::Load(Int32, parse_slot(ops, line)?),
            "lload" => Insn::Load(Int64, parse_slot(ops, line)?),
            "fload" => Insn::Load(Float32, parse_slot(ops, line)?),
            "dload" => Insn::Load(Float64, parse_slot(ops, line)?),
            "aload" => Insn::Load(Reference, parse_slot(ops, line)?),
            "istore" => Insn::Store(Int32, parse_slot(ops, line)?),
            "lstore" => Insn::Store(Int64, parse_slot(ops, line)?),
            "fstore" => Insn::Store(Float32, parse_slot(ops, line)?),
            "dstore" => Insn::Store(Float64, parse_slot(ops, line)?),
            "astore" => Insn::Store(Reference, parse_slot(ops, line)?),

            "iinc" => {
                let mut parts = ops.split_whitespace();
                let slot = parts.next().unwrap_or("");
                let delta = parts.next().unwrap_or("");
                if parts.next().is_some() {
                    return Err(bad(line, "`iinc` takes a slot and a delta".to_string()));
                }
                Insn::Iinc(parse_slot(slot, line)?, parse_int(delta, line)? as i32)
            }

            "ifeq" | "ifne" | "iflt" | "ifge" | "ifgt" | "ifle" => {
                let cond = cond_suffix(&mnemonic[2..]).ok_or_else(|| unknown(mnemonic, line))?;
                Insn::If(cond, self.branch(ops, line)?)
            }
            m if m.starts_with("if_icmp") => {
                let cond = cond_suffix(&m[7..]).ok_or_else(|| unknown(m, line))?;
                Insn::IfCmp(cond, self.branch(ops, line)?)
            }
            "if_acmpeq" => Insn::IfACmp(CondKind::Equal, self.branch(ops, line)?),
            "if_acmpne" => Insn::IfACmp(CondKind::NotEqual, self.branch(ops, line)?),
            "ifnull" => Insn::IfNull(true, self.branch(ops, line)?),
            "ifnonnull" => Insn::IfNull(false, self.branch(ops, line)?),
            "goto" => Insn::Goto(self.branch(ops, line)?),

            "newarray" => {
                let elem = JavaType::parse(single_operand(ops, line)?)
                    .filter(|t| *t != JavaType::Void)
                    .ok_or_else(|| bad(line, format!("bad element type `{}`", ops)))?;
                Insn::NewArray(elem.data_type())
            }

            "invokestatic" => {
                let sig = Signature::parse(ops, None).ok_or_else(|| AsmError::BadSignature {
                    line,
                    text: ops.to_string(),
                })?;
                Insn::InvokeStatic(sig)
            }

            _ => return Err(unknown(mnemonic, line)),
        };
        Ok(insn)
    }
}

/// Instructions without operands.
fn simple_instruction(mnemonic: &str) -> Option<Insn> {
    use DataType::*;

    let binary = |prefix: char| match prefix {
        'i' => Some(Int32),
        'l' => Some(Int64),
        'f' => Some(Float32),
        'd' => Some(Float64),
        _ => None,
    };

    let insn = match mnemonic {
        "nop" => Insn::Nop,
        "aconst_null" => Insn::Const(Constant::Null),
        "dup" => Insn::Dup,
        "pop" => Insn::Pop,
        "swap" => Insn::Swap,
        "arraylength" => Insn::ArrayLength,
        "return" => Insn::Return(None),
        "lcmp" => Insn::Compare(Int64, ComparisonBias::NoBias),
        "fcmpl" => Insn::Compare(Float32, ComparisonBias::LtBias),
        "fcmpg" => Insn::Compare(Float32, ComparisonBias::GtBias),
        "dcmpl" => Insn::Compare(Float64, ComparisonBias::LtBias),
        "dcmpg" => Insn::Compare(Float64, ComparisonBias::GtBias),

        "i2l" => Insn::Convert(Int32, Int64),
        "i2f" => Insn::Convert(Int32, Float32),
        "i2d" => Insn::Convert(Int32, Float64),
        "i2b" => Insn::Convert(Int32, Int8),
        "i2c" => Insn::Convert(Int32, Uint16),
        "i2s" => Insn::Convert(Int32, Int16),
        "l2i" => Insn::Convert(Int64, Int32),
        "l2f" => Insn::Convert(Int64, Float32),
        "l2d" => Insn::Convert(Int64, Float64),
        "f2i" => Insn::Convert(Float32, Int32),
        "f2l" => Insn::Convert(Float32, Int64),
        "f2d" => Insn::Convert(Float32, Float64),
        "d2i" => Insn::Convert(Float64, Int32),
        "d2l" => Insn::Convert(Float64, Int64),
        "d2f" => Insn::Convert(Float64, Float32),

        "iaload" => Insn::ArrayLoad(Int32),
        "laload" => Insn::ArrayLoad(Int64),
        "faload" => Insn::ArrayLoad(Float32),
        "daload" => Insn::ArrayLoad(Float64),
        "aaload" => Insn::ArrayLoad(Reference),
        "baload" => Insn::ArrayLoad(Int8),
        "caload" => Insn::ArrayLoad(Uint16),
        "saload" => Insn::ArrayLoad(Int16),
        "iastore" => Insn::ArrayStore(Int32),
        "lastore" => Insn::ArrayStore(Int64),
        "fastore" => Insn::ArrayStore(Float32),
        "dastore" => Insn::ArrayStore(Float64),
        "aastore" => Insn::ArrayStore(Reference),
        "bastore" => Insn::ArrayStore(Int8),
        "castore" => Insn::ArrayStore(Uint16),
        "sastore" => Insn::ArrayStore(Int16),

        "ireturn" => Insn::Return(Some(Int32)),
        "lreturn" => Insn::Return(Some(Int64)),
        "freturn" => Insn::Return(Some(Float32)),
        "dreturn" => Insn::Return(Some(Float64)),
        "areturn" => Insn::Return(Some(Reference)),

        m if m.len() >= 3 => {
            let mut chars = m.chars();
            let ty = chars.next().and_then(binary)?;
            let rest = chars.as_str();
            if rest == "neg" {
                Insn::Neg(ty)
            } else {
                let op = binary_op(rest)?;
                let arithmetic = matches!(
                    op,
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
                );
                if ty.is_floating_point() && !arithmetic {
                    return None;
                }
                Insn::Binary(ty, op)
            }
        }
        _ => return None,
    };
    Some(insn)
}

fn binary_op(name: &str) -> Option<BinaryOp> {
    Some(match name {
        "add" => BinaryOp::Add,
        "sub" => BinaryOp::Sub,
        "mul" => BinaryOp::Mul,
        "div" => BinaryOp::Div,
        "rem" => BinaryOp::Rem,
        "shl" => BinaryOp::Shl,
        "shr" => BinaryOp::Shr,
        "ushr" => BinaryOp::UShr,
        "and" => BinaryOp::And,
        "or" => BinaryOp::Or,
        "xor" => BinaryOp::Xor,
        _ => return None,
    })
}

fn cond_suffix(suffix: &str) -> Option<CondKind> {
    Some(match suffix {
        "eq" => CondKind::Equal,
        "ne" => CondKind::NotEqual,
        "lt" => CondKind::LessThan,
        "ge" => CondKind::GreaterThanOrEqual,
        "gt" => CondKind::GreaterThan,
        "le" => CondKind::LessThanOrEqual,
        _ => return None,
    })
}

fn set_target(insn: &mut Insn, target: usize) {
    match insn {
        Insn::If(_, t)
        | Insn::IfCmp(_, t)
        | Insn::IfACmp(_, t)
        | Insn::IfNull(_, t)
        | Insn::Goto(t) => *t = target,
        _ => {}
    }
}

/// `name: rest` with an identifier label.
fn split_label(text: &str) -> Option<(&str, &str)> {
    let (label, rest) = text.split_once(':')?;
    let label = label.trim();
    let valid = !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
        && !label.starts_with('.');
    valid.then(|| (label, rest.trim()))
}

// =============================================================================
// Operands
// =============================================================================

fn bad(line: u32, message: String) -> AsmError {
    AsmError::BadOperand { line, message }
}

fn unknown(mnemonic: &str, line: u32) -> AsmError {
    AsmError::UnknownMnemonic {
        line,
        mnemonic: mnemonic.to_string(),
    }
}

fn single_operand(ops: &str, line: u32) -> Result<&str, AsmError> {
    let mut parts = ops.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(op), None) => Ok(op),
        _ => Err(bad(line, format!("expected one operand, found `{}`", ops))),
    }
}

fn parse_int(text: &str, line: u32) -> Result<i64, AsmError> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else {
        digits.parse::<u64>().ok()
    };
    let magnitude = magnitude.ok_or_else(|| bad(line, format!("bad integer `{}`", text)))?;
    // Wraps to 64 bits, so hex literals can spell any bit pattern.
    let value = magnitude as i64;
    if negative {
        Ok(value.wrapping_neg())
    } else {
        Ok(value)
    }
}

fn parse_float(text: &str, line: u32) -> Result<f64, AsmError> {
    match text.trim() {
        "NaN" | "nan" => Ok(f64::NAN),
        "inf" | "Infinity" => Ok(f64::INFINITY),
        "-inf" | "-Infinity" => Ok(f64::NEG_INFINITY),
        other => other
            .parse::<f64>()
            .map_err(|_| bad(line, format!("bad floating-point literal `{}`", other))),
    }
}

fn parse_slot(text: &str, line: u32) -> Result<u16, AsmError> {
    text.trim()
        .parse::<u16>()
        .map_err(|_| bad(line, format!("bad local slot `{}`", text.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUM: &str = "
.class Main
/// CHECK-START: int Main.sum(int[]) BCE (after)
.method static int sum(int[])
    iconst 0
    istore 1
    iconst 0
    istore 2
loop: iload 2        ; header
    aload 0
    arraylength
    if_icmpge done
    iload 1
    aload 0
    iload 2
    iaload
    iadd
    istore 1
    iinc 2 1
    goto loop
done:
    iload 1
    ireturn
.end
";

    #[test]
    fn test_parse_loop_method() {
        let program = parse_program(SUM).expect("valid program");
        let method = program.method("int Main.sum(int[])").expect("method");
        assert_eq!(method.code.len(), 18);
        assert_eq!(method.code[7], Insn::IfCmp(CondKind::GreaterThanOrEqual, 16));
        assert_eq!(method.code[15], Insn::Goto(4));
        assert_eq!(method.code[14], Insn::Iinc(2, 1));
        assert_eq!(method.num_locals, 3);
        assert_eq!(method.line_of(4), 9);
    }

    #[test]
    fn test_typed_mnemonics() {
        assert_eq!(
            simple_instruction("lushr"),
            Some(Insn::Binary(DataType::Int64, BinaryOp::UShr))
        );
        assert_eq!(
            simple_instruction("drem"),
            Some(Insn::Binary(DataType::Float64, BinaryOp::Rem))
        );
        assert_eq!(simple_instruction("fshl"), None);
        assert_eq!(simple_instruction("i2b"), Some(Insn::Convert(DataType::Int32, DataType::Int8)));
        assert_eq!(simple_instruction("fneg"), Some(Insn::Neg(DataType::Float32)));
    }

    #[test]
    fn test_constants() {
        let src = ".method static long Main.k()\n lconst -0x8000000000000000\n lreturn\n.end\n";
        let program = parse_program(src).expect("valid program");
        assert_eq!(program.methods[0].code[0], Insn::Const(Constant::Long(i64::MIN)));

        let src = ".method static float Main.k()\n fconst NaN\n freturn\n.end\n";
        let program = parse_program(src).expect("valid program");
        assert!(matches!(
            program.methods[0].code[0],
            Insn::Const(Constant::Float(f)) if f.is_nan()
        ));
    }

    #[test]
    fn test_error_lines() {
        let err = parse_program(".method static void Main.f()\n  frob\n.end\n").unwrap_err();
        assert_eq!(err, AsmError::UnknownMnemonic { line: 2, mnemonic: "frob".into() });

        let err = parse_program(".method static void Main.f()\n goto nowhere\n.end\n").unwrap_err();
        assert_eq!(err.line(), 2);
        assert!(matches!(err, AsmError::UnknownLabel { .. }));

        let err = parse_program(".method static void Main.f()\n return\n").unwrap_err();
        assert!(matches!(err, AsmError::MissingEnd { line: 1, .. }));

        let err = parse_program(".method static void f()\n.end\n").unwrap_err();
        assert!(matches!(err, AsmError::BadSignature { line: 1, .. }));

        let err = parse_program(".method static void Main.f()\nx:\nx: return\n.end\n").unwrap_err();
        assert!(matches!(err, AsmError::DuplicateLabel { line: 3, .. }));
    }

    #[test]
    fn test_invokestatic_signature() {
        let src = ".method static int Main.r(int, int)
    iload 0
    iload 1
    invokestatic int Integer.rotateRight(int, int)
    ireturn
.end
";
        let program = parse_program(src).expect("valid program");
        match &program.methods[0].code[2] {
            Insn::InvokeStatic(sig) => {
                assert_eq!(sig.to_string(), "int Integer.rotateRight(int, int)")
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
