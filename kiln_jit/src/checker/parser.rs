//! Parsing of `///` checker annotations.
//!
//! ```text
//! /// CHECK-START: int Main.sum(int[]) BCE (after)
//! /// CHECK:     <<Len:i\d+>> ArrayLength
//! /// CHECK-NOT:              BoundsCheck
//! /// CHECK:                  Return
//! ```
//!
//! Assertions belong to the closest preceding `CHECK-START`. Patterns are
//! split into segments once here; the matcher turns them into a regex per
//! attempt, since variable references depend on what has been bound.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use rustc_hash::FxHashSet;

use super::dump::{dump_key, DumpPhase};
use crate::bytecode::Signature;
use crate::error::CheckError;
use crate::opt::pipeline::InstructionSet;

/// Directive of one assertion line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionKind {
    /// `CHECK:`, matched in order.
    InOrder,
    /// `CHECK-NEXT:`, the line right after the previous match.
    NextLine,
    /// `CHECK-DAG:`, any order within a run of DAG lines.
    Dag,
    /// `CHECK-NOT:`, absent between the surrounding matches.
    Not,
}

impl AssertionKind {
    pub const fn directive(self) -> &'static str {
        match self {
            AssertionKind::InOrder => "CHECK",
            AssertionKind::NextLine => "CHECK-NEXT",
            AssertionKind::Dag => "CHECK-DAG",
            AssertionKind::Not => "CHECK-NOT",
        }
    }

    fn from_directive(text: &str) -> Option<Self> {
        Some(match text {
            "CHECK" => AssertionKind::InOrder,
            "CHECK-NEXT" => AssertionKind::NextLine,
            "CHECK-DAG" => AssertionKind::Dag,
            "CHECK-NOT" => AssertionKind::Not,
            _ => return None,
        })
    }
}

/// A piece of an assertion pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Plain text; whitespace runs match any whitespace.
    Literal(String),
    /// `{{regex}}`
    Regex(String),
    /// `<<NAME:regex>>`
    Define { name: String, regex: String },
    /// `<<NAME>>`
    Use(String),
}

/// One `CHECK*` line.
#[derive(Debug, Clone)]
pub struct Assertion {
    pub kind: AssertionKind,
    /// 1-based line in the source file.
    pub line: u32,
    /// Pattern text as written.
    pub text: String,
    pub segments: Vec<Segment>,
}

impl Assertion {
    /// Names this assertion defines.
    pub fn definitions(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Define { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.directive(), self.text)
    }
}

/// A `CHECK-START` block and its assertions.
#[derive(Debug, Clone)]
pub struct CheckBlock {
    /// Printed method signature.
    pub method: String,
    pub pass: String,
    pub phase: DumpPhase,
    /// Only checked when compiling for this ISA.
    pub isa: Option<InstructionSet>,
    pub line: u32,
    pub assertions: Vec<Assertion>,
}

impl CheckBlock {
    /// Key of the dump this block is matched against.
    pub fn dump_key(&self) -> String {
        dump_key(&self.method, &self.pass, self.phase)
    }

    /// Whether this block applies to a run for `isa`.
    #[inline]
    pub fn applies_to(&self, isa: InstructionSet) -> bool {
        self.isa.map_or(true, |own| own == isa)
    }
}

// =============================================================================
// Parsing
// =============================================================================

fn syntax(line: u32, message: impl Into<String>) -> CheckError {
    CheckError::Syntax {
        line,
        message: message.into(),
    }
}

/// Collect every check block of a source file.
pub fn parse_annotations(source: &str) -> Result<Vec<CheckBlock>, CheckError> {
    let mut blocks: Vec<CheckBlock> = Vec::new();
    let mut defined: FxHashSet<String> = FxHashSet::default();

    for (index, raw) in source.lines().enumerate() {
        let line = index as u32 + 1;
        let Some(body) = raw.trim_start().strip_prefix("///") else {
            continue;
        };
        let body = body.trim();
        let Some((directive, rest)) = body.split_once(':') else {
            continue;
        };
        let directive = directive.trim();
        if !directive.starts_with("CHECK") {
            continue;
        }

        if let Some(suffix) = directive.strip_prefix("CHECK-START") {
            let isa = match suffix.strip_prefix('-') {
                Some(name) => Some(
                    InstructionSet::from_str(name).map_err(|e| syntax(line, e.to_string()))?,
                ),
                None if suffix.is_empty() => None,
                None => return Err(syntax(line, format!("unknown directive `{directive}`"))),
            };
            blocks.push(parse_start(rest, isa, line)?);
            defined.clear();
            continue;
        }

        let kind = AssertionKind::from_directive(directive)
            .ok_or_else(|| syntax(line, format!("unknown directive `{directive}`")))?;
        let block = blocks
            .last_mut()
            .ok_or_else(|| syntax(line, format!("{directive} outside of a CHECK-START block")))?;

        let text = rest.trim();
        if text.is_empty() {
            return Err(syntax(line, format!("empty {directive} pattern")));
        }
        if kind == AssertionKind::NextLine
            && !matches!(
                block.assertions.last().map(|a| a.kind),
                Some(AssertionKind::InOrder | AssertionKind::NextLine)
            )
        {
            return Err(syntax(line, "CHECK-NEXT must follow CHECK or CHECK-NEXT"));
        }

        let segments = parse_pattern(text, line)?;
        for segment in &segments {
            match segment {
                Segment::Use(name) if !defined.contains(name) => {
                    return Err(CheckError::UndefinedVariable {
                        line,
                        name: name.clone(),
                    });
                }
                Segment::Define { name, .. } => {
                    if kind == AssertionKind::Not {
                        return Err(syntax(line, "CHECK-NOT cannot define variables"));
                    }
                    if !defined.insert(name.clone()) {
                        return Err(CheckError::RedefinedVariable {
                            line,
                            name: name.clone(),
                        });
                    }
                }
                _ => {}
            }
        }

        block.assertions.push(Assertion {
            kind,
            line,
            text: text.to_string(),
            segments,
        });
    }

    Ok(blocks)
}

/// `<ret> <Class>.<name>(<params>) <pass> (<before|after>)`
fn parse_start(
    text: &str,
    isa: Option<InstructionSet>,
    line: u32,
) -> Result<CheckBlock, CheckError> {
    let text = text.trim();
    let bad = || syntax(line, format!("malformed CHECK-START `{text}`"));

    let open = text.rfind('(').ok_or_else(bad)?;
    let phase = text[open..]
        .strip_prefix('(')
        .and_then(|p| p.strip_suffix(')'))
        .and_then(DumpPhase::parse)
        .ok_or_else(bad)?;
    let head = text[..open].trim_end();
    let (method, pass) = head.rsplit_once(char::is_whitespace).ok_or_else(bad)?;
    let signature = Signature::parse(method, None).ok_or_else(bad)?;

    Ok(CheckBlock {
        method: signature.to_string(),
        pass: pass.to_string(),
        phase,
        isa,
        line,
        assertions: Vec::new(),
    })
}

/// Split a pattern into literal, regex and variable segments.
pub fn parse_pattern(text: &str, line: u32) -> Result<Vec<Segment>, CheckError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while !rest.is_empty() {
        let Some((start, open, close)) = next_opener(rest) else {
            literal.push_str(rest);
            break;
        };
        literal.push_str(&rest[..start]);
        let after = &rest[start + open.len()..];
        let end = after
            .find(close)
            .ok_or_else(|| syntax(line, format!("unterminated `{open}` in `{text}`")))?;
        let inner = &after[..end];
        rest = &after[end + close.len()..];

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        if open == "{{" {
            validate_regex(inner, line)?;
            segments.push(Segment::Regex(inner.to_string()));
        } else {
            segments.push(parse_variable(inner, line)?);
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Position of the earliest `{{`, `<<` or `[[` in `text`, with its closer.
fn next_opener(text: &str) -> Option<(usize, &'static str, &'static str)> {
    [("{{", "}}"), ("<<", ">>"), ("[[", "]]")]
        .into_iter()
        .filter_map(|(open, close)| text.find(open).map(|pos| (pos, open, close)))
        .min_by_key(|&(pos, _, _)| pos)
}

fn parse_variable(inner: &str, line: u32) -> Result<Segment, CheckError> {
    let (name, regex) = match inner.split_once(':') {
        Some((name, regex)) => (name, Some(regex)),
        None => (inner, None),
    };
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(syntax(line, format!("bad variable name `{name}`")));
    }
    Ok(match regex {
        Some(regex) => {
            validate_regex(regex, line)?;
            Segment::Define {
                name: name.to_string(),
                regex: regex.to_string(),
            }
        }
        None => Segment::Use(name.to_string()),
    })
}

fn validate_regex(pattern: &str, line: u32) -> Result<(), CheckError> {
    Regex::new(pattern).map(|_| ()).map_err(|source| CheckError::Regex {
        line,
        pattern: pattern.to_string(),
        source,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_blocks() {
        let src = "
/// CHECK-START: int Main.sum(int[]) BCE (before)
/// CHECK: BoundsCheck
.method static int sum(int[])
/// CHECK-START-ARM64: int Main.sum(int[]) instruction_simplifier_arm64 (after)
/// CHECK-DAG: <<A:i\\d+>> Add
/// CHECK-NOT: Shl
";
        let blocks = parse_annotations(src).expect("parses");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].dump_key(), "int Main.sum(int[]) BCE (before)");
        assert_eq!(blocks[0].isa, None);
        assert_eq!(blocks[0].line, 2);
        assert_eq!(blocks[1].isa, Some(InstructionSet::Arm64));
        assert!(!blocks[1].applies_to(InstructionSet::X86_64));
        assert_eq!(blocks[1].assertions.len(), 2);
        assert_eq!(blocks[1].assertions[1].kind, AssertionKind::Not);
        assert_eq!(blocks[1].assertions[1].line, 7);
    }

    #[test]
    fn test_signature_is_normalized() {
        let src = "/// CHECK-START: int Main.f(int,int[]) dead_code_elimination$final (after)\n";
        let blocks = parse_annotations(src).expect("parses");
        assert_eq!(blocks[0].method, "int Main.f(int, int[])");
        assert_eq!(blocks[0].pass, "dead_code_elimination$final");
        assert_eq!(blocks[0].phase, DumpPhase::After);
    }

    #[test]
    fn test_pattern_segments() {
        let segments =
            parse_pattern("<<Len:i\\d+>> ArrayLength [{{l\\d+}}] [[Len]]", 1).expect("parses");
        assert_eq!(
            segments,
            vec![
                Segment::Define {
                    name: "Len".into(),
                    regex: "i\\d+".into()
                },
                Segment::Literal(" ArrayLength [".into()),
                Segment::Regex("l\\d+".into()),
                Segment::Literal("] ".into()),
                Segment::Use("Len".into()),
            ]
        );
    }

    #[test]
    fn test_variable_errors() {
        let err =
            parse_annotations("/// CHECK-START: void Main.f() BCE (after)\n/// CHECK: <<X>>\n")
                .unwrap_err();
        assert!(matches!(err, CheckError::UndefinedVariable { line: 2, .. }));

        let src = "/// CHECK-START: void Main.f() BCE (after)
/// CHECK: <<X:\\w+>>
/// CHECK: <<X:\\w+>>
";
        let err = parse_annotations(src).unwrap_err();
        assert!(matches!(err, CheckError::RedefinedVariable { line: 3, .. }));

        // Variables do not leak into the next block.
        let src = "/// CHECK-START: void Main.f() BCE (after)
/// CHECK: <<X:\\w+>>
/// CHECK-START: void Main.g() BCE (after)
/// CHECK: <<X>>
";
        let err = parse_annotations(src).unwrap_err();
        assert!(matches!(err, CheckError::UndefinedVariable { line: 4, .. }));
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse_annotations("/// CHECK: Add\n").unwrap_err();
        assert!(matches!(err, CheckError::Syntax { line: 1, .. }));

        let err = parse_annotations("/// CHECK-START: void Main.f() BCE (during)\n").unwrap_err();
        assert!(matches!(err, CheckError::Syntax { .. }));

        let err =
            parse_annotations("/// CHECK-START-MIPS: void Main.f() BCE (after)\n").unwrap_err();
        assert!(matches!(err, CheckError::Syntax { .. }));

        let src = "/// CHECK-START: void Main.f() BCE (after)\n/// CHECK-NEXT: Add\n";
        assert!(parse_annotations(src).is_err());

        let src = "/// CHECK-START: void Main.f() BCE (after)\n/// CHECK: {{(}}\n";
        assert!(matches!(parse_annotations(src).unwrap_err(), CheckError::Regex { line: 2, .. }));

        let src = "/// CHECK-START: void Main.f() BCE (after)\n/// CHECK-NOT: <<X:\\d>>\n";
        assert!(parse_annotations(src).is_err());
    }

    #[test]
    fn test_plain_comments_ignored() {
        let src = "/// Sums the array.\n// CHECK: not an annotation\n";
        assert!(parse_annotations(src).expect("parses").is_empty());
    }
}
