//! Matching check blocks against dumps.
//!
//! The dump body is scanned with a cursor. `CHECK` takes the first matching
//! line at or after the cursor and `CHECK-NEXT` must match the line at the
//! cursor. A run of `CHECK-DAG` lines matches distinct lines in any order.
//! A run of `CHECK-NOT` lines is checked over the lines between the previous
//! positive match and the next one, or the end of the dump.

use std::fmt;

use regex::Regex;
use rustc_hash::FxHashMap;

use super::parser::{Assertion, AssertionKind, CheckBlock, Segment};

/// Variable bindings in definition order.
pub type Bindings = Vec<(String, String)>;

/// A check block that did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    /// Key of the dump, `<method> <pass> (<phase>)`.
    pub key: String,
    /// Source line of the failing assertion, or of `CHECK-START`.
    pub line: u32,
    /// The failing assertion as written.
    pub assertion: String,
    pub message: String,
    /// Variables bound before the failure.
    pub bindings: Bindings,
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n  line {}: {}\n  {}",
            self.key, self.line, self.assertion, self.message
        )?;
        if !self.bindings.is_empty() {
            let vars: Vec<String> =
                self.bindings.iter().map(|(k, v)| format!("{k} = {v}")).collect();
            write!(f, "\n  bound: {}", vars.join(", "))?;
        }
        Ok(())
    }
}

// =============================================================================
// Pattern Compilation
// =============================================================================

#[inline]
fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// An assertion compiled under one set of bindings.
struct Pattern {
    regex: Regex,
    /// Variable defined by capture group `v<index>`.
    names: Vec<String>,
}

/// Regex of an assertion under the current bindings.
///
/// Definitions become capture groups named `v<index>`.
fn compile(assertion: &Assertion, bindings: &FxHashMap<String, String>) -> Option<Pattern> {
    let mut pattern = String::new();
    let mut defined = Vec::new();
    for segment in &assertion.segments {
        match segment {
            Segment::Literal(text) => {
                let mut words = text.split_whitespace().peekable();
                if text.starts_with(char::is_whitespace) {
                    pattern.push_str(r"\s+");
                }
                while let Some(word) = words.next() {
                    pattern.push_str(&regex::escape(word));
                    if words.peek().is_some() {
                        pattern.push_str(r"\s+");
                    }
                }
                if text.ends_with(char::is_whitespace) && !text.trim().is_empty() {
                    pattern.push_str(r"\s+");
                }
            }
            Segment::Regex(re) => {
                pattern.push_str("(?:");
                pattern.push_str(re);
                pattern.push(')');
            }
            Segment::Define { name, regex } => {
                pattern.push_str(&format!("(?P<v{}>", defined.len()));
                pattern.push_str(regex);
                pattern.push(')');
                defined.push(name.clone());
            }
            Segment::Use(name) => {
                pattern.push_str(&regex::escape(bindings.get(name)?));
            }
        }
    }
    Regex::new(&pattern).ok().map(|regex| Pattern {
        regex,
        names: defined,
    })
}

/// First match in `line` that starts and ends on word boundaries.
fn match_line(pattern: &Pattern, line: &str) -> Option<Bindings> {
    let mut start = 0;
    while start <= line.len() {
        let caps = pattern.regex.captures_at(line, start)?;
        let whole = caps.get(0)?;
        let text = whole.as_str();
        let before = line[..whole.start()].chars().next_back();
        let after = line[whole.end()..].chars().next();
        let left_ok =
            !(text.chars().next().is_some_and(is_word) && before.is_some_and(is_word));
        let right_ok =
            !(text.chars().next_back().is_some_and(is_word) && after.is_some_and(is_word));
        if left_ok && right_ok {
            let captured = pattern
                .names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    caps.name(&format!("v{i}"))
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect();
            return Some(captured);
        }
        start = whole.start() + line[whole.start()..].chars().next().map_or(1, char::len_utf8);
    }
    None
}

// =============================================================================
// Matcher
// =============================================================================

struct Matcher<'a> {
    key: String,
    lines: Vec<&'a str>,
    cursor: usize,
    bindings: FxHashMap<String, String>,
    order: Bindings,
}

impl<'a> Matcher<'a> {
    fn failure(&self, assertion: &Assertion, message: impl Into<String>) -> CheckFailure {
        CheckFailure {
            key: self.key.clone(),
            line: assertion.line,
            assertion: assertion.to_string(),
            message: message.into(),
            bindings: self.order.clone(),
        }
    }

    /// Compile `assertion` once for a scan; bindings cannot change until it
    /// matches.
    fn pattern(&self, assertion: &Assertion) -> Result<Pattern, CheckFailure> {
        compile(assertion, &self.bindings).ok_or_else(|| {
            self.failure(assertion, "pattern does not compile with the bound variables")
        })
    }

    fn bind(&mut self, captured: Bindings) {
        for (name, value) in captured {
            self.bindings.insert(name.clone(), value.clone());
            self.order.push((name, value));
        }
    }

    /// First line in `from..to` matching `assertion`.
    fn find(
        &self,
        assertion: &Assertion,
        from: usize,
        to: usize,
    ) -> Result<Option<(usize, Bindings)>, CheckFailure> {
        let pattern = self.pattern(assertion)?;
        Ok((from..to).find_map(|index| {
            match_line(&pattern, self.lines[index]).map(|captured| (index, captured))
        }))
    }

    /// `CHECK-NOT` group over `from..to`.
    fn check_absent(
        &self,
        group: &[&Assertion],
        from: usize,
        to: usize,
    ) -> Result<(), CheckFailure> {
        for assertion in group {
            if let Some((index, _)) = self.find(assertion, from, to)? {
                let line = self.lines[index].trim();
                return Err(self.failure(
                    assertion,
                    format!("unexpected match at dump line {}: {line}", index + 1),
                ));
            }
        }
        Ok(())
    }

    /// A `CHECK-DAG` group; returns the lowest and highest matched lines.
    fn match_dag(&mut self, group: &[&Assertion]) -> Result<(usize, usize), CheckFailure> {
        let mut taken: Vec<usize> = Vec::new();
        for assertion in group {
            let pattern = self.pattern(assertion)?;
            let found = (self.cursor..self.lines.len())
                .filter(|index| !taken.contains(index))
                .find_map(|index| {
                    match_line(&pattern, self.lines[index]).map(|captured| (index, captured))
                });
            let (index, captured) =
                found.ok_or_else(|| self.failure(assertion, "no matching line in any order"))?;
            taken.push(index);
            self.bind(captured);
        }
        let low = taken.iter().copied().min().unwrap_or(self.cursor);
        let high = taken.iter().copied().max().unwrap_or(self.cursor);
        Ok((low, high))
    }

    fn run(&mut self, assertions: &[Assertion]) -> Result<(), CheckFailure> {
        let mut pending_not: Vec<&Assertion> = Vec::new();
        let mut i = 0;
        while i < assertions.len() {
            let assertion = &assertions[i];
            match assertion.kind {
                AssertionKind::Not => {
                    pending_not.push(assertion);
                    i += 1;
                }
                AssertionKind::InOrder => {
                    let found = self.find(assertion, self.cursor, self.lines.len())?;
                    let Some((index, captured)) = found else {
                        return Err(self.failure(assertion, "no matching line"));
                    };
                    self.check_absent(&pending_not, self.cursor, index)?;
                    pending_not.clear();
                    self.bind(captured);
                    self.cursor = index + 1;
                    i += 1;
                }
                AssertionKind::NextLine => {
                    if self.cursor >= self.lines.len() {
                        return Err(self.failure(assertion, "no line after the previous match"));
                    }
                    let line = self.lines[self.cursor];
                    let Some(captured) = match_line(&self.pattern(assertion)?, line) else {
                        return Err(self.failure(
                            assertion,
                            format!("next line does not match: {}", line.trim()),
                        ));
                    };
                    self.bind(captured);
                    self.cursor += 1;
                    i += 1;
                }
                AssertionKind::Dag => {
                    let end = assertions[i..]
                        .iter()
                        .position(|a| a.kind != AssertionKind::Dag)
                        .map_or(assertions.len(), |p| i + p);
                    let group: Vec<&Assertion> = assertions[i..end].iter().collect();
                    let (low, high) = self.match_dag(&group)?;
                    self.check_absent(&pending_not, self.cursor, low)?;
                    pending_not.clear();
                    self.cursor = high + 1;
                    i = end;
                }
            }
        }
        self.check_absent(&pending_not, self.cursor, self.lines.len())
    }
}

/// Match one block against the dump recorded under its key.
///
/// `dump` may include its `==` header line; it is skipped.
pub fn match_block(block: &CheckBlock, dump: &str) -> Result<(), CheckFailure> {
    let lines: Vec<&str> = dump.lines().filter(|l| !l.starts_with("== ")).collect();
    let mut matcher = Matcher {
        key: block.dump_key(),
        lines,
        cursor: 0,
        bindings: FxHashMap::default(),
        order: Vec::new(),
    };
    matcher.run(&block.assertions)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::parser::parse_annotations;

    const DUMP: &str = "== int Main.f(int[]) BCE (after)
B0 pred:[] succ:[B1] dom:none
  2 l0 ParameterValue loop:none
  1 i1 IntConstant 0 loop:none
B1 pred:[B0] succ:[] dom:B0
  1 l2 NullCheck [l0] loop:none
  2 i3 ArrayLength [l2] loop:none
  1 i4 Add [i3,i1] loop:none
  0 v5 Return [i4] loop:none
";

    fn block(annotations: &str) -> CheckBlock {
        let src = format!("/// CHECK-START: int Main.f(int[]) BCE (after)\n{annotations}");
        parse_annotations(&src).expect("parses").remove(0)
    }

    fn check(annotations: &str) -> Result<(), CheckFailure> {
        match_block(&block(annotations), DUMP)
    }

    #[test]
    fn test_in_order_and_variables() {
        check(
            "/// CHECK: <<Len:i\\d+>> ArrayLength
/// CHECK: Add [<<Len>>,{{i\\d+}}]
/// CHECK: Return",
        )
        .expect("holds");

        let failure = check("/// CHECK: Add\n/// CHECK: ArrayLength").unwrap_err();
        assert_eq!(failure.line, 3);
        assert!(failure.assertion.starts_with("CHECK: ArrayLength"));
    }

    #[test]
    fn test_whitespace_is_flexible() {
        check("/// CHECK: ArrayLength    [l2]").expect("holds");
    }

    #[test]
    fn test_word_boundaries() {
        assert!(check("/// CHECK: Length").is_err());
        assert!(check("/// CHECK: i").is_err());
        check("/// CHECK: i3").expect("holds");
    }

    #[test]
    fn test_next_line() {
        check("/// CHECK: NullCheck\n/// CHECK-NEXT: ArrayLength").expect("holds");
        let failure = check("/// CHECK: NullCheck\n/// CHECK-NEXT: Add").unwrap_err();
        assert!(failure.message.contains("next line"));
    }

    #[test]
    fn test_dag_any_order() {
        check(
            "/// CHECK-DAG: Add
/// CHECK-DAG: NullCheck
/// CHECK: Return",
        )
        .expect("holds");
        // Two DAG lines cannot share one dump line.
        assert!(check("/// CHECK-DAG: Add\n/// CHECK-DAG: Add").is_err());
    }

    #[test]
    fn test_not_is_scoped() {
        check("/// CHECK: ArrayLength\n/// CHECK-NOT: NullCheck\n/// CHECK: Return")
            .expect("holds");
        let failure =
            check("/// CHECK: NullCheck\n/// CHECK-NOT: Add\n/// CHECK: Return").unwrap_err();
        assert_eq!(failure.line, 3);
        assert!(failure.message.contains("Add"));
        assert!(check("/// CHECK-NOT: BoundsCheck").is_ok());
        assert!(check("/// CHECK: ArrayLength\n/// CHECK-NOT: Return").is_err());
    }

    #[test]
    fn test_failure_reports_bindings() {
        let failure =
            check("/// CHECK: <<Len:i\\d+>> ArrayLength\n/// CHECK: Sub [<<Len>>]").unwrap_err();
        assert_eq!(failure.bindings, vec![("Len".to_string(), "i3".to_string())]);
        let text = failure.to_string();
        assert!(text.starts_with("int Main.f(int[]) BCE (after)"));
        assert!(text.contains("bound: Len = i3"));
    }

    #[test]
    fn test_pattern_compiled_before_scanning() {
        // Nothing is left to scan after `Return`, yet the unbound use fails.
        let mut block = block("/// CHECK: Return");
        block.assertions.push(Assertion {
            kind: AssertionKind::Not,
            line: 3,
            text: "<<Missing>>".into(),
            segments: vec![Segment::Use("Missing".into())],
        });
        let failure = match_block(&block, DUMP).unwrap_err();
        assert_eq!(failure.line, 3);
        assert!(failure.message.contains("does not compile"));
    }
}
