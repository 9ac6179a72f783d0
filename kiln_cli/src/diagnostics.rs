//! Source-mapped diagnostics for assembly and annotation errors.
//!
//! Errors carry a 1-based line; the source map turns that into a snippet:
//!
//! ```text
//! error: line 4: undefined label `loop`
//!   --> sum.kasm:4
//!    |
//!  4 |     goto loop
//!    |
//! ```

// =============================================================================
// Source Map
// =============================================================================

/// Line offset table over one source file.
#[derive(Debug, Clone)]
pub struct SourceMap<'a> {
    /// Byte offsets of each line start (always starts with 0).
    line_starts: Vec<usize>,
    source: &'a str,
    filename: &'a str,
}

impl<'a> SourceMap<'a> {
    pub fn new(source: &'a str, filename: &'a str) -> Self {
        let mut line_starts = vec![0usize];
        for (i, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            line_starts,
            source,
            filename,
        }
    }

    /// Text of a 1-based line without its line terminator.
    pub fn line_text(&self, line: usize) -> Option<&'a str> {
        if line == 0 || line > self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[line - 1];
        let end = self
            .line_starts
            .get(line)
            .copied()
            .unwrap_or(self.source.len());
        let text = &self.source[start..end];
        Some(text.trim_end_matches('\n').trim_end_matches('\r'))
    }

    #[inline]
    pub fn filename(&self) -> &'a str {
        self.filename
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Render `message` with the source line it refers to.
///
/// Without a line, or with one past the end of the file, only the header
/// and location are printed.
pub fn render(map: &SourceMap<'_>, line: Option<u32>, severity: &str, message: &str) -> String {
    let mut out = String::with_capacity(128);
    out.push_str(severity);
    out.push_str(": ");
    out.push_str(message);
    out.push('\n');

    let Some(line) = line else {
        out.push_str(&format!("  --> {}\n", map.filename()));
        return out;
    };
    out.push_str(&format!("  --> {}:{}\n", map.filename(), line));

    if let Some(text) = map.line_text(line as usize) {
        let gutter = line.to_string().len();
        let pad = " ".repeat(gutter);
        out.push_str(&format!(" {pad} |\n"));
        out.push_str(&format!(" {line} | {text}\n"));
        out.push_str(&format!(" {pad} |\n"));
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
