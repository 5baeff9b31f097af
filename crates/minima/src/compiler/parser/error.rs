// Compile-stage errors: lex, parse and typecheck failures.
// Rendered with file:line:column plus a source-line snippet and caret.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    Lex,
    Parse,
    Type,
}

impl CompileErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            CompileErrorKind::Lex => "LexError",
            CompileErrorKind::Parse => "ParseError",
            CompileErrorKind::Type => "TypeError",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>, line: u32, column: u32) -> CompileError {
        CompileError { kind, message: message.into(), line, column }
    }

    /// Full diagnostic with the offending source line and a caret under the
    /// error column. `file` may be empty for anonymous sources.
    pub fn pretty(&self, file: &str, source: &str) -> String {
        let mut out = String::new();
        if file.is_empty() {
            out.push_str(&format!(
                "{}: {} ({}:{})\n",
                self.kind.label(),
                self.message,
                self.line,
                self.column
            ));
        } else {
            out.push_str(&format!(
                "{}: {} ({}:{}:{})\n",
                self.kind.label(),
                self.message,
                file,
                self.line,
                self.column
            ));
        }

        if self.line == 0 {
            return out;
        }

        if let Some(line_text) = source.lines().nth(self.line as usize - 1) {
            out.push_str("  ");
            out.push_str(line_text);
            out.push('\n');
            out.push_str("  ");
            for _ in 1..self.column.max(1) {
                out.push(' ');
            }
            out.push_str("^\n");
        }
        out
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({}:{})", self.kind.label(), self.message, self.line, self.column)
    }
}

impl std::error::Error for CompileError {}
