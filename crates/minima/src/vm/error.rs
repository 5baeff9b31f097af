// Runtime diagnostics.
// Recoverable errors print a kind-tagged message decorated with
// file:line:col and a call-stack snapshot, then the failing operation
// produces void. Fatal errors terminate the process.

use std::fmt;

/// Runtime error taxonomy. Lex/Parse/Type compile errors live in
/// `compiler::parser::error`; these are the execution-stage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Type,
    Arity,
    Name,
    Index,
    DivideByZero,
    Load,
    Link,
    Fatal,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Type => "TypeError",
            ErrorKind::Arity => "ArityError",
            ErrorKind::Name => "NameError",
            ErrorKind::Index => "IndexError",
            ErrorKind::DivideByZero => "DivideByZero",
            ErrorKind::Load => "LoadError",
            ErrorKind::Link => "LinkError",
            ErrorKind::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Print the offending source line with a caret. Reads the file lazily;
/// silently does nothing when the file is gone.
pub fn print_source_context(file: &str, line: u32, col: u32) {
    if file.is_empty() || line == 0 {
        return;
    }
    let Ok(src) = std::fs::read_to_string(file) else {
        return;
    };
    let Some(text) = src.lines().nth(line as usize - 1) else {
        return;
    };
    eprintln!("  {text}");
    let mut caret = String::from("  ");
    for _ in 1..col.max(1) {
        caret.push(' ');
    }
    caret.push('^');
    eprintln!("{caret}");
}
