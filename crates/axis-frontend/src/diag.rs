use thiserror::Error;

/// Which stage rejected the program. Printed verbatim in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagKind {
    Lex,
    Indentation,
    Parse,
    Name,
    Type,
    Range,
    Arity,
}

impl std::fmt::Display for DiagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiagKind::Lex => "LexError",
            DiagKind::Indentation => "IndentationError",
            DiagKind::Parse => "ParseError",
            DiagKind::Name => "NameError",
            DiagKind::Type => "TypeError",
            DiagKind::Range => "RangeError",
            DiagKind::Arity => "ArityError",
        };
        f.write_str(s)
    }
}

/// A fatal, position-carrying diagnostic. Compilation stops at the first one.
#[derive(Debug, Clone, Error)]
#[error("{kind} at {line}:{col}: {message}")]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagKind, line: u32, col: u32, message: impl Into<String>) -> Self {
        Self { kind, line, col, message: message.into() }
    }
}
