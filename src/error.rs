// src/error.rs

use std::fmt;
use std::rc::Rc;

/// A position in a source file. Lines and columns start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: Rc<str>,
    pub line: u32,
    pub col: u32,
}

impl Location {
    pub fn new(file: Rc<str>, line: u32, col: u32) -> Self {
        Location { file, line, col }
    }
}

impl Default for Location {
    fn default() -> Self {
        Location { file: Rc::from("<unknown>"), line: 0, col: 0 }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Lexical,
    Syntax,
    Semantic,
    Runtime,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Lexical => write!(f, "[Lexical Error]"),
            ErrorCategory::Syntax => write!(f, "[Syntax Error]"),
            ErrorCategory::Semantic => write!(f, "[Semantic Error]"),
            ErrorCategory::Runtime => write!(f, "[Runtime Error]"),
        }
    }
}

/// One reported problem, rendered as `file:line:col: [Category Error] message`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{location}: {category} {message}")]
pub struct Diagnostic {
    pub location: Location,
    pub category: ErrorCategory,
    pub message: String,
}

/// Accumulating diagnostics sink shared by the lexer, parser and code generator.
/// Reporting never aborts the caller; it only records.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_error_at(&mut self, location: &Location, category: ErrorCategory, message: impl Into<String>) {
        let diagnostic = Diagnostic { location: location.clone(), category, message: message.into() };
        tracing::debug!(%diagnostic, "diagnostic reported");
        self.items.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

/// Compilation (lexing, parsing or code generation) produced at least one error.
/// The partially compiled function is discarded and never executed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("compilation failed with {} error(s)", .diagnostics.len())]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("Attempted invoking non-callable object.")]
    NotCallable,
    #[error("Attempted array access [expr] was not an array.")]
    NotAnArray,
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Stack underflow.")]
    StackUnderflow,
    #[error("Invalid opcode 0x{0:02x}.")]
    InvalidOpcode(u8),
    #[error("Invalid constant index {0}.")]
    InvalidConstant(usize),
    #[error("Invalid variable slot {0}.")]
    InvalidSlot(usize),
    #[error("Output error: {0}")]
    Io(String),
}

/// A fatal execution failure. The VM has already reset both of its stacks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{diagnostic}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub diagnostic: Diagnostic,
}

/// Externally visible outcome of running a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretStatus {
    Success,
    CompileError,
    RuntimeError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let loc = Location::new(Rc::from("main.lin"), 3, 7);
        let d = Diagnostic {
            location: loc,
            category: ErrorCategory::Semantic,
            message: "Identifier not defined 'x'".to_string(),
        };
        assert_eq!(d.to_string(), "main.lin:3:7: [Semantic Error] Identifier not defined 'x'");
    }

    #[test]
    fn test_diagnostics_accumulate() {
        let mut sink = Diagnostics::new();
        assert!(!sink.has_errors());
        let loc = Location::default();
        sink.report_error_at(&loc, ErrorCategory::Syntax, "first");
        sink.report_error_at(&loc, ErrorCategory::Lexical, "second");
        assert_eq!(sink.len(), 2);
        let messages: Vec<_> = sink.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }
}
