use std::{fmt, rc::Rc};

use thiserror::Error;

use crate::value::Value;

/// Location of the first character of a token: file name plus 1-based
/// line and column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub file: Rc<str>,
    pub line: usize,
    pub column: usize,
}

impl SourcePos {
    pub fn new(file: Rc<str>, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Classification of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexer,
    Parser,
    Runtime,
    User,
}

impl DiagnosticKind {
    pub fn is_syntax(self) -> bool {
        matches!(self, DiagnosticKind::Lexer | DiagnosticKind::Parser)
    }
}

/// Rich diagnostic information surfaced to end users.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub pos: Option<SourcePos>,
    /// Call-stack entries, innermost first.
    pub trace: Vec<String>,
    /// Value raised by `error expr`.
    pub payload: Option<Value>,
    incomplete: bool,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            pos: None,
            trace: Vec::new(),
            payload: None,
            incomplete: false,
        }
    }

    pub fn runtime(message: impl Into<String>, pos: &SourcePos) -> Self {
        Self::new(DiagnosticKind::Runtime, message).with_pos(pos.clone())
    }

    pub fn user(payload: Value, pos: &SourcePos) -> Self {
        let mut diagnostic =
            Self::new(DiagnosticKind::User, payload.to_text()).with_pos(pos.clone());
        diagnostic.payload = Some(payload);
        diagnostic
    }

    /// Parse failure caused by running out of tokens.
    pub fn unexpected_eof(pos: Option<SourcePos>) -> Self {
        let mut diagnostic = Self::new(DiagnosticKind::Parser, "unexpected end of input");
        diagnostic.pos = pos;
        diagnostic.incomplete = true;
        diagnostic
    }

    pub fn with_pos(mut self, pos: SourcePos) -> Self {
        self.pos = Some(pos);
        self
    }

    /// Marks a failure that more input could still resolve.
    pub fn incomplete(mut self) -> Self {
        self.incomplete = true;
        self
    }

    pub fn with_trace(mut self, entry: impl Into<String>) -> Self {
        self.trace.push(entry.into());
        self
    }

    /// True when more input could complete the parse.
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(pos) = &self.pos {
            write!(f, " ({pos})")?;
        }
        for entry in &self.trace {
            write!(f, "\n  at {entry}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Unified error type for the Checker runtime.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckerError {
    pub fn runtime(message: impl Into<String>, pos: &SourcePos) -> Self {
        Self::Diagnostic(Diagnostic::runtime(message, pos))
    }

    pub fn with_trace(self, entry: impl Into<String>) -> Self {
        match self {
            Self::Diagnostic(diagnostic) => Self::Diagnostic(diagnostic.with_trace(entry)),
            other => other,
        }
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::Diagnostic(diagnostic) => Some(diagnostic),
            Self::Io(_) => None,
        }
    }

    pub fn is_incomplete(&self) -> bool {
        self.diagnostic().is_some_and(Diagnostic::is_incomplete)
    }
}

pub type Result<T> = std::result::Result<T, CheckerError>;
