use std::fmt;

use thiserror::Error;

/// A position in the schema source, 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Loc {
    pub line: u32,
    pub col: u32,
}

impl Loc {
    pub fn new(line: u32, col: u32) -> Self {
        Loc { line, col }
    }

    /// Location of a builtin or synthesized entity.
    pub fn builtin() -> Self {
        Loc { line: 0, col: 0 }
    }

    pub fn is_builtin(&self) -> bool {
        self.line == 0
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// The failure classes the analyzer can report.
#[derive(Debug, Clone, Error)]
pub enum ErrorKind {
    #[error("lexical error: {0}")]
    Lex(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("arity error: {0}")]
    Arity(String),
    #[error("kind error: {0}")]
    Kind(String),
    #[error("polarity error: {0}")]
    Polarity(String),
    #[error("binding error: {0}")]
    Binding(String),
    #[error("dispatch error: {0}")]
    Dispatch(String),
    #[error("size error: {0}")]
    Size(String),
    #[error("overflow: {0}")]
    Overflow(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// A secondary location attached to an error ("defined here" and the like).
#[derive(Debug, Clone)]
pub struct Note {
    pub loc: Loc,
    pub message: String,
}

/// A fatal compilation error with its source position.
///
/// Every analysis pass returns `Result<_, Error>`; the first error aborts
/// the compilation of the current schema.
#[derive(Debug, Clone, Error)]
pub struct Error {
    pub loc: Loc,
    pub kind: ErrorKind,
    pub notes: Vec<Note>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.loc, self.kind)
    }
}

impl Error {
    pub fn new(loc: Loc, kind: ErrorKind) -> Self {
        Error {
            loc,
            kind,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, loc: Loc, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            loc,
            message: message.into(),
        });
        self
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn lex_error(loc: Loc, msg: impl Into<String>) -> Error {
    Error::new(loc, ErrorKind::Lex(msg.into()))
}

pub fn syntax_error(loc: Loc, msg: impl Into<String>) -> Error {
    Error::new(loc, ErrorKind::Syntax(msg.into()))
}

pub fn arity_error(loc: Loc, msg: impl Into<String>) -> Error {
    Error::new(loc, ErrorKind::Arity(msg.into()))
}

pub fn kind_error(loc: Loc, msg: impl Into<String>) -> Error {
    Error::new(loc, ErrorKind::Kind(msg.into()))
}

pub fn polarity_error(loc: Loc, msg: impl Into<String>) -> Error {
    Error::new(loc, ErrorKind::Polarity(msg.into()))
}

pub fn binding_error(loc: Loc, msg: impl Into<String>) -> Error {
    Error::new(loc, ErrorKind::Binding(msg.into()))
}

pub fn overflow_error(loc: Loc, msg: impl Into<String>) -> Error {
    Error::new(loc, ErrorKind::Overflow(msg.into()))
}

pub fn internal_error(loc: Loc, msg: impl Into<String>) -> Error {
    Error::new(loc, ErrorKind::Internal(msg.into()))
}

/// Prints a non-fatal warning in the standard `file:line:col` shape.
pub fn print_warning(file_name: &str, loc: Loc, message: &str) {
    eprintln!("{}:{}: warning: {}", file_name, loc, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_location() {
        let err = Error::new(Loc::new(3, 14), ErrorKind::Syntax("unexpected token".into()));
        assert_eq!(err.to_string(), "3:14: syntax error: unexpected token");
    }

    #[test]
    fn notes_accumulate() {
        let err = syntax_error(Loc::new(1, 1), "redefined")
            .with_note(Loc::new(2, 5), "first defined here");
        assert_eq!(err.notes.len(), 1);
        assert_eq!(err.notes[0].loc, Loc::new(2, 5));
    }
}
