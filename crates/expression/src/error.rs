//! Error types for template resolution and expression evaluation.

use thiserror::Error;

/// Errors raised while scanning a template for placeholders.
///
/// Unresolvable paths are *not* errors; they resolve to an absent value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// `{{ }}` with nothing between the delimiters.
    #[error("TemplateError: empty placeholder at offset {0}")]
    EmptyPath(usize),
}

/// Errors produced by an expression engine.
///
/// The `Display` form always starts with the error-kind name and `": "`,
/// which is the text persisted as an error job's result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The expression text could not be parsed.
    #[error("SyntaxError: {0}")]
    Syntax(String),

    /// An operator or function received a value of the wrong type.
    #[error("TypeError: {0}")]
    Type(String),

    /// An identifier or function name is not defined.
    #[error("ReferenceError: {0}")]
    Reference(String),

    /// A numeric argument is outside the accepted domain.
    #[error("RangeError: {0}")]
    Range(String),

    /// No engine is registered under the requested identifier.
    #[error("EngineError: unknown expression engine '{0}'")]
    UnknownEngine(String),
}

impl EvalError {
    /// Kind name used as the prefix of the textual form.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Syntax(_) => "SyntaxError",
            Self::Type(_) => "TypeError",
            Self::Reference(_) => "ReferenceError",
            Self::Range(_) => "RangeError",
            Self::UnknownEngine(_) => "EngineError",
        }
    }
}
