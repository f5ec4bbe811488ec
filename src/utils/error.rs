//! Error handling for the Spezi compiler
//!
//! Only failures that stop the pipeline on the spot live here: syntax
//! errors, module loading problems, and internal codegen failures.
//! Semantic errors are accumulated as [`Diagnostic`](super::diagnostic::Diagnostic)s.

use crate::utils::Span;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Compiler error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ==================== Lexer / Parser Errors ====================

    #[error("Unexpected character: '{ch}'")]
    UnexpectedChar { ch: char, span: Span },

    #[error("Unterminated string literal")]
    UnterminatedString { span: Span },

    #[error("Invalid number literal: {text}")]
    InvalidNumber { text: String, span: Span },

    #[error("Unexpected token: expected {expected}, got {got}")]
    UnexpectedToken {
        expected: String,
        got: String,
        span: Span,
    },

    #[error("{0}")]
    Expected(String, Span),

    // ==================== Module Errors ====================

    #[error("Could not resolve module '{name}'")]
    ModuleNotFound { name: String, span: Span },

    #[error("IO error: {0}")]
    Io(String),

    // ==================== Internal Codegen Errors ====================

    #[error("Unknown struct layout: {0}")]
    UnknownStruct(String),

    #[error("Function '{0}' not found")]
    FunctionNotFound(String),

    #[error("Undefined variable in codegen: {0}")]
    UnboundVariable(String),

    #[error("Unsupported in codegen: {0}")]
    Unsupported(String),

    #[error("IR verification failed: {0}")]
    Verification(String),

    #[error("Code generation error: {0}")]
    CodeGen(String),
}

impl Error {
    /// Get the span associated with this error
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::UnexpectedChar { span, .. } => Some(*span),
            Self::UnterminatedString { span } => Some(*span),
            Self::InvalidNumber { span, .. } => Some(*span),
            Self::UnexpectedToken { span, .. } => Some(*span),
            Self::Expected(_, span) => Some(*span),
            Self::ModuleNotFound { span, .. } => Some(*span),
            Self::Io(_)
            | Self::UnknownStruct(_)
            | Self::FunctionNotFound(_)
            | Self::UnboundVariable(_)
            | Self::Unsupported(_)
            | Self::Verification(_)
            | Self::CodeGen(_) => None,
        }
    }

    /// Internal errors signal a lowering bug rather than a user mistake
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::UnknownStruct(_)
                | Self::FunctionNotFound(_)
                | Self::UnboundVariable(_)
                | Self::Unsupported(_)
                | Self::Verification(_)
                | Self::CodeGen(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
