//! Interpreter error types.

use crate::expr::ExprError;
use marker_hal::MarkerError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors of G-code execution.
///
/// Only emergency stops abort a running file; everything else is logged
/// and execution continues with the next line.
#[derive(Debug, Error)]
pub enum InterpreterError {
    /// File or macro could not be read.
    #[error("Cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `M24` without a preceding `M23`.
    #[error("No file selected")]
    NoFileSelected,

    /// Command is missing a required parameter.
    #[error("{0} requires a parameter")]
    MissingParameter(String),

    /// Parameter that cannot be interpreted.
    #[error("Invalid parameter '{0}'")]
    InvalidParameter(String),

    /// Bracket expression failed to evaluate.
    #[error("Invalid expression: {0}")]
    Expression(#[from] ExprError),

    /// Macro nesting exceeded the configured limit.
    #[error("Macro nesting deeper than {0} levels")]
    MacroDepth(usize),

    /// Machine rejected the command.
    #[error(transparent)]
    Machine(#[from] MarkerError),
}

impl InterpreterError {
    /// Whether the error stops the machine and aborts file execution.
    pub fn is_emergency(&self) -> bool {
        matches!(self, InterpreterError::Machine(e) if e.is_emergency())
    }
}
