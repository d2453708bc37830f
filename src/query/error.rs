//! Query error types
//!
//! Errors raised while parsing or executing a command.

use crate::groups::GroupError;
use crate::pattern::PatternError;
use thiserror::Error;

/// Errors that can occur during command parsing and execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Command or set expression is malformed
    #[error("Query error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    /// `limit` must be positive
    #[error("Limit must be a value greater than zero but got {0}")]
    InvalidLimit(usize),

    /// Registry rejected the command
    #[error("{0}")]
    Group(#[from] GroupError),

    /// Regex operand of a set expression failed to compile
    #[error("{0}")]
    Pattern(#[from] PatternError),
}

impl QueryError {
    pub(crate) fn syntax(input: &str, rest: &str, message: impl Into<String>) -> Self {
        QueryError::Syntax {
            position: input.len().saturating_sub(rest.len()),
            message: message.into(),
        }
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
