//! Pattern error types
//!
//! Errors raised while compiling a group expression. Compilation is
//! synchronous and never touches registry state.

use thiserror::Error;

/// Errors that can occur while compiling an expression
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// Expression is empty or only whitespace
    #[error("Expression cannot be empty")]
    Empty,

    /// Opening delimiter without a matching closing delimiter
    #[error("Unbalanced delimiters in expression: {0}")]
    Unbalanced(String),

    /// Flag after the closing slash that is not supported
    #[error("Unsupported regular expression flag '{flag}' in {expression}")]
    UnsupportedFlag { expression: String, flag: char },

    /// The regex engine rejected the pattern
    #[error("Cannot compile regular expression '{expression}': {reason}")]
    Regex { expression: String, reason: String },
}

/// Result type for pattern operations
pub type PatternResult<T> = Result<T, PatternError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PatternError::Regex {
            expression: "/(/".to_string(),
            reason: "unclosed group".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot compile regular expression '/(/': unclosed group"
        );
    }
}
