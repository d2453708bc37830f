//! Group registry error types

use crate::pattern::PatternError;
use thiserror::Error;

/// Errors returned by group registry operations
///
/// Every variant is raised before any registry state changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// Expression failed to compile
    #[error("{0}")]
    Compile(#[from] PatternError),

    /// A group with this name already exists
    #[error("Group '{0}' already exists")]
    DuplicateName(String),

    /// No group with this name
    #[error("Cannot find group: '{0}'")]
    NotFound(String),

    /// Group name is not acceptable
    #[error("Invalid group name: {0}")]
    InvalidName(String),

    /// Scan queue is gone (engine shut down)
    #[error("Membership maintainer is not running")]
    MaintainerClosed,
}

/// Result type for group operations
pub type GroupResult<T> = Result<T, GroupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            GroupError::NotFound("a".to_string()).to_string(),
            "Cannot find group: 'a'"
        );
        assert_eq!(
            GroupError::DuplicateName("a".to_string()).to_string(),
            "Group 'a' already exists"
        );
    }

    #[test]
    fn test_compile_error_conversion() {
        let err: GroupError = PatternError::Empty.into();
        assert!(matches!(err, GroupError::Compile(_)));
        assert_eq!(err.to_string(), "Expression cannot be empty");
    }
}
