//! Errors raised while parsing shared domain values.

use thiserror::Error;

/// A value from outside the process could not be turned into a domain type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Unknown enum tag, empty name and the like.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Identifier text that is not a UUID.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        assert_eq!(
            DomainError::validation("unknown record kind 'fax'").to_string(),
            "validation failed: unknown record kind 'fax'"
        );
        assert_eq!(
            DomainError::invalid_id("OrgId: bad").to_string(),
            "invalid identifier: OrgId: bad"
        );
    }
}
