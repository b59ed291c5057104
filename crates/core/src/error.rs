//! Errors raised by the pure pipeline model.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// A submission or state transition the pipeline model refuses.
///
/// Storage, rendering and transport failures are reported by their own
/// layers in `docpipe-infra`; this type only carries rule violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Tenant-supplied input was rejected (item specs, routing, plans).
    #[error("invalid input: {0}")]
    Validation(String),

    /// A request or item was asked to move along a transition it does not allow.
    #[error("illegal state transition: {0}")]
    Invariant(String),

    #[error("malformed id: {0}")]
    InvalidId(String),

    /// The target changed underneath the caller (e.g. already finalized).
    #[error("state conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_rejected_rule() {
        assert_eq!(
            DomainError::validation("template_ref is required").to_string(),
            "invalid input: template_ref is required"
        );
        assert_eq!(
            DomainError::invariant("COMPLETED -> PENDING").to_string(),
            "illegal state transition: COMPLETED -> PENDING"
        );
    }
}
