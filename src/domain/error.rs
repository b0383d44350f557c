//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

/// Guard failures raised by aggregate operations.
///
/// Whenever one of these is returned, the operation produced no event and the
/// aggregate's pending buffer is untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A command argument failed validation
    #[error("Invalid argument `{field}`: {reason}")]
    InvalidArgument {
        field: &'static str,
        reason: String,
    },

    /// The operation is not allowed from the current state
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

impl DomainError {
    /// Create an invalid argument error
    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    /// Create an invalid state transition error
    pub fn invalid_transition(reason: impl Into<String>) -> Self {
        Self::InvalidStateTransition(reason.into())
    }
}
