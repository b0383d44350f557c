//! Error handling module
//!
//! Centralized error type returned by the repository.

use uuid::Uuid;

use crate::domain::DomainError;
use crate::event_store::EventStoreError;
use crate::projection::ProjectionError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    /// Guard failure raised by an aggregate operation
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Another writer got to the stream first; reload and retry
    #[error("Persistence conflict for user {user_id}: {reason}")]
    PersistenceConflict { user_id: Uuid, reason: String },

    /// Log and read model disagree; never retried
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// Check if retrying the operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::PersistenceConflict { .. })
    }

    /// Check if the error indicates corrupted state
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::ConsistencyViolation(_))
    }

    /// Stable machine-readable code for callers mapping errors to responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::UserNotFound(_) => "user_not_found",
            AppError::Domain(DomainError::InvalidArgument { .. }) => "invalid_argument",
            AppError::Domain(DomainError::InvalidStateTransition(_)) => "invalid_state_transition",
            AppError::PersistenceConflict { .. } => "persistence_conflict",
            AppError::ConsistencyViolation(_) => "consistency_violation",
            AppError::Cancelled => "cancelled",
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
        }
    }
}

impl From<ProjectionError> for AppError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::ConsistencyViolation { .. } => {
                AppError::ConsistencyViolation(err.to_string())
            }
            ProjectionError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<EventStoreError> for AppError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::StreamAlreadyExists(user_id) => AppError::PersistenceConflict {
                user_id,
                reason: "stream already exists".to_string(),
            },
            EventStoreError::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            } => AppError::PersistenceConflict {
                user_id: stream_id,
                reason: format!("expected {expected}, found version {actual}"),
            },
            EventStoreError::Projection(e) => e.into(),
            EventStoreError::Database(e) => AppError::Database(e),
            EventStoreError::InvalidEventData(msg) => AppError::ConsistencyViolation(msg),
            e @ (EventStoreError::Serialization(_) | EventStoreError::Unavailable(_)) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::ExpectedVersion;

    #[test]
    fn test_conflicts_are_retryable() {
        let user_id = Uuid::new_v4();
        let err = AppError::from(EventStoreError::ConcurrencyConflict {
            stream_id: user_id,
            expected: ExpectedVersion::Exact(1),
            actual: 2,
        });

        assert!(err.is_retryable());
        assert!(!err.is_fatal());
        assert_eq!(err.error_code(), "persistence_conflict");
        assert!(err.to_string().contains("expected version 1, found version 2"));

        let err = AppError::from(EventStoreError::StreamAlreadyExists(user_id));
        assert!(matches!(err, AppError::PersistenceConflict { user_id: id, .. } if id == user_id));
    }

    #[test]
    fn test_consistency_violation_is_fatal() {
        let err = AppError::from(EventStoreError::Projection(
            ProjectionError::ConsistencyViolation {
                user_id: Uuid::nil(),
                event_type: "UserDeactivated",
                reason: "no projection row exists".to_string(),
            },
        ));

        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert_eq!(err.error_code(), "consistency_violation");
    }

    #[test]
    fn test_domain_error_codes() {
        let err = AppError::from(DomainError::invalid_argument("email", "Email cannot be empty"));
        assert_eq!(err.error_code(), "invalid_argument");

        let err = AppError::from(DomainError::invalid_transition("already deactivated"));
        assert_eq!(err.error_code(), "invalid_state_transition");
        assert!(!err.is_retryable());
    }
}
