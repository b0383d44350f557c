//! Event Store Errors
//!
//! Error types for event store operations.

use uuid::Uuid;

use crate::projection::ProjectionError;

use super::ExpectedVersion;

/// Errors that can occur in the event store
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// A new stream was requested for an identity that already has one
    #[error("Stream already exists for aggregate {0}")]
    StreamAlreadyExists(Uuid),

    /// Optimistic concurrency conflict
    #[error("Concurrency conflict for aggregate {stream_id}: expected {expected}, found version {actual}")]
    ConcurrencyConflict {
        stream_id: Uuid,
        expected: ExpectedVersion,
        actual: i64,
    },

    /// Projection merge failed inside the commit
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid event data
    #[error("Invalid event data: {0}")]
    InvalidEventData(String),

    /// Backend is unusable (e.g. a poisoned lock)
    #[error("Event store unavailable: {0}")]
    Unavailable(String),
}

impl EventStoreError {
    /// Check if this error is a concurrency conflict
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            EventStoreError::ConcurrencyConflict { .. } | EventStoreError::StreamAlreadyExists(_)
        )
    }
}
