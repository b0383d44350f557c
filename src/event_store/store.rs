//! Store Contracts
//!
//! The two seams the repository talks to: the append-only event log and the
//! read model it feeds. A backend implements both so that appending events
//! and merging them into the read model share one commit.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::UserEvent;
use crate::projection::{ProjectionQuery, UserProjection};

use super::EventStoreError;

/// Event as persisted in a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: Uuid,
    pub stream_id: Uuid,
    /// Assigned by the store: 1 for the first event, +1 for each append
    pub sequence: i64,
    pub event_type: String,
    pub event: UserEvent,
    pub recorded_at: DateTime<Utc>,
}

/// Precondition on the stream's version at append time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must not exist; it is created with the appended events
    NoStream,
    /// The stream must exist and be at exactly this version
    Exact(i64),
    /// The stream must exist, at any version
    Any,
}

impl ExpectedVersion {
    /// Check against the current stream version (`None` when absent)
    pub fn matches(&self, current: Option<i64>) -> bool {
        match (self, current) {
            (ExpectedVersion::NoStream, None) => true,
            (ExpectedVersion::Exact(expected), Some(actual)) => *expected == actual,
            (ExpectedVersion::Any, Some(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::NoStream => write!(f, "no stream"),
            ExpectedVersion::Exact(version) => write!(f, "version {version}"),
            ExpectedVersion::Any => write!(f, "any existing stream"),
        }
    }
}

/// Append-only event log
#[async_trait]
pub trait EventStore: Send + Sync {
    /// All events of a stream in sequence order; empty when the stream is absent.
    async fn load_stream(&self, stream_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Append `events` in order and merge each into the read model, atomically.
    ///
    /// With [`ExpectedVersion::NoStream`] the stream is created; if it already
    /// exists the call fails with `StreamAlreadyExists` and nothing is written.
    /// Either every event and every projection change lands, or none does.
    async fn commit(
        &self,
        stream_id: Uuid,
        expected: ExpectedVersion,
        events: &[UserEvent],
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Identities of every stream in the log
    async fn stream_ids(&self) -> Result<Vec<Uuid>, EventStoreError>;
}

/// Read side of the log
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn get_projection(&self, id: Uuid) -> Result<Option<UserProjection>, EventStoreError>;

    async fn query_projections(
        &self,
        query: &ProjectionQuery,
    ) -> Result<Vec<UserProjection>, EventStoreError>;

    /// Overwrite a row with a value refolded from the log
    async fn replace_projection(&self, projection: &UserProjection) -> Result<(), EventStoreError>;
}
