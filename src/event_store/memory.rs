//! In-Memory Event Store
//!
//! Log and read model behind one mutex, so a commit is trivially atomic.
//! Intended for tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::UserEvent;
use crate::projection::{ProjectionQuery, UserProjection};

use super::{EventStore, EventStoreError, ExpectedVersion, ProjectionStore, StoredEvent};

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<Uuid, Vec<StoredEvent>>,
    projections: HashMap<Uuid, UserProjection>,
}

/// In-memory append-only event store with its read model
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
    stream_reads: AtomicU64,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, EventStoreError> {
        self.inner
            .lock()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))
    }

    /// Number of `load_stream` calls served so far
    pub fn stream_reads(&self) -> u64 {
        self.stream_reads.load(Ordering::Relaxed)
    }

    /// Write a new stream without touching the read model.
    ///
    /// Used to bring in history recorded elsewhere; a projection rebuild is
    /// expected afterwards.
    pub fn import_stream(
        &self,
        stream_id: Uuid,
        events: Vec<UserEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::InvalidEventData(format!(
                "stream {stream_id}: nothing to import"
            )));
        }
        check_owner(stream_id, &events)?;

        let mut inner = self.lock()?;
        if inner.streams.contains_key(&stream_id) {
            return Err(EventStoreError::StreamAlreadyExists(stream_id));
        }

        let stored = sequence_events(stream_id, 0, &events);
        inner.streams.insert(stream_id, stored.clone());
        Ok(stored)
    }
}

fn check_owner(stream_id: Uuid, events: &[UserEvent]) -> Result<(), EventStoreError> {
    match events.iter().find(|e| e.user_id() != stream_id) {
        Some(foreign) => Err(EventStoreError::InvalidEventData(format!(
            "{} for user {} cannot go to stream {}",
            foreign.event_type(),
            foreign.user_id(),
            stream_id
        ))),
        None => Ok(()),
    }
}

fn sequence_events(stream_id: Uuid, base: i64, events: &[UserEvent]) -> Vec<StoredEvent> {
    let recorded_at = Utc::now();
    events
        .iter()
        .zip(base + 1..)
        .map(|(event, sequence)| StoredEvent {
            id: Uuid::new_v4(),
            stream_id,
            sequence,
            event_type: event.event_type().to_string(),
            event: event.clone(),
            recorded_at,
        })
        .collect()
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn load_stream(&self, stream_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.stream_reads.fetch_add(1, Ordering::Relaxed);
        let inner = self.lock()?;
        Ok(inner.streams.get(&stream_id).cloned().unwrap_or_default())
    }

    async fn commit(
        &self,
        stream_id: Uuid,
        expected: ExpectedVersion,
        events: &[UserEvent],
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        check_owner(stream_id, events)?;

        let mut inner = self.lock()?;

        let current = inner
            .streams
            .get(&stream_id)
            .map(|stream| stream.last().map_or(0, |e| e.sequence));

        if !expected.matches(current) {
            return Err(match (expected, current) {
                (ExpectedVersion::NoStream, Some(_)) => {
                    EventStoreError::StreamAlreadyExists(stream_id)
                }
                _ => EventStoreError::ConcurrencyConflict {
                    stream_id,
                    expected,
                    actual: current.unwrap_or(0),
                },
            });
        }

        let stored = sequence_events(stream_id, current.unwrap_or(0), events);

        // Merge against a copy first; nothing is written unless every event merges.
        let mut row = inner.projections.get(&stream_id).cloned();
        for e in &stored {
            row = Some(UserProjection::merge(row, e.sequence, &e.event)?);
        }

        inner
            .streams
            .entry(stream_id)
            .or_default()
            .extend(stored.iter().cloned());
        if let Some(row) = row {
            inner.projections.insert(stream_id, row);
        }

        Ok(stored)
    }

    async fn stream_ids(&self) -> Result<Vec<Uuid>, EventStoreError> {
        let inner = self.lock()?;
        Ok(inner.streams.keys().copied().collect())
    }
}

#[async_trait]
impl ProjectionStore for InMemoryEventStore {
    async fn get_projection(&self, id: Uuid) -> Result<Option<UserProjection>, EventStoreError> {
        let inner = self.lock()?;
        Ok(inner.projections.get(&id).cloned())
    }

    async fn query_projections(
        &self,
        query: &ProjectionQuery,
    ) -> Result<Vec<UserProjection>, EventStoreError> {
        let inner = self.lock()?;
        let mut rows: Vec<UserProjection> = inner
            .projections
            .values()
            .filter(|row| query.matches(row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn replace_projection(&self, projection: &UserProjection) -> Result<(), EventStoreError> {
        let mut inner = self.lock()?;
        inner.projections.insert(projection.id, projection.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    fn created(user_id: Uuid) -> UserEvent {
        UserEvent::UserCreated {
            user_id,
            email: "a@x.com".to_string(),
            username: "bob".to_string(),
            created_at: Utc::now(),
        }
    }

    fn deactivated(user_id: Uuid) -> UserEvent {
        UserEvent::UserDeactivated {
            user_id,
            deactivated_at: Utc::now(),
        }
    }

    #[test]
    fn test_commit_assigns_sequences_from_one() {
        let store = InMemoryEventStore::new();
        let user_id = Uuid::new_v4();

        let stored = block_on(store.commit(
            user_id,
            ExpectedVersion::NoStream,
            &[created(user_id), deactivated(user_id)],
        ))
        .unwrap();

        let sequences: Vec<i64> = stored.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert_eq!(stored[0].event_type, "UserCreated");

        let more = block_on(store.commit(
            user_id,
            ExpectedVersion::Exact(2),
            &[UserEvent::UserUpdated {
                user_id,
                email: "b@x.com".to_string(),
                username: "bob2".to_string(),
                updated_at: Utc::now(),
            }],
        ))
        .unwrap();
        assert_eq!(more[0].sequence, 3);

        let row = block_on(store.get_projection(user_id)).unwrap().unwrap();
        assert_eq!(row.version, 3);
        assert_eq!(row.email, "b@x.com");
        assert!(!row.is_active);
    }

    #[test]
    fn test_create_on_existing_stream_fails() {
        let store = InMemoryEventStore::new();
        let user_id = Uuid::new_v4();
        block_on(store.commit(user_id, ExpectedVersion::NoStream, &[created(user_id)])).unwrap();

        let result = block_on(store.commit(user_id, ExpectedVersion::NoStream, &[created(user_id)]));

        assert!(matches!(result, Err(EventStoreError::StreamAlreadyExists(id)) if id == user_id));
        assert_eq!(block_on(store.load_stream(user_id)).unwrap().len(), 1);
    }

    #[test]
    fn test_version_mismatch_is_conflict() {
        let store = InMemoryEventStore::new();
        let user_id = Uuid::new_v4();
        block_on(store.commit(user_id, ExpectedVersion::NoStream, &[created(user_id)])).unwrap();

        let result = block_on(store.commit(
            user_id,
            ExpectedVersion::Exact(0),
            &[deactivated(user_id)],
        ));

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { actual: 1, .. })
        ));
    }

    #[test]
    fn test_append_to_missing_stream_is_conflict() {
        let store = InMemoryEventStore::new();
        let user_id = Uuid::new_v4();

        let result = block_on(store.commit(user_id, ExpectedVersion::Any, &[deactivated(user_id)]));

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { actual: 0, .. })
        ));
        assert!(block_on(store.stream_ids()).unwrap().is_empty());
    }

    #[test]
    fn test_failed_merge_writes_nothing() {
        let store = InMemoryEventStore::new();
        let user_id = Uuid::new_v4();

        // A stream that does not start with a creation event cannot be projected.
        let result = block_on(store.commit(
            user_id,
            ExpectedVersion::NoStream,
            &[deactivated(user_id)],
        ));

        assert!(matches!(result, Err(EventStoreError::Projection(_))));
        assert!(block_on(store.load_stream(user_id)).unwrap().is_empty());
        assert!(block_on(store.get_projection(user_id)).unwrap().is_none());
    }

    #[test]
    fn test_foreign_event_is_rejected() {
        let store = InMemoryEventStore::new();

        let result = block_on(store.commit(
            Uuid::new_v4(),
            ExpectedVersion::NoStream,
            &[created(Uuid::new_v4())],
        ));

        assert!(matches!(result, Err(EventStoreError::InvalidEventData(_))));
    }

    #[test]
    fn test_import_stream_skips_projection() {
        let store = InMemoryEventStore::new();
        let user_id = Uuid::new_v4();

        store.import_stream(user_id, vec![created(user_id)]).unwrap();

        assert_eq!(block_on(store.load_stream(user_id)).unwrap().len(), 1);
        assert!(block_on(store.get_projection(user_id)).unwrap().is_none());
        assert_eq!(store.stream_reads(), 1);
    }

    #[test]
    fn test_import_empty_stream_is_rejected() {
        let store = InMemoryEventStore::new();
        let user_id = Uuid::new_v4();

        let result = store.import_stream(user_id, vec![]);

        assert!(matches!(result, Err(EventStoreError::InvalidEventData(_))));
        assert!(block_on(store.stream_ids()).unwrap().is_empty());

        // The id stays free for a normal creation.
        block_on(store.commit(user_id, ExpectedVersion::NoStream, &[created(user_id)])).unwrap();
    }

    #[test]
    fn test_import_foreign_event_is_rejected() {
        let store = InMemoryEventStore::new();
        let user_id = Uuid::new_v4();

        let result = store.import_stream(user_id, vec![created(Uuid::new_v4())]);

        assert!(matches!(result, Err(EventStoreError::InvalidEventData(_))));
        assert!(block_on(store.load_stream(user_id)).unwrap().is_empty());
    }
}
