//! PostgreSQL Event Store
//!
//! Streams, events and the user read model live in one database, so a commit
//! is one transaction. Dropping an unfinished transaction rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::UserEvent;
use crate::projection::{ProjectionQuery, UserProjection};

use super::{EventStore, EventStoreError, ExpectedVersion, ProjectionStore, StoredEvent};

/// Unique violation, e.g. two writers racing for the same `(stream_id, sequence)`
const UNIQUE_VIOLATION: &str = "23505";

type EventRow = (Uuid, Uuid, i64, String, serde_json::Value, DateTime<Utc>);

/// Event Store for persisting and retrieving user events
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Create a new PgEventStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn try_commit(
        &self,
        stream_id: Uuid,
        expected: ExpectedVersion,
        events: &[UserEvent],
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut tx = self.pool.begin().await?;

        let current = match expected {
            ExpectedVersion::NoStream => {
                if !self.create_stream(&mut tx, stream_id).await? {
                    return Err(EventStoreError::StreamAlreadyExists(stream_id));
                }
                0
            }
            ExpectedVersion::Exact(_) | ExpectedVersion::Any => {
                // Row lock serialises appends to the same stream.
                let version = self.lock_stream(&mut tx, stream_id).await?;
                if !expected.matches(version) {
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual: version.unwrap_or(0),
                    });
                }
                version.unwrap_or(0)
            }
        };

        let mut stored = Vec::with_capacity(events.len());
        for (event, sequence) in events.iter().zip(current + 1..) {
            stored.push(self.insert_event(&mut tx, stream_id, sequence, event).await?);
        }

        self.project(&mut tx, stream_id, &stored).await?;

        let new_version = current + stored.len() as i64;
        sqlx::query("UPDATE user_streams SET version = $2, updated_at = NOW() WHERE stream_id = $1")
            .bind(stream_id)
            .bind(new_version)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            stream_id = %stream_id,
            events = stored.len(),
            version = new_version,
            "Events committed"
        );

        Ok(stored)
    }

    /// Returns false when the stream already exists
    async fn create_stream(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream_id: Uuid,
    ) -> Result<bool, EventStoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO user_streams (stream_id, version)
            VALUES ($1, 0)
            ON CONFLICT (stream_id) DO NOTHING
            "#,
        )
        .bind(stream_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn lock_stream(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream_id: Uuid,
    ) -> Result<Option<i64>, EventStoreError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM user_streams WHERE stream_id = $1 FOR UPDATE")
                .bind(stream_id)
                .fetch_optional(&mut **tx)
                .await?;

        Ok(version)
    }

    async fn insert_event(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream_id: Uuid,
        sequence: i64,
        event: &UserEvent,
    ) -> Result<StoredEvent, EventStoreError> {
        let payload = serde_json::to_value(event)?;

        let (id, recorded_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO user_events (stream_id, sequence, event_type, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id, recorded_at
            "#,
        )
        .bind(stream_id)
        .bind(sequence)
        .bind(event.event_type())
        .bind(&payload)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            let duplicate = matches!(
                &e,
                sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
            );
            if duplicate {
                EventStoreError::ConcurrencyConflict {
                    stream_id,
                    expected: ExpectedVersion::Exact(sequence - 1),
                    actual: sequence,
                }
            } else {
                EventStoreError::Database(e)
            }
        })?;

        Ok(StoredEvent {
            id,
            stream_id,
            sequence,
            event_type: event.event_type().to_string(),
            event: event.clone(),
            recorded_at,
        })
    }

    /// Merge freshly inserted events into the read model inside the same transaction
    async fn project(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream_id: Uuid,
        stored: &[StoredEvent],
    ) -> Result<(), EventStoreError> {
        let current: Option<UserProjection> = sqlx::query_as(
            r#"
            SELECT id, email, username, created_at, updated_at, is_active, version
            FROM user_projections
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(stream_id)
        .fetch_optional(&mut **tx)
        .await?;

        let mut row = current;
        for e in stored {
            row = Some(UserProjection::merge(row, e.sequence, &e.event)?);
        }

        if let Some(row) = row {
            upsert_projection(&mut **tx, &row).await?;
        }

        Ok(())
    }
}

async fn upsert_projection<'e, E>(executor: E, row: &UserProjection) -> Result<(), EventStoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO user_projections (id, email, username, created_at, updated_at, is_active, version)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE SET
            email = EXCLUDED.email,
            username = EXCLUDED.username,
            created_at = EXCLUDED.created_at,
            updated_at = EXCLUDED.updated_at,
            is_active = EXCLUDED.is_active,
            version = EXCLUDED.version
        "#,
    )
    .bind(row.id)
    .bind(&row.email)
    .bind(&row.username)
    .bind(row.created_at)
    .bind(row.updated_at)
    .bind(row.is_active)
    .bind(row.version)
    .execute(executor)
    .await?;

    Ok(())
}

fn decode_event(row: EventRow) -> Result<StoredEvent, EventStoreError> {
    let (id, stream_id, sequence, event_type, payload, recorded_at) = row;
    let event: UserEvent = serde_json::from_value(payload)?;

    if event.event_type() != event_type {
        return Err(EventStoreError::InvalidEventData(format!(
            "event {id} is stored as {event_type} but its payload is {}",
            event.event_type()
        )));
    }

    Ok(StoredEvent {
        id,
        stream_id,
        sequence,
        event_type,
        event,
        recorded_at,
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn load_stream(&self, stream_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, stream_id, sequence, event_type, payload, recorded_at
            FROM user_events
            WHERE stream_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_event).collect()
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
        if let Some(foreign) = events.iter().find(|e| e.user_id() != stream_id) {
            return Err(EventStoreError::InvalidEventData(format!(
                "{} for user {} cannot go to stream {}",
                foreign.event_type(),
                foreign.user_id(),
                stream_id
            )));
        }

        let result = self.try_commit(stream_id, expected, events).await;
        if let Err(e) = &result {
            if e.is_concurrency_conflict() {
                tracing::debug!(stream_id = %stream_id, error = %e, "Commit lost a version race");
            }
        }

        result
    }

    async fn stream_ids(&self) -> Result<Vec<Uuid>, EventStoreError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT stream_id FROM user_streams ORDER BY created_at, stream_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(ids)
    }
}

#[async_trait]
impl ProjectionStore for PgEventStore {
    async fn get_projection(&self, id: Uuid) -> Result<Option<UserProjection>, EventStoreError> {
        let row: Option<UserProjection> = sqlx::query_as(
            r#"
            SELECT id, email, username, created_at, updated_at, is_active, version
            FROM user_projections
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn query_projections(
        &self,
        query: &ProjectionQuery,
    ) -> Result<Vec<UserProjection>, EventStoreError> {
        let rows: Vec<UserProjection> = sqlx::query_as(
            r#"
            SELECT id, email, username, created_at, updated_at, is_active, version
            FROM user_projections
            WHERE ($1::BOOLEAN IS NULL OR is_active = $1)
              AND ($2::TEXT IS NULL OR email = $2)
              AND ($3::TEXT IS NULL OR username = $3)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(query.is_active)
        .bind(query.email.as_deref())
        .bind(query.username.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn replace_projection(&self, projection: &UserProjection) -> Result<(), EventStoreError> {
        upsert_projection(&self.pool, projection).await
    }
}
