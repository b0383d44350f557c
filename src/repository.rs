//! User Repository
//!
//! Loads users by replaying their stream, saves pending events together with
//! their read-model changes, and answers list queries from the read model.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregate::{Aggregate, User, UserState};
use crate::config::{ConcurrencyMode, Config};
use crate::domain::{DomainError, UserEvent};
use crate::error::{AppError, AppResult};
use crate::event_store::{EventStore, ExpectedVersion, ProjectionStore, StoredEvent};
use crate::projection::{ProjectionQuery, UserProjection};

/// Outcome of `rebuild_all_projections`
#[derive(Debug, Default)]
pub struct RebuildSummary {
    pub rebuilt: usize,
    /// Streams left untouched, with the reason
    pub failed: Vec<(Uuid, AppError)>,
}

/// Repository over a backend that holds both the log and the read model
#[derive(Debug, Clone)]
pub struct UserRepository<S> {
    store: S,
    concurrency_mode: ConcurrencyMode,
    max_retries: u32,
}

impl<S> UserRepository<S>
where
    S: EventStore + ProjectionStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            concurrency_mode: ConcurrencyMode::default(),
            max_retries: 3,
        }
    }

    pub fn from_config(store: S, config: &Config) -> Self {
        Self::new(store)
            .with_concurrency_mode(config.concurrency_mode)
            .with_max_retries(config.save_max_retries)
    }

    pub fn with_concurrency_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency_mode = mode;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // =========================================================================
    // Load
    // =========================================================================

    /// Replay the user's full stream.
    ///
    /// Fails with `UserNotFound` when the stream is empty, and with
    /// `ConsistencyViolation` when the stream is malformed.
    pub async fn load(&self, user_id: Uuid, cancel: &CancellationToken) -> AppResult<User> {
        let events = cancellable(cancel, self.store.load_stream(user_id)).await?;
        if events.is_empty() {
            return Err(AppError::UserNotFound(user_id));
        }

        verify_stream(user_id, &events)?;

        let user = User::from_history(events.into_iter().map(|stored| stored.event));

        tracing::debug!(
            aggregate = UserState::aggregate_type(),
            user_id = %user_id,
            version = user.version(),
            "User loaded"
        );

        Ok(user)
    }

    // =========================================================================
    // Save
    // =========================================================================

    /// Persist the user's pending events and their projection changes as one
    /// commit, then clear the pending buffer.
    ///
    /// On any error the buffer is left intact so the call can be retried.
    pub async fn save(&self, user: &mut User, cancel: &CancellationToken) -> AppResult<()> {
        if !user.has_uncommitted_events() {
            return Ok(());
        }

        let user_id = user.id();
        let expected = self.expected_version(user);

        let committed = cancellable(
            cancel,
            self.store.commit(user_id, expected, user.uncommitted_events()),
        )
        .await;

        let stored = match committed {
            Ok(stored) => stored,
            Err(e) => {
                if e.is_fatal() {
                    tracing::error!(user_id = %user_id, error = %e, "Commit rejected");
                } else {
                    tracing::warn!(user_id = %user_id, error = %e, "Commit failed");
                }
                return Err(e);
            }
        };

        user.mark_committed();

        if let Some(last) = stored.last() {
            tracing::info!(
                aggregate = UserState::aggregate_type(),
                user_id = %user_id,
                events = stored.len(),
                version = last.sequence,
                occurred_at = %last.event.occurred_at(),
                "User events committed"
            );
        }

        Ok(())
    }

    fn expected_version(&self, user: &User) -> ExpectedVersion {
        match (user.committed_version(), self.concurrency_mode) {
            (0, _) => ExpectedVersion::NoStream,
            (version, ConcurrencyMode::Optimistic) => ExpectedVersion::Exact(version),
            (_, ConcurrencyMode::CreateIfAbsent) => ExpectedVersion::Any,
        }
    }

    /// Load, run `operation`, save; on a persistence conflict start over from
    /// a fresh load, up to `max_retries` times.
    pub async fn execute<F>(
        &self,
        user_id: Uuid,
        mut operation: F,
        cancel: &CancellationToken,
    ) -> AppResult<User>
    where
        F: FnMut(&mut User) -> Result<(), DomainError> + Send,
    {
        let mut attempt = 0;

        loop {
            let mut user = self.load(user_id, cancel).await?;
            operation(&mut user)?;

            match self.save(&mut user, cancel).await {
                Ok(()) => return Ok(user),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        user_id = %user_id,
                        attempt,
                        max_retries = self.max_retries,
                        "Persistence conflict, retrying"
                    );

                    let delay = Duration::from_millis(50 * u64::from(attempt));
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AppError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    // =========================================================================
    // Queries (read model only)
    // =========================================================================

    /// Active users, built from projection rows without replaying any stream
    pub async fn get_all(&self, cancel: &CancellationToken) -> AppResult<Vec<User>> {
        let rows = cancellable(cancel, self.store.query_projections(&ProjectionQuery::active())).await?;

        tracing::debug!(users = rows.len(), "Active users listed");

        Ok(rows.into_iter().map(User::from_projection).collect())
    }

    pub async fn query(
        &self,
        query: &ProjectionQuery,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<UserProjection>> {
        cancellable(cancel, self.store.query_projections(query)).await
    }

    pub async fn find_by_email(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<UserProjection>> {
        let query = ProjectionQuery::all().with_email(email);
        let rows = cancellable(cancel, self.store.query_projections(&query)).await?;

        Ok(rows.into_iter().next())
    }

    pub async fn get_projection(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Option<UserProjection>> {
        cancellable(cancel, self.store.get_projection(user_id)).await
    }

    // =========================================================================
    // Read model maintenance
    // =========================================================================

    /// Refold the user's stream and overwrite the read-model row.
    ///
    /// Meant for maintenance windows: a commit landing between the read and the
    /// overwrite would be hidden until the next rebuild.
    pub async fn rebuild_projection(&self, user_id: Uuid) -> AppResult<UserProjection> {
        let row = self
            .fold_stream(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))?;

        self.store.replace_projection(&row).await?;

        tracing::info!(user_id = %user_id, version = row.version, "Projection rebuilt");

        Ok(row)
    }

    /// Rebuild every row. A stream that cannot be rebuilt is recorded in the
    /// summary and the remaining streams are still processed.
    pub async fn rebuild_all_projections(&self) -> AppResult<RebuildSummary> {
        let stream_ids = self.store.stream_ids().await?;
        let mut summary = RebuildSummary::default();

        for user_id in stream_ids {
            match self.rebuild_projection(user_id).await {
                Ok(_) => summary.rebuilt += 1,
                Err(e) => {
                    tracing::error!(user_id = %user_id, error = %e, "Projection rebuild failed");
                    summary.failed.push((user_id, e));
                }
            }
        }

        tracing::info!(
            rebuilt = summary.rebuilt,
            failed = summary.failed.len(),
            "All projections rebuilt"
        );

        Ok(summary)
    }

    /// Whether the read-model row equals the fold of the user's stream
    pub async fn verify_projection(&self, user_id: Uuid) -> AppResult<bool> {
        let expected = self.fold_stream(user_id).await?;
        let actual = self.store.get_projection(user_id).await?;

        let agrees = expected == actual;
        if !agrees {
            tracing::error!(user_id = %user_id, "Projection disagrees with event log");
        }

        Ok(agrees)
    }

    async fn fold_stream(&self, user_id: Uuid) -> AppResult<Option<UserProjection>> {
        let events = self.store.load_stream(user_id).await?;
        verify_stream(user_id, &events)?;

        Ok(UserProjection::from_stream(
            events.iter().map(|stored| (stored.sequence, &stored.event)),
        )?)
    }
}

/// Race a store call against cancellation; cancellation wins ties so a
/// cancelled token never starts the call.
async fn cancellable<F, T, E>(cancel: &CancellationToken, call: F) -> AppResult<T>
where
    F: Future<Output = Result<T, E>>,
    AppError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        result = call => result.map_err(AppError::from),
    }
}

/// A replayable stream belongs to one user, is numbered 1..n without gaps,
/// and starts with, and only with, one creation event.
fn verify_stream(user_id: Uuid, events: &[StoredEvent]) -> AppResult<()> {
    for (expected_sequence, stored) in (1_i64..).zip(events) {
        let problem = if stored.sequence != expected_sequence {
            Some(format!(
                "expected sequence {expected_sequence}, found {}",
                stored.sequence
            ))
        } else if stored.event.user_id() != user_id {
            Some(format!(
                "event {} belongs to user {}",
                stored.id,
                stored.event.user_id()
            ))
        } else if matches!(stored.event, UserEvent::UserCreated { .. }) != (expected_sequence == 1) {
            Some(format!(
                "{} at sequence {}",
                stored.event_type, stored.sequence
            ))
        } else {
            None
        };

        if let Some(problem) = problem {
            tracing::error!(user_id = %user_id, problem = %problem, "Malformed event stream");
            return Err(AppError::ConsistencyViolation(format!(
                "stream {user_id}: {problem}"
            )));
        }
    }

    Ok(())
}
