//! User event store
//!
//! Event-sourced persistence for user profiles: an append-only event stream
//! per user, replayed on load, with a read model kept in step on every commit.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod domain;
pub mod event_store;
pub mod projection;
pub mod repository;

mod error;

pub use aggregate::{Aggregate, User, UserState};
pub use config::{ConcurrencyMode, Config};
pub use domain::{CommandContext, DomainError, InactiveUpdatePolicy, UserEvent};
pub use error::{AppError, AppResult};
pub use event_store::{EventStore, EventStoreError, ExpectedVersion, InMemoryEventStore, PgEventStore};
pub use projection::{ProjectionQuery, UserProjection};
pub use repository::{RebuildSummary, UserRepository};
