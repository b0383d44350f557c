//! Event Store module
//!
//! Persistence layer for Event Sourcing.
//! Stores user event streams and keeps the read model in step with them.

mod error;
mod memory;
mod postgres;
mod store;

pub use error::EventStoreError;
pub use memory::InMemoryEventStore;
pub use postgres::PgEventStore;
pub use store::{EventStore, ExpectedVersion, ProjectionStore, StoredEvent};
