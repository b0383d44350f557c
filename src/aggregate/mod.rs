//! Aggregate module
//!
//! Aggregate Root pattern implementation for Event Sourcing.

pub mod user;

pub use user::{User, UserState};

/// Aggregate trait that all aggregate states must implement
///
/// `apply` is a pure reducer: it consumes one snapshot and returns the next.
/// It must be deterministic so that replaying the same prefix of a stream
/// always yields the same intermediate state.
pub trait Aggregate: Sized + Default {
    /// The type of events this aggregate handles
    type Event;

    /// Get the aggregate type name (for storage)
    fn aggregate_type() -> &'static str;

    /// Get the aggregate ID
    fn id(&self) -> uuid::Uuid;

    /// Get the current version (number of events applied)
    fn version(&self) -> i64;

    /// Apply an event to produce the next state
    fn apply(self, event: Self::Event) -> Self;

    /// Fold an ordered event sequence over the empty state
    fn replay<I>(events: I) -> Self
    where
        I: IntoIterator<Item = Self::Event>,
    {
        events.into_iter().fold(Self::default(), Self::apply)
    }
}
