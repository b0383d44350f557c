//! Projection module
//!
//! Updates the user read model from events.
//! Projections are optimized for queries and derived from events; the event
//! log stays authoritative and the read model can be rebuilt from it.

mod read_model;

pub use read_model::{ProjectionError, ProjectionQuery, UserProjection};
