//! Domain module
//!
//! Core domain types: events, guard errors, and the command context.

pub mod clock;
pub mod context;
pub mod error;
pub mod events;

pub use clock::{Clock, FixedClock, SystemClock};
pub use context::{CommandContext, InactiveUpdatePolicy};
pub use error::DomainError;
pub use events::UserEvent;
