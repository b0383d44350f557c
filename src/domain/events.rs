//! Domain Events
//!
//! Event definitions for Event Sourcing.
//! Events are immutable facts that have happened to a user. The store assigns
//! their position in the stream; events themselves carry no sequence number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User-related events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserEvent {
    /// User was created
    UserCreated {
        user_id: Uuid,
        email: String,
        username: String,
        created_at: DateTime<Utc>,
    },

    /// Email and username were replaced
    UserUpdated {
        user_id: Uuid,
        email: String,
        username: String,
        updated_at: DateTime<Utc>,
    },

    /// User was deactivated (soft delete)
    UserDeactivated {
        user_id: Uuid,
        deactivated_at: DateTime<Utc>,
    },
}

impl UserEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            UserEvent::UserCreated { .. } => "UserCreated",
            UserEvent::UserUpdated { .. } => "UserUpdated",
            UserEvent::UserDeactivated { .. } => "UserDeactivated",
        }
    }

    /// Get the user ID this event relates to
    pub fn user_id(&self) -> Uuid {
        match self {
            UserEvent::UserCreated { user_id, .. } => *user_id,
            UserEvent::UserUpdated { user_id, .. } => *user_id,
            UserEvent::UserDeactivated { user_id, .. } => *user_id,
        }
    }

    /// When the fact happened
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::UserCreated { created_at, .. } => *created_at,
            UserEvent::UserUpdated { updated_at, .. } => *updated_at,
            UserEvent::UserDeactivated { deactivated_at, .. } => *deactivated_at,
        }
    }
}
