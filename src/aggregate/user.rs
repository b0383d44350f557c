//! User Aggregate
//!
//! `UserState` is the reducer snapshot; `User` is the aggregate root handed to
//! callers: the latest snapshot plus the events produced since the last commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{CommandContext, DomainError, InactiveUpdatePolicy, UserEvent};
use crate::projection::UserProjection;

use super::Aggregate;

/// Folded user state
///
/// The default value is the empty state no event has touched yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    id: Uuid,
    email: String,
    username: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    is_active: bool,
    /// Number of events applied
    version: i64,
}

impl UserState {
    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

impl Aggregate for UserState {
    type Event = UserEvent;

    fn aggregate_type() -> &'static str {
        "User"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, event: Self::Event) -> Self {
        match event {
            UserEvent::UserCreated {
                user_id,
                email,
                username,
                created_at,
            } => {
                self.id = user_id;
                self.email = email;
                self.username = username;
                self.created_at = created_at;
                self.is_active = true;
            }

            UserEvent::UserUpdated {
                email,
                username,
                updated_at,
                ..
            } => {
                self.email = email;
                self.username = username;
                self.updated_at = Some(updated_at);
            }

            UserEvent::UserDeactivated { deactivated_at, .. } => {
                self.is_active = false;
                self.updated_at = Some(deactivated_at);
            }
        }

        self.version += 1;
        self
    }
}

/// User Aggregate Root
///
/// Produced either by [`User::create`] or by the repository replaying a stored
/// stream, and consumed by one save. It is never shared between concurrent
/// operations.
#[derive(Debug, Clone)]
pub struct User {
    state: UserState,
    pending: Vec<UserEvent>,
}

impl User {
    /// Create a new user; records one `UserCreated` event.
    ///
    /// Format validation of email and username happens before this call.
    pub fn create(
        user_id: Uuid,
        email: impl Into<String>,
        username: impl Into<String>,
        context: &CommandContext,
    ) -> Self {
        let mut user = Self {
            state: UserState::default(),
            pending: Vec::new(),
        };

        user.record(UserEvent::UserCreated {
            user_id,
            email: email.into(),
            username: username.into(),
            created_at: context.clock().now(),
        });

        user
    }

    /// Rebuild from committed history; the pending buffer starts empty.
    pub(crate) fn from_history<I>(events: I) -> Self
    where
        I: IntoIterator<Item = UserEvent>,
    {
        Self {
            state: UserState::replay(events),
            pending: Vec::new(),
        }
    }

    /// Lightweight view built from a read-model row, without replaying the log.
    pub fn from_projection(projection: UserProjection) -> Self {
        Self {
            state: UserState {
                id: projection.id,
                email: projection.email,
                username: projection.username,
                created_at: projection.created_at,
                updated_at: projection.updated_at,
                is_active: projection.is_active,
                version: projection.version,
            },
            pending: Vec::new(),
        }
    }

    /// Replace email and username
    pub fn update_info(
        &mut self,
        email: impl Into<String>,
        username: impl Into<String>,
        context: &CommandContext,
    ) -> Result<(), DomainError> {
        let email = email.into();
        let username = username.into();

        if email.trim().is_empty() {
            return Err(DomainError::invalid_argument("email", "Email cannot be empty"));
        }
        if username.trim().is_empty() {
            return Err(DomainError::invalid_argument(
                "username",
                "Username cannot be empty",
            ));
        }
        if !self.state.is_active && context.inactive_updates() == InactiveUpdatePolicy::Reject {
            return Err(DomainError::invalid_transition(
                "Cannot update a deactivated user",
            ));
        }

        self.record(UserEvent::UserUpdated {
            user_id: self.state.id,
            email,
            username,
            updated_at: context.clock().now(),
        });

        Ok(())
    }

    /// Deactivate the user (soft delete)
    pub fn deactivate(&mut self, context: &CommandContext) -> Result<(), DomainError> {
        if !self.state.is_active {
            return Err(DomainError::invalid_transition(
                "User is already deactivated",
            ));
        }

        self.record(UserEvent::UserDeactivated {
            user_id: self.state.id,
            deactivated_at: context.clock().now(),
        });

        Ok(())
    }

    fn record(&mut self, event: UserEvent) {
        self.pending.push(event.clone());
        self.state = std::mem::take(&mut self.state).apply(event);
    }

    /// Drop the pending buffer once the repository has persisted it
    pub(crate) fn mark_committed(&mut self) {
        self.pending.clear();
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn id(&self) -> Uuid {
        self.state.id
    }

    pub fn email(&self) -> &str {
        &self.state.email
    }

    pub fn username(&self) -> &str {
        &self.state.username
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.state.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.state.updated_at
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active
    }

    /// Number of events folded, committed or not
    pub fn version(&self) -> i64 {
        self.state.version
    }

    /// Version of the stream this aggregate was loaded at (0 when new)
    pub fn committed_version(&self) -> i64 {
        self.state.version - self.pending.len() as i64
    }

    pub fn state(&self) -> &UserState {
        &self.state
    }

    pub fn uncommitted_events(&self) -> &[UserEvent] {
        &self.pending
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.pending.is_empty()
    }
}
