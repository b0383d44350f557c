//! Projection Rules
//!
//! The read model kept next to the event log. One merge rule per event tag;
//! every backend runs these same rules inside its commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::UserEvent;

/// Denormalized user row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProjection {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Sequence of the last event merged into this row
    pub version: i64,
}

impl UserProjection {
    /// Merge one stored event into the current row.
    ///
    /// Re-merging the identical event at the same sequence yields the same
    /// row. A non-creation event with no row, or a creation event anywhere
    /// but the head of the stream, is a consistency violation.
    pub fn merge(
        current: Option<UserProjection>,
        sequence: i64,
        event: &UserEvent,
    ) -> Result<UserProjection, ProjectionError> {
        match (event, current) {
            (
                UserEvent::UserCreated {
                    user_id,
                    email,
                    username,
                    created_at,
                },
                _,
            ) => {
                if sequence != 1 {
                    return Err(ProjectionError::violation(
                        *user_id,
                        event,
                        format!("creation event at sequence {sequence}"),
                    ));
                }
                Ok(UserProjection {
                    id: *user_id,
                    email: email.clone(),
                    username: username.clone(),
                    created_at: *created_at,
                    updated_at: None,
                    is_active: true,
                    version: sequence,
                })
            }

            (
                UserEvent::UserUpdated {
                    email,
                    username,
                    updated_at,
                    ..
                },
                Some(row),
            ) => Ok(UserProjection {
                email: email.clone(),
                username: username.clone(),
                updated_at: Some(*updated_at),
                version: sequence,
                ..row
            }),

            (UserEvent::UserDeactivated { deactivated_at, .. }, Some(row)) => {
                Ok(UserProjection {
                    is_active: false,
                    updated_at: Some(*deactivated_at),
                    version: sequence,
                    ..row
                })
            }

            (_, None) => Err(ProjectionError::violation(
                event.user_id(),
                event,
                "no projection row exists",
            )),
        }
    }

    /// Fold a whole stream, in order, into a fresh row
    pub fn from_stream<'a, I>(events: I) -> Result<Option<UserProjection>, ProjectionError>
    where
        I: IntoIterator<Item = (i64, &'a UserEvent)>,
    {
        let mut row = None;
        for (sequence, event) in events {
            row = Some(Self::merge(row, sequence, event)?);
        }
        Ok(row)
    }
}

/// Equality and boolean filters over the read model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionQuery {
    pub is_active: Option<bool>,
    pub email: Option<String>,
    pub username: Option<String>,
}

impl ProjectionQuery {
    /// Every row
    pub fn all() -> Self {
        Self::default()
    }

    /// Active rows only
    pub fn active() -> Self {
        Self {
            is_active: Some(true),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn matches(&self, row: &UserProjection) -> bool {
        self.is_active.map_or(true, |active| row.is_active == active)
            && self.email.as_deref().map_or(true, |email| row.email == email)
            && self
                .username
                .as_deref()
                .map_or(true, |username| row.username == username)
    }
}

/// Projection errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// The log and the read model disagree; never repaired automatically
    #[error("Consistency violation for user {user_id} on {event_type}: {reason}")]
    ConsistencyViolation {
        user_id: Uuid,
        event_type: &'static str,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ProjectionError {
    fn violation(user_id: Uuid, event: &UserEvent, reason: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            user_id,
            event_type: event.event_type(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn created(user_id: Uuid) -> UserEvent {
        UserEvent::UserCreated {
            user_id,
            email: "a@x.com".to_string(),
            username: "bob".to_string(),
            created_at: at(0),
        }
    }

    #[test]
    fn test_created_inserts_active_row() {
        let user_id = Uuid::new_v4();

        let row = UserProjection::merge(None, 1, &created(user_id)).unwrap();

        assert_eq!(row.id, user_id);
        assert_eq!(row.email, "a@x.com");
        assert_eq!(row.created_at, at(0));
        assert_eq!(row.updated_at, None);
        assert!(row.is_active);
        assert_eq!(row.version, 1);
    }

    #[test]
    fn test_updated_keeps_created_at_and_status() {
        let user_id = Uuid::new_v4();
        let row = UserProjection::merge(None, 1, &created(user_id)).unwrap();
        let row = UserProjection::merge(
            Some(row),
            2,
            &UserEvent::UserDeactivated {
                user_id,
                deactivated_at: at(5),
            },
        )
        .unwrap();

        let row = UserProjection::merge(
            Some(row),
            3,
            &UserEvent::UserUpdated {
                user_id,
                email: "b@x.com".to_string(),
                username: "bob2".to_string(),
                updated_at: at(9),
            },
        )
        .unwrap();

        assert_eq!(row.email, "b@x.com");
        assert_eq!(row.username, "bob2");
        assert_eq!(row.created_at, at(0));
        assert_eq!(row.updated_at, Some(at(9)));
        assert!(!row.is_active);
        assert_eq!(row.version, 3);
    }

    #[test]
    fn test_deactivated_keeps_identity_fields() {
        let user_id = Uuid::new_v4();
        let row = UserProjection::merge(None, 1, &created(user_id)).unwrap();

        let row = UserProjection::merge(
            Some(row),
            2,
            &UserEvent::UserDeactivated {
                user_id,
                deactivated_at: at(3),
            },
        )
        .unwrap();

        assert!(!row.is_active);
        assert_eq!(row.updated_at, Some(at(3)));
        assert_eq!(row.email, "a@x.com");
        assert_eq!(row.username, "bob");
    }

    #[test]
    fn test_merge_is_idempotent_for_same_event() {
        let user_id = Uuid::new_v4();
        let row = UserProjection::merge(None, 1, &created(user_id)).unwrap();
        let event = UserEvent::UserUpdated {
            user_id,
            email: "b@x.com".to_string(),
            username: "bob2".to_string(),
            updated_at: at(1),
        };

        let once = UserProjection::merge(Some(row), 2, &event).unwrap();
        let twice = UserProjection::merge(Some(once.clone()), 2, &event).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_update_without_row_is_consistency_violation() {
        let event = UserEvent::UserUpdated {
            user_id: Uuid::new_v4(),
            email: "b@x.com".to_string(),
            username: "bob2".to_string(),
            updated_at: at(1),
        };

        let result = UserProjection::merge(None, 1, &event);

        assert!(matches!(
            result,
            Err(ProjectionError::ConsistencyViolation {
                event_type: "UserUpdated",
                ..
            })
        ));
    }

    #[test]
    fn test_created_past_head_is_consistency_violation() {
        let user_id = Uuid::new_v4();
        let row = UserProjection::merge(None, 1, &created(user_id)).unwrap();

        let result = UserProjection::merge(Some(row), 2, &created(user_id));

        assert!(matches!(
            result,
            Err(ProjectionError::ConsistencyViolation { .. })
        ));
    }

    #[test]
    fn test_query_matches() {
        let row = UserProjection::merge(None, 1, &created(Uuid::new_v4())).unwrap();

        assert!(ProjectionQuery::all().matches(&row));
        assert!(ProjectionQuery::active().matches(&row));
        assert!(ProjectionQuery::all().with_email("a@x.com").matches(&row));
        assert!(!ProjectionQuery::all().with_email("z@x.com").matches(&row));
        assert!(!ProjectionQuery::active().with_username("alice").matches(&row));

        let inactive = UserProjection {
            is_active: false,
            ..row
        };
        assert!(!ProjectionQuery::active().matches(&inactive));
    }
}
