//! Database module
//!
//! Database connection and schema utilities for the Postgres backend.

use sqlx::{Executor, PgPool};

/// Schema for the event store and the read model
pub const SCHEMA: &str = include_str!("../migrations/0001_user_event_store.sql");

const REQUIRED_TABLES: [&str; 3] = ["user_streams", "user_events", "user_projections"];

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Create missing tables; safe to run repeatedly
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    // A plain &str runs through the simple query protocol, which accepts
    // several statements at once.
    pool.execute(SCHEMA).await?;

    tracing::info!("Event store schema applied");
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
