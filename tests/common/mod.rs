//! Common test utilities
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use user_es::domain::FixedClock;
use user_es::CommandContext;

/// Fixed instant `seconds` after the test epoch
pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap() + Duration::seconds(seconds)
}

/// Command context whose clock is frozen at `at(seconds)`
pub fn context_at(seconds: i64) -> CommandContext {
    CommandContext::new().with_clock(FixedClock(at(seconds)))
}

/// Setup test database - connect and apply the schema.
///
/// Tests run in parallel against one database, so each test works on its own
/// fresh user ids instead of truncating shared tables.
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    user_es::db::apply_schema(&pool)
        .await
        .expect("Failed to apply schema");

    pool
}
