//! Projection Rebuild Tool
//!
//! Refolds user event streams into the read model.
//!
//! Run with: cargo run --bin rebuild_projections -- [--user <uuid>] [--verify] [--apply-schema]

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use user_es::{db, Config, EventStore, PgEventStore, UserRepository};

/// Initialize tracing/logging
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "user_es=debug,rebuild_projections=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.is_production() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config);

    let args: Vec<String> = std::env::args().collect();
    let user_id: Option<Uuid> = args
        .iter()
        .position(|a| a == "--user")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.parse())
        .transpose()?;
    let verify_only = args.iter().any(|a| a == "--verify");
    let apply_schema = args.iter().any(|a| a == "--apply-schema");

    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;
    if apply_schema {
        db::apply_schema(&pool).await?;
    }
    if !db::check_schema(&pool).await? {
        return Err(anyhow::anyhow!(
            "Event store schema incomplete; rerun with --apply-schema"
        ));
    }

    let repository = UserRepository::from_config(PgEventStore::new(pool), &config);

    match (user_id, verify_only) {
        (Some(user_id), true) => {
            let agrees = repository.verify_projection(user_id).await?;
            tracing::info!(user_id = %user_id, agrees, "Projection verified");
        }
        (Some(user_id), false) => {
            repository.rebuild_projection(user_id).await?;
        }
        (None, true) => {
            let mut disagreeing = 0usize;
            let stream_ids = repository.store().stream_ids().await?;
            for user_id in &stream_ids {
                if !repository.verify_projection(*user_id).await? {
                    disagreeing += 1;
                }
            }
            tracing::info!(
                streams = stream_ids.len(),
                disagreeing,
                "Projections verified"
            );
        }
        (None, false) => {
            let summary = repository.rebuild_all_projections().await?;
            if !summary.failed.is_empty() {
                repository.store().pool().close().await;
                return Err(anyhow::anyhow!(
                    "{} of {} streams could not be rebuilt",
                    summary.failed.len(),
                    summary.rebuilt + summary.failed.len()
                ));
            }
        }
    }

    repository.store().pool().close().await;
    Ok(())
}
