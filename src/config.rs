//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;

use crate::domain::{CommandContext, InactiveUpdatePolicy};

/// How `save` decides the expected stream version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyMode {
    /// New aggregates require that no stream exists; loaded aggregates require
    /// the stream to still be at the version they were loaded at.
    #[default]
    Optimistic,
    /// Only creation is guarded; loaded aggregates append to whatever is there.
    CreateIfAbsent,
}

impl FromStr for ConcurrencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimistic" => Ok(Self::Optimistic),
            "create_if_absent" => Ok(Self::CreateIfAbsent),
            other => Err(format!("unknown concurrency mode '{other}'")),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Environment (development, production)
    pub environment: String,

    pub concurrency_mode: ConcurrencyMode,

    /// Whether deactivated users accept `update_info`
    pub inactive_user_updates: InactiveUpdatePolicy,

    /// Retries on persistence conflicts in `UserRepository::execute`
    pub save_max_retries: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?;

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let concurrency_mode = parse_or(&lookup, "CONCURRENCY_MODE", ConcurrencyMode::default())?;

        let inactive_user_updates = parse_or(
            &lookup,
            "INACTIVE_USER_UPDATES",
            InactiveUpdatePolicy::default(),
        )?;

        let save_max_retries = parse_or(&lookup, "SAVE_MAX_RETRIES", 3)?;

        Ok(Self {
            database_url,
            database_max_connections,
            environment,
            concurrency_mode,
            inactive_user_updates,
            save_max_retries,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Command context carrying the configured policies and the wall clock
    pub fn command_context(&self) -> CommandContext {
        CommandContext::new().with_inactive_updates(self.inactive_user_updates)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
