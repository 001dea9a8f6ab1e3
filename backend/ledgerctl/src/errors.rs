//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Ledger(#[from] research_funding::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
