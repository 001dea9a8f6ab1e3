//! Application configuration loaded from environment variables.

use std::time::Duration;

use research_funding::{Identity, RetryPolicy};

use crate::errors::{CliError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Default invoker identity (hex); `--caller` overrides it
    pub caller: Option<Identity>,
    /// How hard to retry operations that lost a concurrent update race
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./research_funding.db".to_string()),
            caller: match env_var("CALLER_ID") {
                Ok(hex) => Some(
                    hex.parse()
                        .map_err(|e| CliError::Config(format!("Invalid CALLER_ID: {e}")))?,
                ),
                Err(_) => None,
            },
            retry: RetryPolicy {
                max_attempts: env_var("RETRY_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .map_err(|_| CliError::Config("Invalid RETRY_MAX_ATTEMPTS".to_string()))?,
                backoff: Duration::from_millis(
                    env_var("RETRY_BACKOFF_MS")
                        .unwrap_or_else(|_| "25".to_string())
                        .parse()
                        .map_err(|_| CliError::Config("Invalid RETRY_BACKOFF_MS".to_string()))?,
                ),
            },
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| CliError::Config(format!("Missing env var: {key}")))
}
