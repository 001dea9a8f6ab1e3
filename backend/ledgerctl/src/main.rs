//! Research funding ledger — operator CLI.
//!
//! Runs one ledger operation against a SQLite-backed record store and prints
//! the result as JSON on stdout. Logs go to stderr (`RUST_LOG` controls
//! verbosity). Ledger failures print `{kind, code, error}` and exit 1.

mod commands;
mod config;
mod db;
mod errors;
mod events;
mod output;

use clap::Parser;
use research_funding::Identity;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use commands::Command;
use config::Config;
use errors::CliError;
use output::ErrorResponse;

#[derive(Debug, Parser)]
#[command(name = "ledgerctl", version, about = "Research funding ledger CLI")]
struct Cli {
    /// Identity (64 hex chars) invoking mutating commands; overrides CALLER_ID.
    #[arg(long, global = true)]
    caller: Option<Identity>,

    /// SQLite database; overrides DATABASE_URL.
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging on stderr so stdout stays pure JSON.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    if let Some(database) = cli.database {
        config.database_url = database;
    }

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;
    let store = db::SqliteStore::new(pool);
    info!(database = %config.database_url, "store ready");

    let caller = cli.caller.or(config.caller);
    match commands::run(cli.command, &store, caller, config.retry).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(CliError::Ledger(e)) => {
            error!(kind = e.kind().as_str(), "operation failed: {e}");
            println!("{}", serde_json::to_string_pretty(&ErrorResponse::from(&e))?);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
