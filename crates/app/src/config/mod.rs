//! Storefront configuration

use clap::{Parser, Subcommand};

use crate::config::{
    cache::CacheConfig, db::DatabaseConfig, engine::EngineConfig, logging::LoggingConfig,
};

pub(crate) mod cache;
pub(crate) mod db;
pub(crate) mod engine;
pub(crate) mod logging;

/// Storefront pricing and reservation engine
#[derive(Debug, Parser)]
#[command(name = "storefront", about = "Storefront engine CLI", long_about = None)]
pub(crate) struct Cli {
    /// Logging output settings.
    #[command(flatten)]
    pub logging: LoggingConfig,

    /// Application database settings.
    #[command(flatten)]
    pub database: DatabaseConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create or update the database schema.
    Migrate,

    /// Run the background sweep.
    Sweep(SweepArgs),
}

#[derive(Debug, clap::Args)]
pub(crate) struct SweepArgs {
    /// Run a single sweep and exit.
    #[arg(long)]
    pub once: bool,

    /// Price cache settings.
    #[command(flatten)]
    pub cache: CacheConfig,

    /// Engine tuning.
    #[command(flatten)]
    pub engine: EngineConfig,
}

impl Cli {
    /// Load configuration from environment and CLI arguments
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be parsed
    pub(crate) fn load() -> Result<Self, clap::Error> {
        // Load .env file if present (ignore if missing)
        _ = dotenvy::dotenv();

        Self::try_parse()
    }
}
