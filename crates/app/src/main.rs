//! Storefront CLI

use std::{process, sync::Arc};

use storefront_app::{context::AppContext, database, notifications::LogPublisher};
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{Cli, Command, SweepArgs};

mod config;
mod observability;
mod shutdown;

#[tokio::main]
pub async fn main() {
    let cli = Cli::load().unwrap_or_else(|error| error.exit());

    if let Err(error) = observability::init_subscriber(&cli.logging) {
        eprintln!("failed to initialise logging: {error}");

        process::exit(1);
    }

    if let Err(error) = run(cli).await {
        error!("{error}");

        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Migrate => migrate(&cli.database.database_url).await,
        Command::Sweep(args) => sweep(&cli.database.database_url, args).await,
    }
}

async fn migrate(database_url: &str) -> Result<(), String> {
    let pool = database::connect(database_url)
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

    database::migrate(&pool)
        .await
        .map_err(|error| format!("failed to apply migrations: {error}"))?;

    info!("database schema is up to date");

    Ok(())
}

async fn sweep(database_url: &str, args: SweepArgs) -> Result<(), String> {
    let settings = args.engine.settings(&args.cache);

    let app = AppContext::connect(
        database_url,
        args.cache.redis_url.as_deref(),
        Arc::new(LogPublisher),
        settings,
    )
    .await
    .map_err(|error| format!("failed to initialize app context: {error}"))?;

    let sweeper = app.sweeper(settings.sweep_interval);

    if args.once {
        let report = sweeper.run_once().await;

        info!(?report, "single sweep finished");

        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(error) = shutdown::listen(shutdown_tx).await {
            error!("failed to listen for shutdown signal: {error}");
        }
    });

    sweeper.run(shutdown_rx).await;

    Ok(())
}
