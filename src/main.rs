//! # hookwatch entry point
//!
//! `serve` runs the HTTP API with the periodic webhook checker; `check-once`
//! runs a single reconciliation pass and prints its report.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use hookwatch::{config::ConfigLoader, db, server, telemetry};

#[derive(Parser)]
#[command(name = "hookwatch", version)]
#[command(about = "Reconciles recorded GitHub webhooks with their live configuration")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, Default)]
enum Command {
    /// Serve the HTTP API and run the periodic checker (default)
    #[default]
    Serve,
    /// Run one reconciliation pass and exit
    CheckOnce,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    telemetry::init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let pool = db::init_pool(&config).await?;
    db::migrate(&pool).await?;

    match cli.command.unwrap_or_default() {
        Command::Serve => {
            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "Failed to listen for shutdown signal");
                    return;
                }
                tracing::info!("Shutdown signal received");
                signal_token.cancel();
            });

            server::run_server(config, pool, shutdown).await
        }
        Command::CheckOnce => {
            let state = server::AppState::new(Arc::new(config), pool)?;
            let report = state
                .checker
                .run_pass()
                .await
                .context("Webhook check pass failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
