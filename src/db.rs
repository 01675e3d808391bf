//! Database connection and pool management.
//!
//! Builds the SeaORM pool (SQLite or Postgres, chosen by the URL scheme) and
//! applies pending migrations before the service starts using it.

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Initializes a database connection pool with the given configuration.
///
/// Transient connection failures are retried with exponential backoff,
/// starting at 100ms, for up to five attempts.
///
/// # Examples
///
/// ```no_run
/// use hookwatch::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::default();
///     let db = init_pool(&config).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let options = connect_options(cfg)?;
    let db = connect_with_retry(options).await?;
    log::info!(
        "Database pool ready ({:?} backend, max {} connections)",
        db.get_database_backend(),
        cfg.db_max_connections
    );
    Ok(db)
}

fn connect_options(cfg: &AppConfig) -> Result<ConnectOptions, DatabaseError> {
    let url = cfg.database_url.trim();
    if url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        });
    }

    let mut options = ConnectOptions::new(url);
    options
        .max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    Ok(options)
}

async fn connect_with_retry(options: ConnectOptions) -> Result<DatabaseConnection, DatabaseError> {
    let mut delay = Duration::from_millis(100);
    let mut attempt = 1;
    loop {
        match Database::connect(options.clone()).await {
            Ok(db) => return Ok(db),
            Err(source) if attempt >= MAX_CONNECT_ATTEMPTS => {
                log::error!("Giving up on database after {} attempts: {}", attempt, source);
                return Err(DatabaseError::ConnectionFailed { source });
            }
            Err(err) => {
                log::warn!(
                    "Database connection attempt {}/{} failed: {}; next try in {:?}",
                    attempt,
                    MAX_CONNECT_ATTEMPTS,
                    err,
                    delay
                );
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Applies every pending migration.
pub async fn migrate(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("Failed to apply database migrations")?;
    log::info!("Database schema is up to date");
    Ok(())
}

/// Verifies the connection is alive with a trivial query.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}
