//! Outpost outbox relay service.
//!
//! Main entry point. Initializes logging and configuration, prepares the
//! database, starts the relay processor, and coordinates graceful shutdown.

mod config;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use config::Config;
use outpost_core::{storage::Storage, RealClock};
use outpost_relay::{
    processor::RelayProcessor, publisher::RedisStreamPublisher, store::PostgresOutboxStore,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config);

    info!("Starting Outpost outbox relay service");
    info!(
        database_url = %config.database_url_masked(),
        redis_url = %config.redis_url,
        batch_size = config.relay_batch_size,
        "Configuration loaded"
    );

    // Create database connection pool
    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    // Bootstrap schema
    run_migrations(&db_pool).await?;
    info!("Database schema ready");

    // Wire up the relay
    let storage = Arc::new(Storage::new(db_pool.clone()));
    let store = Arc::new(PostgresOutboxStore::new(storage));
    let publisher = Arc::new(
        RedisStreamPublisher::from_url(&config.redis_url)
            .context("Failed to create redis publisher")?,
    );

    let processor =
        RelayProcessor::new(store, publisher, config.to_relay_config(), Arc::new(RealClock));

    let token = CancellationToken::new();
    let relay_handle = processor.spawn(token.clone());
    info!("Outbox relay started");

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");

    // Cancelling the token is the sole stop signal; the handle bounds the
    // wait for the in-flight cycle.
    token.cancel();
    if let Err(e) = relay_handle.shutdown().await {
        error!(error = %e, "Relay did not stop cleanly");
    }

    // Close database connections
    db_pool.close().await;
    info!("Database connections closed");

    info!("Outpost shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing(config: &Config) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.rust_log))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                // Verify connection works
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Bootstraps the schema the relay and the sample producer rely on.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox (
            id BIGSERIAL PRIMARY KEY,
            topic TEXT NOT NULL,
            payload BYTEA NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create outbox table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id UUID PRIMARY KEY,
            description TEXT NOT NULL,
            due_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create tasks table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_outbox_pending
        ON outbox (id)
        WHERE status = 'pending'
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create outbox pending index")?;

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
