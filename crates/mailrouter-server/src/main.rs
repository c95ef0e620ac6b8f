//! MailRouter - routing engine entry point

mod http;
mod relay;

use anyhow::{Context, Result};
use mailrouter_common::config::{Config, LoggingConfig};
use mailrouter_core::MessageProcessor;
use mailrouter_storage::{DatabasePool, KvStore, MemoryKvStore, SqliteKvStore};
use relay::SmtpRelay;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    init_logging(&config.logging);

    info!("Starting MailRouter...");

    // Initialize key-value store
    let (store, purge_handle) = init_store(&config).await?;

    // Initialize routing pipeline
    let processor = Arc::new(MessageProcessor::new(&config, store.clone())?);
    let relay = Arc::new(SmtpRelay::new(&config.relay)?);
    info!(
        "Forwarding through SMTP relay {}:{}",
        config.relay.host, config.relay.port
    );

    let state = Arc::new(http::AppState {
        processor,
        relay,
        store,
    });
    let app = http::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    info!("Ingest API listening on {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = purge_handle {
        handle.abort();
    }

    info!("MailRouter shutdown complete");

    Ok(())
}

async fn init_store(
    config: &Config,
) -> Result<(Arc<dyn KvStore>, Option<tokio::task::JoinHandle<()>>)> {
    if config.database.backend == "memory" {
        info!("Using in-memory key-value store");
        return Ok((Arc::new(MemoryKvStore::new()), None));
    }

    let db_pool = DatabasePool::new(&config.database)
        .await
        .map_err(|e| {
            error!(code = e.code(), "Database connection failed: {}", e);
            e
        })?;
    info!("Database connection established");

    db_pool.migrate().await.map_err(|e| {
        error!(code = e.code(), "Database migration failed: {}", e);
        e
    })?;
    info!("Database migrations completed");

    let store = SqliteKvStore::new(db_pool);

    // Expired entries are invisible to readers; this only reclaims space
    let purge_handle = {
        let store = store.clone();
        let period = Duration::from_secs(config.database.purge_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = store.purge_expired().await {
                    error!("Failed to purge expired entries: {}", e);
                }
            }
        })
    };

    Ok((Arc::new(store), Some(purge_handle)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},mailrouter=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
