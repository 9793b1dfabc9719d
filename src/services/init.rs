//! Initialization helpers for the application:
//! - database connection + migrations
//! - optional in-process queue worker poll loop
//!
//! This module centralizes bits that would otherwise live in `main.rs`.

use std::{path::Path, sync::Arc};

use anyhow::Result;

use crate::config::Config;
use crate::services::worker::QueueWorker;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password)
/// components. Falls back to removing everything before '@' or returning
/// "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Initialize SQLite database connection and run migrations.
///
/// Creates the parent directory for the database file (if applicable),
/// opens a connection pool using `create_if_missing(true)` and runs migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    // Extract the file path from the database URL
    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Spawn the optional in-process queue worker poll loop.
///
/// Most deployments drive delivery through an external scheduler hitting
/// `POST /queue/worker` every couple of seconds; this loop exists for
/// single-box setups without one. It runs the exact same batch function as
/// the HTTP trigger. Returns a `JoinHandle` so the caller can await shutdown;
/// the worker listens for a shutdown notification via a broadcast channel.
pub fn spawn_queue_worker(
    worker: Arc<QueueWorker>,
    poll_interval_seconds: u64,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                tracing::info!("Queue worker poll loop received shutdown signal");
                break;
            }

            match worker.process_batch().await {
                Ok(outcome) if outcome.total > 0 => {
                    tracing::debug!(
                        "Poll loop batch done: sent={}, failed={}, retrying={}",
                        outcome.sent,
                        outcome.failed,
                        outcome.retrying
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Queue worker poll iteration failed: {:?}", e);
                }
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Queue worker poll loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs(poll_interval_seconds)) => {}
            }
        }
    })
}
