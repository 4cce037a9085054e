// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Atrium Core - workflow timeout ticker
//!
//! Opens the database, activates the configured playbook (if any) and runs
//! the workflow timeout scheduler until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use atrium_core::config::Config;
use atrium_core::persistence::SqliteStore;
use atrium_core::playbook::PlaybookLoader;
use atrium_core::workflow::{TimeoutScheduler, WorkflowEngine};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("atrium_core=info")),
        )
        .init();

    info!("Starting Atrium Core");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        default_tenant = %config.default_tenant,
        timeout_tick_secs = config.timeout_tick.as_secs(),
        commit_attempts = config.commit_attempts,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
    info!("Database ready");

    if let Some(path) = &config.playbook_path {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read playbook {}", path.display()))?;
        let loader = PlaybookLoader::new(store.clone());
        let playbook = loader.ensure_active(&raw, None).await?;
        info!(
            playbook_id = %playbook.playbook_id(),
            version = %playbook.version(),
            checksum = %playbook.checksum(),
            "Global playbook active"
        );
    }

    let engine = Arc::new(
        WorkflowEngine::new(store.clone(), store.clone())
            .with_commit_attempts(config.commit_attempts),
    );
    let scheduler = TimeoutScheduler::new(engine, config.timeout_scheduler());
    let shutdown = scheduler.shutdown_handle();
    let scheduler_handle = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.notify_one();
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Timeout scheduler task failed");
    }

    store.pool().close().await;
    info!("Shutdown complete");

    Ok(())
}
