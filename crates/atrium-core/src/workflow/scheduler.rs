// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic timeout tick.
//!
//! Wakes every `poll_interval` and runs [`WorkflowEngine::process_timeouts`]
//! for the current time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info};

use super::engine::WorkflowEngine;
use super::timeouts::TimeoutReport;
use crate::error::Result;

/// Timeout scheduler configuration.
#[derive(Debug, Clone)]
pub struct TimeoutSchedulerConfig {
    /// How often to scan for overdue approvals
    pub poll_interval: Duration,
    /// Maximum approvals handled per scan
    pub batch_size: i64,
}

impl Default for TimeoutSchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Background task driving workflow timeouts and reminders.
pub struct TimeoutScheduler {
    engine: Arc<WorkflowEngine>,
    config: TimeoutSchedulerConfig,
    shutdown: Arc<Notify>,
}

impl TimeoutScheduler {
    pub fn new(engine: Arc<WorkflowEngine>, config: TimeoutSchedulerConfig) -> Self {
        Self {
            engine,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the scheduler loop until shutdown is signalled.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Timeout scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Timeout scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Failed to process workflow timeouts");
                    }
                }
            }
        }
    }

    /// Run one scan now.
    pub async fn tick(&self) -> Result<TimeoutReport> {
        self.engine
            .process_timeouts(Utc::now(), self.config.batch_size)
            .await
    }
}
