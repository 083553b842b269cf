// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flotilla Core - LRP Convergence Engine
//!
//! Reference runner: loads configuration, connects to the store, runs the
//! convergence loop on a timer, and logs dispatched outputs. Real
//! deployments embed [`flotilla_core::scheduler::ConvergenceScheduler`] and
//! plug in their own auction, missing-cell, and retirement clients.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{error, info};

use flotilla_core::config::Config;
use flotilla_core::convergence::{KeyWithSchedulingInfo, LrpConverger, StartRequest};
use flotilla_core::metrics::TracingMetricsSender;
use flotilla_core::models::{ActualLrpKey, CellSet};
use flotilla_core::persistence::{LrpStore, PostgresLrpStore, SqliteLrpStore};
use flotilla_core::scheduler::{
    AuctionRequester, ConvergenceScheduler, MissingCellHandler, RetirementHandler, SchedulerConfig,
    StaticCellsProvider,
};
use flotilla_core::{EngineError, migrations};

/// Collaborator stand-ins that log what a real client would dispatch.
struct LogDispatch;

#[async_trait]
impl AuctionRequester for LogDispatch {
    async fn request_starts(
        &self,
        requests: &[StartRequest],
    ) -> std::result::Result<(), EngineError> {
        for request in requests {
            info!(
                process_guid = %request.process_guid,
                indices = ?request.indices,
                "start request"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl MissingCellHandler for LogDispatch {
    async fn handle_missing(
        &self,
        keys: &[KeyWithSchedulingInfo],
    ) -> std::result::Result<(), EngineError> {
        for key in keys {
            info!(
                process_guid = %key.key.process_guid,
                index = key.key.index,
                "replica lost its cell"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl RetirementHandler for LogDispatch {
    async fn retire(&self, keys: &[ActualLrpKey]) -> std::result::Result<(), EngineError> {
        for key in keys {
            info!(
                process_guid = %key.process_guid,
                index = key.index,
                domain = %key.domain,
                "retiring replica"
            );
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flotilla_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Flotilla Core");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        converge_interval_secs = config.converge_interval.as_secs(),
        stale_unclaimed_secs = config.stale_unclaimed_after.as_secs(),
        max_restarts = config.default_max_restarts,
        cells = config.cells.len(),
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let store: Arc<dyn LrpStore> = if config.database_url.starts_with("sqlite:") {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await?;
        migrations::run_sqlite(&pool).await?;
        Arc::new(SqliteLrpStore::new(pool))
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        migrations::run_postgres(&pool).await?;
        Arc::new(PostgresLrpStore::new(pool))
    };
    info!("Database ready");

    let converger = LrpConverger::new(
        store,
        Arc::new(TracingMetricsSender),
        config.convergence_settings(),
    );
    let cells = StaticCellsProvider::new(CellSet::from_ids(config.cells.clone()));
    let scheduler = ConvergenceScheduler::new(
        converger,
        Arc::new(cells),
        Arc::new(LogDispatch),
        Arc::new(LogDispatch),
        Arc::new(LogDispatch),
        SchedulerConfig {
            poll_interval: config.converge_interval,
            run_deadline: config.run_deadline,
        },
    );
    let shutdown = scheduler.shutdown_handle();

    let scheduler_handle = tokio::spawn(scheduler.run());

    info!("Flotilla Core initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.notify_one();
    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task panicked: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}
