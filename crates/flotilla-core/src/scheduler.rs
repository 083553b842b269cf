// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic convergence scheduling.
//!
//! Runs the converger on a timer and fans its three output sets out to the
//! collaborator capabilities. A failed tick is logged and the loop keeps
//! going; the engine's idempotence means the next tick reconverges.
//!
//! The loop never overlaps runs: the next tick is not armed until the
//! previous one finishes. Cluster-wide serialization (one engine at a time)
//! is the caller's job, typically via leader election.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::convergence::{ConvergenceOutputs, KeyWithSchedulingInfo, LrpConverger, StartRequest};
use crate::error::Result;
use crate::models::{ActualLrpKey, CellSet};

/// Supplies the cell membership snapshot for each run.
#[async_trait]
pub trait CellsProvider: Send + Sync {
    /// Current set of live cell identifiers.
    async fn cells(&self) -> Result<CellSet>;
}

/// Fixed membership view, for deployments where the cell set is wired in by
/// configuration, and for tests.
#[derive(Debug, Clone)]
pub struct StaticCellsProvider {
    cells: CellSet,
}

impl StaticCellsProvider {
    /// Wrap a fixed membership view.
    pub fn new(cells: CellSet) -> Self {
        Self { cells }
    }
}

#[async_trait]
impl CellsProvider for StaticCellsProvider {
    async fn cells(&self) -> Result<CellSet> {
        Ok(self.cells.clone())
    }
}

/// Receives start requests for placement.
#[async_trait]
pub trait AuctionRequester: Send + Sync {
    /// Submit the aggregated start requests of one run.
    async fn request_starts(&self, requests: &[StartRequest]) -> Result<()>;
}

/// Receives keys whose hosting cell has disappeared.
#[async_trait]
pub trait MissingCellHandler: Send + Sync {
    /// Report replicas needing re-placement, with their scheduling payloads.
    async fn handle_missing(&self, keys: &[KeyWithSchedulingInfo]) -> Result<()>;
}

/// Receives keys that should no longer exist.
#[async_trait]
pub trait RetirementHandler: Send + Sync {
    /// Retire the given replica keys.
    async fn retire(&self, keys: &[ActualLrpKey]) -> Result<()>;
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between convergence runs.
    pub poll_interval: Duration,
    /// Optional per-run deadline; a run that has not reached its mutation
    /// phase by then aborts with no side effects.
    pub run_deadline: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            run_deadline: None,
        }
    }
}

/// Drives periodic convergence runs and dispatches their outputs.
pub struct ConvergenceScheduler {
    converger: LrpConverger,
    cells: Arc<dyn CellsProvider>,
    auctioneer: Arc<dyn AuctionRequester>,
    missing_cells: Arc<dyn MissingCellHandler>,
    retirer: Arc<dyn RetirementHandler>,
    config: SchedulerConfig,
    shutdown: Arc<Notify>,
}

impl ConvergenceScheduler {
    /// Create a scheduler over `converger` with the given collaborators.
    pub fn new(
        converger: LrpConverger,
        cells: Arc<dyn CellsProvider>,
        auctioneer: Arc<dyn AuctionRequester>,
        missing_cells: Arc<dyn MissingCellHandler>,
        retirer: Arc<dyn RetirementHandler>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            converger,
            cells,
            auctioneer,
            missing_cells,
            retirer,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the convergence loop until shutdown is signalled.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "convergence scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("convergence scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "convergence run failed");
                    }
                }
            }
        }
    }

    /// Drive one convergence run and dispatch its outputs.
    ///
    /// Exposed so embedders can converge on their own cadence or trigger an
    /// immediate run.
    pub async fn run_once(&self) -> Result<ConvergenceOutputs> {
        let cells = self.cells.cells().await?;
        let now = Utc::now();
        // A deadline too large for chrono is as good as no deadline.
        let deadline = self
            .config
            .run_deadline
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now + d);

        let outputs = self.converger.converge(&cells, now, deadline).await?;
        if outputs.is_empty() {
            debug!("nothing to dispatch");
            return Ok(outputs);
        }

        if !outputs.start_requests.is_empty() {
            self.auctioneer.request_starts(&outputs.start_requests).await?;
        }
        if !outputs.keys_with_missing_cells.is_empty() {
            self.missing_cells
                .handle_missing(&outputs.keys_with_missing_cells)
                .await?;
        }
        if !outputs.keys_to_retire.is_empty() {
            self.retirer.retire(&outputs.keys_to_retire).await?;
        }

        Ok(outputs)
    }
}
