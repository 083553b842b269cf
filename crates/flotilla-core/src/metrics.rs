// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metrics emission.
//!
//! The metrics sender is an injected capability, not a process-wide global:
//! the executor is handed a [`MetricsSender`] and calls it once per run.
//! The default sender writes structured events via `tracing`;
//! [`RecordingMetricsSender`] captures emissions for tests and embedders
//! that want to scrape values directly.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::convergence::planner::PlanStats;
use crate::models::DomainSet;

/// Sum of declared instances over all desired LRPs.
pub const LRPS_DESIRED: &str = "LRPsDesired";
/// Observed Claimed records.
pub const LRPS_CLAIMED: &str = "LRPsClaimed";
/// Observed Unclaimed records.
pub const LRPS_UNCLAIMED: &str = "LRPsUnclaimed";
/// Observed Running records.
pub const LRPS_RUNNING: &str = "LRPsRunning";
/// Observed Crashed records (non-evacuating).
pub const CRASHED_ACTUAL_LRPS: &str = "CrashedActualLRPs";
/// Desired LRPs stuck with a non-restartable crash.
pub const CRASHING_DESIRED_LRPS: &str = "CrashingDesiredLRPs";
/// Declared indices with no non-evacuating record.
pub const LRPS_MISSING: &str = "LRPsMissing";
/// Keys selected for retirement this run.
pub const LRPS_EXTRA: &str = "LRPsExtra";
/// Counter bumped once per completed convergence run.
pub const CONVERGENCE_RUNS: &str = "ConvergenceLRPRuns";
/// Wall-clock duration of the last run, in nanoseconds.
pub const CONVERGENCE_DURATION: &str = "ConvergenceLRPDuration";
/// Prefix of the per-domain freshness gauges.
pub const DOMAIN_PREFIX: &str = "Domain.";

/// Dimensionless gauge unit.
pub const UNIT_METRIC: &str = "Metric";
/// Nanosecond gauge unit.
pub const UNIT_NANOS: &str = "nanos";

/// Capability for publishing named gauges and counters.
///
/// Both calls must be non-blocking; the engine invokes them from the
/// convergence path.
pub trait MetricsSender: Send + Sync {
    /// Publish a gauge value.
    fn set_gauge(&self, name: &str, value: u64, unit: &str);

    /// Bump a counter by one.
    fn increment_counter(&self, name: &str);
}

/// Default sender that emits structured `tracing` events on the `metrics`
/// target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSender;

impl MetricsSender for TracingMetricsSender {
    fn set_gauge(&self, name: &str, value: u64, unit: &str) {
        tracing::info!(target: "metrics", metric = name, value, unit, "gauge");
    }

    fn increment_counter(&self, name: &str) {
        tracing::info!(target: "metrics", metric = name, "counter");
    }
}

/// In-memory sender that records the latest gauge values and counter totals.
#[derive(Debug, Default)]
pub struct RecordingMetricsSender {
    gauges: Mutex<HashMap<String, (u64, String)>>,
    counters: Mutex<HashMap<String, u64>>,
}

impl RecordingMetricsSender {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value of `name`, if it was ever set.
    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges.lock().unwrap().get(name).map(|(v, _)| *v)
    }

    /// Unit the gauge `name` was last published with.
    pub fn gauge_unit(&self, name: &str) -> Option<String> {
        self.gauges.lock().unwrap().get(name).map(|(_, u)| u.clone())
    }

    /// Current total of counter `name` (zero if never bumped).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl MetricsSender for RecordingMetricsSender {
    fn set_gauge(&self, name: &str, value: u64, unit: &str) {
        self.gauges
            .lock()
            .unwrap()
            .insert(name.to_string(), (value, unit.to_string()));
    }

    fn increment_counter(&self, name: &str) {
        *self.counters.lock().unwrap().entry(name.to_string()).or_insert(0) += 1;
    }
}

/// Publish the per-run gauge set computed by the planner.
pub fn emit_lrp_gauges(
    sender: &dyn MetricsSender,
    stats: &PlanStats,
    domains: &DomainSet,
    now_ns: i64,
) {
    sender.set_gauge(LRPS_DESIRED, stats.lrps_desired, UNIT_METRIC);
    sender.set_gauge(LRPS_CLAIMED, stats.claimed, UNIT_METRIC);
    sender.set_gauge(LRPS_UNCLAIMED, stats.unclaimed, UNIT_METRIC);
    sender.set_gauge(LRPS_RUNNING, stats.running, UNIT_METRIC);
    sender.set_gauge(CRASHED_ACTUAL_LRPS, stats.crashed_actuals, UNIT_METRIC);
    sender.set_gauge(CRASHING_DESIRED_LRPS, stats.crashing_desireds, UNIT_METRIC);
    sender.set_gauge(LRPS_MISSING, stats.missing, UNIT_METRIC);
    sender.set_gauge(LRPS_EXTRA, stats.extra, UNIT_METRIC);
    for name in domains.fresh_names(now_ns) {
        sender.set_gauge(&format!("{DOMAIN_PREFIX}{name}"), 1, UNIT_METRIC);
    }
}
