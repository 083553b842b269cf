// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Convergence runs.
//!
//! A run is a self-contained unit of work: load one consistent snapshot,
//! plan against it, apply the plan's store mutations in a fixed order, emit
//! metrics, and hand the three output sets back to the caller. Concurrent
//! runs are not supported; the caller serializes invocations (one leader,
//! one timer).
//!
//! The mutation phase applies sub-steps in this order: expired domains,
//! expired evacuating records, placeholder inserts, crash unclaims. Each
//! sub-step is independently idempotent, so a transient failure mid-phase is
//! tolerated and repaired by the next run. A consistency violation means a
//! concurrent writer and aborts the run instead.

pub mod planner;

pub use planner::{ConvergencePlan, Mutation, PlanStats, Snapshot};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::metrics::{self, MetricsSender};
use crate::models::{ActualLrpKey, CellSet, DomainSet};
use crate::persistence::LrpStore;

/// Tunables of the classification pass.
#[derive(Debug, Clone)]
pub struct ConvergenceSettings {
    /// How long an Unclaimed record may sit before it is considered overdue
    /// for auction.
    pub stale_unclaimed_after: Duration,
    /// Crash budget used when a desired LRP carries no override of its own.
    /// A crashed record above the budget is left for operator attention.
    pub default_max_restarts: i32,
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        Self {
            stale_unclaimed_after: Duration::from_secs(30),
            default_max_restarts: 3,
        }
    }
}

/// Indices of one workload to hand to the auction service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    /// Workload to start replicas for.
    pub process_guid: String,
    /// The desired LRP's opaque placement payload, copied at snapshot time.
    pub scheduling_info: Vec<u8>,
    /// Indices to start: sorted ascending, non-empty, no duplicates.
    pub indices: Vec<i32>,
}

/// A replica key paired with its workload's placement payload, for
/// re-placement after its cell disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyWithSchedulingInfo {
    /// The replica whose cell is gone.
    pub key: ActualLrpKey,
    /// The desired LRP's placement payload, copied at snapshot time.
    pub scheduling_info: Vec<u8>,
}

/// The three output sets of one convergence run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergenceOutputs {
    /// Start requests for the auction service.
    pub start_requests: Vec<StartRequest>,
    /// Keys requiring re-placement because their cell disappeared.
    pub keys_with_missing_cells: Vec<KeyWithSchedulingInfo>,
    /// Keys that should no longer exist.
    pub keys_to_retire: Vec<ActualLrpKey>,
}

impl ConvergenceOutputs {
    /// True when the run found nothing for any collaborator to do.
    pub fn is_empty(&self) -> bool {
        self.start_requests.is_empty()
            && self.keys_with_missing_cells.is_empty()
            && self.keys_to_retire.is_empty()
    }
}

/// Wall-clock nanoseconds since the epoch, saturating far past any TTL in
/// use.
pub fn unix_nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Executes convergence runs against a store.
pub struct LrpConverger {
    store: Arc<dyn LrpStore>,
    metrics: Arc<dyn MetricsSender>,
    settings: ConvergenceSettings,
}

impl LrpConverger {
    /// Create a converger over `store` that reports through `metrics`.
    pub fn new(
        store: Arc<dyn LrpStore>,
        metrics: Arc<dyn MetricsSender>,
        settings: ConvergenceSettings,
    ) -> Self {
        Self {
            store,
            metrics,
            settings,
        }
    }

    /// Run one convergence pass.
    ///
    /// `cells` is the immutable membership view for this run and `now` the
    /// wall-clock instant freshness and staleness are judged against. When
    /// `deadline` is given and has already passed once planning finishes,
    /// the run aborts before any mutation with no side effects and without
    /// bumping the run counter.
    pub async fn converge(
        &self,
        cells: &CellSet,
        now: DateTime<Utc>,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<ConvergenceOutputs> {
        let run_timer = Instant::now();
        let now_ns = unix_nanos(now);

        let (desired, actuals, domain_rows) = tokio::try_join!(
            self.store.desired_lrps(),
            self.store.actual_lrps(),
            self.store.domains(),
        )?;
        debug!(
            desired = desired.len(),
            actuals = actuals.len(),
            domains = domain_rows.len(),
            "loaded convergence snapshot"
        );

        let snapshot = Snapshot {
            desired,
            actuals,
            domains: DomainSet::from_rows(domain_rows),
            cells: cells.clone(),
        };
        let plan = planner::plan(&snapshot, now_ns, &self.settings);
        plan.verify()?;

        if let Some(deadline) = deadline
            && Utc::now() >= deadline
        {
            return Err(EngineError::DeadlineExceeded {
                deadline_ns: unix_nanos(deadline),
            });
        }

        self.apply(&plan, now_ns).await?;

        metrics::emit_lrp_gauges(self.metrics.as_ref(), &plan.stats, &snapshot.domains, now_ns);
        self.metrics.increment_counter(metrics::CONVERGENCE_RUNS);
        let elapsed = run_timer.elapsed();
        self.metrics.set_gauge(
            metrics::CONVERGENCE_DURATION,
            elapsed.as_nanos() as u64,
            metrics::UNIT_NANOS,
        );

        info!(
            starts = plan.start_requests.len(),
            missing_cells = plan.keys_with_missing_cells.len(),
            retires = plan.keys_to_retire.len(),
            mutations = plan.mutations.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "convergence run complete"
        );

        Ok(plan.into_outputs())
    }

    /// Apply the plan's mutations in the fixed sub-step order.
    async fn apply(&self, plan: &ConvergencePlan, now_ns: i64) -> Result<()> {
        for mutation in &plan.mutations {
            if let Mutation::DeleteDomain { name } = mutation {
                tolerate(self.store.delete_domain(name).await)?;
            }
        }
        for mutation in &plan.mutations {
            if let Mutation::DeleteEvacuating { key } = mutation {
                tolerate(self.store.delete_actual(key, true).await)?;
            }
        }
        for mutation in &plan.mutations {
            if let Mutation::InsertUnclaimed { key } = mutation {
                tolerate(self.store.insert_unclaimed_actual(key, now_ns).await)?;
            }
        }
        for mutation in &plan.mutations {
            if let Mutation::Unclaim { key } = mutation {
                tolerate(self.store.unclaim_actual(key, now_ns).await)?;
            }
        }
        Ok(())
    }
}

/// Partial mutation failure is acceptable: the failed sub-step is idempotent
/// and the next run reconverges. Consistency violations are not.
fn tolerate(result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.aborts_run() => Err(err),
        Err(err) => {
            warn!(error = %err, "mutation failed; next run will reconverge");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingMetricsSender;
    use crate::models::{ActualLrp, ActualLrpState, DesiredLrp, Domain};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Store double that serves a fixed snapshot and logs mutation calls.
    #[derive(Default)]
    struct MockStore {
        desired: Vec<DesiredLrp>,
        actuals: Vec<ActualLrp>,
        domains: Vec<Domain>,
        fail_inserts: Option<EngineError>,
        ops: Mutex<Vec<String>>,
    }

    impl MockStore {
        fn log(&self, op: String) {
            self.ops.lock().unwrap().push(op);
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LrpStore for MockStore {
        async fn desired_lrps(&self) -> Result<Vec<DesiredLrp>> {
            Ok(self.desired.clone())
        }

        async fn actual_lrps(&self) -> Result<Vec<ActualLrp>> {
            Ok(self.actuals.clone())
        }

        async fn domains(&self) -> Result<Vec<Domain>> {
            Ok(self.domains.clone())
        }

        async fn delete_domain(&self, name: &str) -> Result<()> {
            self.log(format!("delete-domain:{name}"));
            Ok(())
        }

        async fn delete_actual(&self, key: &ActualLrpKey, evacuating: bool) -> Result<()> {
            self.log(format!(
                "delete-actual:{}:{}:{}",
                key.process_guid, key.index, evacuating
            ));
            Ok(())
        }

        async fn insert_unclaimed_actual(&self, key: &ActualLrpKey, _now_ns: i64) -> Result<()> {
            if let Some(err) = &self.fail_inserts {
                return Err(err.clone());
            }
            self.log(format!("insert:{}:{}", key.process_guid, key.index));
            Ok(())
        }

        async fn unclaim_actual(&self, key: &ActualLrpKey, _now_ns: i64) -> Result<()> {
            self.log(format!("unclaim:{}:{}", key.process_guid, key.index));
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn fixture_store() -> MockStore {
        let now_ns = unix_nanos(now());
        let evac = ActualLrp {
            key: ActualLrpKey::new("evac", 0, "live"),
            evacuating: true,
            state: ActualLrpState::Unclaimed,
            instance: None,
            net_info: None,
            crash_count: 0,
            since_ns: now_ns,
            expire_time_ns: Some(now_ns - 1),
        };
        let crashed = ActualLrp {
            key: ActualLrpKey::new("g", 1, "live"),
            evacuating: false,
            state: ActualLrpState::Crashed,
            instance: None,
            net_info: None,
            crash_count: 1,
            since_ns: now_ns,
            expire_time_ns: None,
        };
        MockStore {
            desired: vec![DesiredLrp {
                process_guid: "g".to_string(),
                domain: "live".to_string(),
                instances: 2,
                max_restarts: None,
                scheduling_info: b"sched".to_vec(),
            }],
            actuals: vec![evac, crashed],
            domains: vec![
                Domain {
                    name: "live".to_string(),
                    expire_time_ns: now_ns + 1_000_000_000_000,
                },
                Domain {
                    name: "dead".to_string(),
                    expire_time_ns: now_ns - 1,
                },
            ],
            ..Default::default()
        }
    }

    fn converger(store: Arc<MockStore>, metrics: Arc<RecordingMetricsSender>) -> LrpConverger {
        LrpConverger::new(store, metrics, ConvergenceSettings::default())
    }

    #[tokio::test]
    async fn test_mutations_apply_in_fixed_order() {
        let store = Arc::new(fixture_store());
        let metrics = Arc::new(RecordingMetricsSender::new());
        let outputs = converger(store.clone(), metrics.clone())
            .converge(&CellSet::new(), now(), None)
            .await
            .unwrap();

        assert_eq!(
            store.ops(),
            vec![
                "delete-domain:dead".to_string(),
                "delete-actual:evac:0:true".to_string(),
                "insert:g:0".to_string(),
                "unclaim:g:1".to_string(),
            ]
        );
        assert_eq!(outputs.start_requests.len(), 1);
        assert_eq!(outputs.start_requests[0].indices, vec![0, 1]);
        assert_eq!(metrics.counter(crate::metrics::CONVERGENCE_RUNS), 1);
        assert_eq!(
            metrics.gauge_unit(crate::metrics::CONVERGENCE_DURATION).as_deref(),
            Some(crate::metrics::UNIT_NANOS)
        );
    }

    #[tokio::test]
    async fn test_deadline_abort_has_no_side_effects() {
        let store = Arc::new(fixture_store());
        let metrics = Arc::new(RecordingMetricsSender::new());
        let past = Utc::now() - chrono::Duration::seconds(5);
        let err = converger(store.clone(), metrics.clone())
            .converge(&CellSet::new(), now(), Some(past))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::DeadlineExceeded { .. }));
        assert!(store.ops().is_empty());
        assert_eq!(metrics.counter(crate::metrics::CONVERGENCE_RUNS), 0);
    }

    #[tokio::test]
    async fn test_transient_mutation_failure_still_emits_outputs() {
        let mut store = fixture_store();
        store.fail_inserts = Some(EngineError::StorageUnavailable {
            operation: "insert-unclaimed".to_string(),
            details: "connection reset".to_string(),
        });
        let store = Arc::new(store);
        let metrics = Arc::new(RecordingMetricsSender::new());
        let outputs = converger(store.clone(), metrics.clone())
            .converge(&CellSet::new(), now(), None)
            .await
            .unwrap();

        assert!(!outputs.start_requests.is_empty());
        assert_eq!(metrics.counter(crate::metrics::CONVERGENCE_RUNS), 1);
        // The unclaim sub-step still ran after the failed insert.
        assert!(store.ops().iter().any(|op| op == "unclaim:g:1"));
    }

    #[tokio::test]
    async fn test_consistency_violation_aborts_the_run() {
        let mut store = fixture_store();
        store.fail_inserts = Some(EngineError::ConsistencyViolation {
            operation: "insert-unclaimed".to_string(),
            details: "duplicate key".to_string(),
        });
        let store = Arc::new(store);
        let metrics = Arc::new(RecordingMetricsSender::new());
        let err = converger(store.clone(), metrics.clone())
            .converge(&CellSet::new(), now(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ConsistencyViolation { .. }));
        assert_eq!(metrics.counter(crate::metrics::CONVERGENCE_RUNS), 0);
    }
}
