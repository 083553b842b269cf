// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The convergence planner.
//!
//! [`plan`] is a pure function from one snapshot of the world to the work a
//! run must do. It never touches I/O and never blocks; everything it decides
//! is derived from the snapshot and `now_ns` alone, so two calls over equal
//! snapshots produce equal plans regardless of input ordering. That property
//! is what makes the engine testable without a store.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{EngineError, Result};
use crate::models::{ActualLrp, ActualLrpKey, ActualLrpState, CellSet, DesiredLrp, DomainSet};

use super::{ConvergenceOutputs, ConvergenceSettings, KeyWithSchedulingInfo, StartRequest};

/// Consistent view of the store taken at run start, plus the cell membership
/// handed in by the caller.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// All desired LRPs.
    pub desired: Vec<DesiredLrp>,
    /// All actual LRPs, evacuating and not.
    pub actuals: Vec<ActualLrp>,
    /// Domain freshness registry.
    pub domains: DomainSet,
    /// Live cell membership.
    pub cells: CellSet,
}

/// One in-place store mutation the executor must apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Remove an expired domain row.
    DeleteDomain {
        /// Name of the expired domain.
        name: String,
    },
    /// Remove an evacuating record that outlived its expiry deadline.
    DeleteEvacuating {
        /// Key of the expired evacuating record.
        key: ActualLrpKey,
    },
    /// Materialize an Unclaimed placeholder for a missing index.
    InsertUnclaimed {
        /// Key of the missing replica slot.
        key: ActualLrpKey,
    },
    /// Transition a restartable crashed record back to Unclaimed.
    Unclaim {
        /// Key of the crashed record.
        key: ActualLrpKey,
    },
}

/// Gauge inputs computed during classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Sum of `instances` over all desired LRPs.
    pub lrps_desired: u64,
    /// Observed Claimed records, evacuating included.
    pub claimed: u64,
    /// Observed Unclaimed records, evacuating included.
    pub unclaimed: u64,
    /// Observed Running records, evacuating included.
    pub running: u64,
    /// Observed Crashed records, non-evacuating only.
    pub crashed_actuals: u64,
    /// Desired LRPs with at least one non-restartable crashed record.
    pub crashing_desireds: u64,
    /// Indices in `[0, instances)` with no non-evacuating record.
    pub missing: u64,
    /// Keys selected for retirement.
    pub extra: u64,
}

/// Everything one convergence run must do, in deterministic order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergencePlan {
    /// Aggregated start requests, sorted by process guid.
    pub start_requests: Vec<StartRequest>,
    /// Placed replicas whose cell has disappeared, sorted by guid then index.
    pub keys_with_missing_cells: Vec<KeyWithSchedulingInfo>,
    /// Replicas that should no longer exist, sorted by guid then index.
    pub keys_to_retire: Vec<ActualLrpKey>,
    /// In-place store mutations, grouped by the executor's fixed order.
    pub mutations: Vec<Mutation>,
    /// Gauge inputs for the metrics emitter.
    pub stats: PlanStats,
}

impl ConvergencePlan {
    /// Guard against planner bugs before any mutation is applied.
    ///
    /// A key must never be both started and retired, retire keys must be
    /// unique, and every start request must carry a sorted, non-empty,
    /// duplicate-free index list.
    pub fn verify(&self) -> Result<()> {
        let retired: HashSet<(&str, i32)> = self
            .keys_to_retire
            .iter()
            .map(|k| (k.process_guid.as_str(), k.index))
            .collect();
        if retired.len() != self.keys_to_retire.len() {
            return Err(EngineError::PlannerInvariant {
                details: "duplicate keys in retire list".to_string(),
            });
        }
        for request in &self.start_requests {
            if request.indices.is_empty() {
                return Err(EngineError::PlannerInvariant {
                    details: format!("empty start request for '{}'", request.process_guid),
                });
            }
            if !request.indices.windows(2).all(|w| w[0] < w[1]) {
                return Err(EngineError::PlannerInvariant {
                    details: format!("unsorted start indices for '{}'", request.process_guid),
                });
            }
            for &index in &request.indices {
                if retired.contains(&(request.process_guid.as_str(), index)) {
                    return Err(EngineError::PlannerInvariant {
                        details: format!(
                            "index {} of '{}' is both started and retired",
                            index, request.process_guid
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Split off the three output sets handed to collaborators.
    pub fn into_outputs(self) -> ConvergenceOutputs {
        ConvergenceOutputs {
            start_requests: self.start_requests,
            keys_with_missing_cells: self.keys_with_missing_cells,
            keys_to_retire: self.keys_to_retire,
        }
    }
}

/// Produce the plan for one convergence run.
pub fn plan(snapshot: &Snapshot, now_ns: i64, settings: &ConvergenceSettings) -> ConvergencePlan {
    let stale_ns = i64::try_from(settings.stale_unclaimed_after.as_nanos()).unwrap_or(i64::MAX);

    let mut desired: Vec<&DesiredLrp> = snapshot.desired.iter().collect();
    desired.sort_by(|a, b| a.process_guid.cmp(&b.process_guid));
    let desired_guids: BTreeSet<&str> = desired.iter().map(|d| d.process_guid.as_str()).collect();

    // Non-evacuating records by guid and index; evacuating records sorted by
    // key so the GC pass below is order-independent.
    let mut instances: BTreeMap<&str, BTreeMap<i32, &ActualLrp>> = BTreeMap::new();
    let mut evacuating: Vec<&ActualLrp> = Vec::new();
    for actual in &snapshot.actuals {
        if actual.evacuating {
            evacuating.push(actual);
        } else {
            instances
                .entry(actual.key.process_guid.as_str())
                .or_default()
                .insert(actual.key.index, actual);
        }
    }
    evacuating.sort_by(|a, b| a.key.cmp(&b.key));

    let mut plan = ConvergencePlan::default();
    let mut stats = PlanStats::default();

    for actual in &snapshot.actuals {
        match actual.state {
            ActualLrpState::Unclaimed => stats.unclaimed += 1,
            ActualLrpState::Claimed => stats.claimed += 1,
            ActualLrpState::Running => stats.running += 1,
            ActualLrpState::Crashed => {
                if !actual.evacuating {
                    stats.crashed_actuals += 1;
                }
            }
        }
    }

    let mut inserts: Vec<Mutation> = Vec::new();
    let mut unclaims: Vec<Mutation> = Vec::new();

    for d in desired {
        stats.lrps_desired += d.instances.max(0) as u64;
        let restart_budget = d.max_restarts.unwrap_or(settings.default_max_restarts);
        let by_index = instances.get(d.process_guid.as_str());
        let domain_fresh = snapshot.domains.is_fresh(&d.domain, now_ns);
        let mut start_indices: BTreeSet<i32> = BTreeSet::new();
        let mut has_unrestartable_crash = false;

        for index in 0..d.instances {
            match by_index.and_then(|m| m.get(&index)) {
                // No non-evacuating record for this slot. This also covers
                // the evacuating handover: the draining record stays put and
                // a fresh placeholder is materialized next to it.
                None => {
                    inserts.push(Mutation::InsertUnclaimed {
                        key: ActualLrpKey::new(d.process_guid.clone(), index, d.domain.clone()),
                    });
                    start_indices.insert(index);
                    stats.missing += 1;
                }
                Some(actual) => match actual.state {
                    ActualLrpState::Unclaimed => {
                        if actual.stale_since(now_ns, stale_ns) {
                            start_indices.insert(index);
                        }
                    }
                    ActualLrpState::Claimed | ActualLrpState::Running => {
                        let cell_known = actual
                            .cell_id()
                            .is_some_and(|cell| snapshot.cells.is_known(cell));
                        if !cell_known {
                            plan.keys_with_missing_cells.push(KeyWithSchedulingInfo {
                                key: actual.key.clone(),
                                scheduling_info: d.scheduling_info.clone(),
                            });
                        }
                    }
                    ActualLrpState::Crashed => {
                        if actual.crash_count <= restart_budget {
                            unclaims.push(Mutation::Unclaim {
                                key: actual.key.clone(),
                            });
                            start_indices.insert(index);
                        } else {
                            has_unrestartable_crash = true;
                        }
                    }
                },
            }
        }

        if has_unrestartable_crash {
            stats.crashing_desireds += 1;
        }

        // Records beyond the declared range are retired, but only while the
        // domain is fresh; a freshness gap may just mean the desired state
        // has not been re-reported yet.
        if let Some(by_index) = by_index {
            for actual in by_index.range(d.instances.max(0)..).map(|(_, a)| *a) {
                if domain_fresh {
                    plan.keys_to_retire.push(actual.key.clone());
                }
            }
        }

        if !start_indices.is_empty() {
            plan.start_requests.push(StartRequest {
                process_guid: d.process_guid.clone(),
                scheduling_info: d.scheduling_info.clone(),
                indices: start_indices.into_iter().collect(),
            });
        }
    }

    // Orphaned records: no desired LRP claims this guid at all.
    for (guid, by_index) in &instances {
        if desired_guids.contains(guid) {
            continue;
        }
        for actual in by_index.values() {
            if snapshot.domains.is_fresh(&actual.key.domain, now_ns) {
                plan.keys_to_retire.push(actual.key.clone());
            }
        }
    }

    for name in snapshot.domains.expired_names(now_ns) {
        plan.mutations.push(Mutation::DeleteDomain {
            name: name.to_string(),
        });
    }
    for actual in &evacuating {
        if actual.expired(now_ns) {
            plan.mutations.push(Mutation::DeleteEvacuating {
                key: actual.key.clone(),
            });
        }
    }
    plan.mutations.extend(inserts);
    plan.mutations.extend(unclaims);

    plan.keys_to_retire.sort();
    plan.keys_with_missing_cells.sort_by(|a, b| a.key.cmp(&b.key));

    stats.extra = plan.keys_to_retire.len() as u64;
    plan.stats = stats;
    plan
}
