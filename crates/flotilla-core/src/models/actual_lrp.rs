// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Observed replica records.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Identifies one replica slot of a workload.
///
/// The same key may be carried by an evacuating and a non-evacuating record
/// at the same time while a draining cell hands a replica over.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActualLrpKey {
    /// Process guid of the owning workload.
    pub process_guid: String,
    /// Replica index within the workload.
    pub index: i32,
    /// Domain the replica was scheduled under.
    pub domain: String,
}

impl ActualLrpKey {
    /// Build a key.
    pub fn new(process_guid: impl Into<String>, index: i32, domain: impl Into<String>) -> Self {
        Self {
            process_guid: process_guid.into(),
            index,
            domain: domain.into(),
        }
    }
}

/// Placement identity of a claimed/running/crashed replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceKey {
    /// Identifier of this placement attempt.
    pub instance_guid: String,
    /// The cell hosting (or last hosting) the replica.
    pub cell_id: String,
}

/// Network address and port mappings of a running replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetInfo {
    /// Host address the replica is reachable at.
    pub address: String,
    /// Container-to-host port mappings.
    pub ports: Vec<PortMapping>,
}

/// One container-to-host port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port inside the container.
    pub container_port: u32,
    /// Port on the host cell.
    pub host_port: u32,
}

/// Lifecycle state of an observed replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ActualLrpState {
    /// Scheduled but not yet claimed by any cell.
    Unclaimed,
    /// Claimed by a cell, not yet running.
    Claimed,
    /// Running on a cell with network info reported.
    Running,
    /// Exited abnormally; `crash_count` tracks how often.
    Crashed,
}

impl ActualLrpState {
    /// Wire code used in the `state` column.
    pub fn code(self) -> i16 {
        match self {
            Self::Unclaimed => 0,
            Self::Claimed => 1,
            Self::Running => 2,
            Self::Crashed => 3,
        }
    }

    /// Decode a `state` column value.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Unclaimed),
            1 => Some(Self::Claimed),
            2 => Some(Self::Running),
            3 => Some(Self::Crashed),
            _ => None,
        }
    }
}

/// One observed replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualLrp {
    /// Replica slot this record describes.
    pub key: ActualLrpKey,
    /// Whether this is the evacuating half of a handover pair.
    pub evacuating: bool,
    /// Lifecycle state.
    pub state: ActualLrpState,
    /// Placement identity; present in Claimed/Running/Crashed.
    pub instance: Option<InstanceKey>,
    /// Network info; present only in Running.
    pub net_info: Option<NetInfo>,
    /// Number of crashes observed for this slot.
    pub crash_count: i32,
    /// Wall-clock nanoseconds of the last state transition.
    pub since_ns: i64,
    /// For evacuating records, the deadline after which the record is garbage.
    pub expire_time_ns: Option<i64>,
}

impl ActualLrp {
    /// The cell currently associated with this replica, if any.
    pub fn cell_id(&self) -> Option<&str> {
        self.instance.as_ref().map(|k| k.cell_id.as_str())
    }

    /// Whether this record has sat Unclaimed for at least `threshold_ns`.
    pub fn stale_since(&self, now_ns: i64, threshold_ns: i64) -> bool {
        self.state == ActualLrpState::Unclaimed && now_ns.saturating_sub(self.since_ns) >= threshold_ns
    }

    /// Whether an evacuating record has outlived its expiry deadline.
    pub fn expired(&self, now_ns: i64) -> bool {
        matches!(self.expire_time_ns, Some(t) if t <= now_ns)
    }
}
