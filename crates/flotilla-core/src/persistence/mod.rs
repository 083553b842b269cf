// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State store adapter.
//!
//! This module defines the storage abstraction the engine converges against
//! and the backend implementations. All reads happen once per run to form a
//! consistent snapshot; all writes are idempotent when replayed with
//! identical inputs, which is what lets a partially-failed mutation phase be
//! repaired by the next run.
//!
//! Placeholder syntax differs between backends (`?` for SQLite, `$n` for
//! PostgreSQL); normalization is done by keeping one implementation per
//! backend rather than rewriting query strings.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresLrpStore;
pub use self::sqlite::SqliteLrpStore;

use async_trait::async_trait;

use crate::encoding;
use crate::error::{EngineError, Result};
use crate::models::{
    ActualLrp, ActualLrpKey, ActualLrpState, DesiredLrp, Domain, InstanceKey, NetInfo,
};

/// Typed access to the relational store, scoped to what convergence needs.
///
/// The engine never creates, mutates, or deletes desired LRPs; those belong
/// to the external API. Its write surface is exactly the four mutations the
/// planner can emit.
#[allow(missing_docs)]
#[async_trait]
pub trait LrpStore: Send + Sync {
    async fn desired_lrps(&self) -> Result<Vec<DesiredLrp>>;

    async fn actual_lrps(&self) -> Result<Vec<ActualLrp>>;

    async fn domains(&self) -> Result<Vec<Domain>>;

    /// Delete a domain row by name. Deleting an absent row is a no-op.
    async fn delete_domain(&self, name: &str) -> Result<()>;

    /// Delete the actual LRP at `key` on the given side of the evacuating
    /// flag. Deleting an absent row is a no-op.
    async fn delete_actual(&self, key: &ActualLrpKey, evacuating: bool) -> Result<()>;

    /// Materialize an Unclaimed placeholder for a missing index. Replaying
    /// the insert against an existing row is a no-op.
    async fn insert_unclaimed_actual(&self, key: &ActualLrpKey, now_ns: i64) -> Result<()>;

    /// Transition the non-evacuating record at `key` back to Unclaimed,
    /// clearing its placement identity and network info and stamping `since`.
    async fn unclaim_actual(&self, key: &ActualLrpKey, now_ns: i64) -> Result<()>;
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct DesiredLrpRow {
    pub process_guid: String,
    pub domain: String,
    pub instances: i32,
    pub max_restarts: Option<i32>,
    pub scheduling_info: Vec<u8>,
}

impl DesiredLrpRow {
    pub(crate) fn into_model(self) -> Result<DesiredLrp> {
        Ok(DesiredLrp {
            process_guid: self.process_guid,
            domain: self.domain,
            instances: self.instances,
            max_restarts: self.max_restarts,
            scheduling_info: encoding::decode(&self.scheduling_info)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ActualLrpRow {
    pub process_guid: String,
    pub instance_index: i32,
    pub evacuating: bool,
    pub domain: String,
    pub state: i16,
    pub instance_guid: Option<String>,
    pub cell_id: Option<String>,
    pub net_info: Option<Vec<u8>>,
    pub crash_count: i32,
    pub since: i64,
    pub expire_time: Option<i64>,
}

impl ActualLrpRow {
    pub(crate) fn into_model(self) -> Result<ActualLrp> {
        let state = ActualLrpState::from_code(self.state).ok_or_else(|| {
            EngineError::ConsistencyViolation {
                operation: "decode-actual-state".to_string(),
                details: format!(
                    "unknown state code {} for '{}' index {}",
                    self.state, self.process_guid, self.instance_index
                ),
            }
        })?;
        let instance = match (self.instance_guid, self.cell_id) {
            (Some(instance_guid), Some(cell_id)) => Some(InstanceKey {
                instance_guid,
                cell_id,
            }),
            _ => None,
        };
        let net_info: Option<NetInfo> = match self.net_info {
            Some(blob) => Some(serde_json::from_slice(&blob)?),
            None => None,
        };
        Ok(ActualLrp {
            key: ActualLrpKey::new(self.process_guid, self.instance_index, self.domain),
            evacuating: self.evacuating,
            state,
            instance,
            net_info,
            crash_count: self.crash_count,
            since_ns: self.since,
            expire_time_ns: self.expire_time,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct DomainRow {
    pub name: String,
    pub expire_time: i64,
}

impl DomainRow {
    pub(crate) fn into_model(self) -> Domain {
        Domain {
            name: self.name,
            expire_time_ns: self.expire_time,
        }
    }
}
