// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for flotilla-core integration tests.
//!
//! Provides TestContext for an in-memory SQLite store plus raw-SQL seeding
//! helpers that play the role of the external API and the cells: desiring
//! workloads, claiming/starting/crashing replicas, and flipping records to
//! evacuating.

#![allow(dead_code)]

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use flotilla_core::encoding::{self, Encoding};
use flotilla_core::migrations;
use flotilla_core::models::{NetInfo, PortMapping};

/// Test context that manages an in-memory database.
pub struct TestContext {
    pub pool: SqlitePool,
}

/// The opaque placement payload used for `guid` throughout the tests.
pub fn sched_payload(guid: &str) -> Vec<u8> {
    format!("scheduling-info-{guid}").into_bytes()
}

impl TestContext {
    /// Connect an in-memory SQLite database and run migrations.
    ///
    /// A single connection keeps every query on the same in-memory database.
    pub async fn new() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("failed to open in-memory sqlite");
        migrations::run_sqlite(&pool)
            .await
            .expect("failed to run migrations");
        Self { pool }
    }

    pub async fn upsert_domain(&self, name: &str, expire_time_ns: i64) {
        sqlx::query(
            r#"
            INSERT INTO domains (name, expire_time)
            VALUES (?, ?)
            ON CONFLICT (name) DO UPDATE SET expire_time = excluded.expire_time
            "#,
        )
        .bind(name)
        .bind(expire_time_ns)
        .execute(&self.pool)
        .await
        .expect("failed to upsert domain");
    }

    /// Declare a workload, storing its payload behind the base64 envelope
    /// the way the external API writes it.
    pub async fn desire_lrp(&self, guid: &str, domain: &str, instances: i32) {
        self.desire_lrp_with_restarts(guid, domain, instances, None)
            .await;
    }

    pub async fn desire_lrp_with_restarts(
        &self,
        guid: &str,
        domain: &str,
        instances: i32,
        max_restarts: Option<i32>,
    ) {
        let blob = encoding::encode(Encoding::Base64, &sched_payload(guid));
        sqlx::query(
            r#"
            INSERT INTO desired_lrps (process_guid, domain, instances, max_restarts, scheduling_info)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(guid)
        .bind(domain)
        .bind(instances)
        .bind(max_restarts)
        .bind(blob)
        .execute(&self.pool)
        .await
        .expect("failed to desire lrp");
    }

    pub async fn create_unclaimed(&self, guid: &str, index: i32, domain: &str, since_ns: i64) {
        sqlx::query(
            r#"
            INSERT INTO actual_lrps
                (process_guid, instance_index, evacuating, domain, state, crash_count, since)
            VALUES (?, ?, 0, ?, 0, 0, ?)
            "#,
        )
        .bind(guid)
        .bind(index)
        .bind(domain)
        .bind(since_ns)
        .execute(&self.pool)
        .await
        .expect("failed to create unclaimed actual");
    }

    pub async fn claim(&self, guid: &str, index: i32, cell_id: &str) {
        sqlx::query(
            r#"
            UPDATE actual_lrps
            SET state = 1, instance_guid = ?, cell_id = ?
            WHERE process_guid = ? AND instance_index = ? AND evacuating = 0
            "#,
        )
        .bind(format!("{guid}-{index}-instance"))
        .bind(cell_id)
        .bind(guid)
        .bind(index)
        .execute(&self.pool)
        .await
        .expect("failed to claim actual");
    }

    pub async fn start(&self, guid: &str, index: i32, cell_id: &str) {
        self.claim(guid, index, cell_id).await;
        let net_info = serde_json::to_vec(&NetInfo {
            address: "10.0.0.7".to_string(),
            ports: vec![PortMapping {
                container_port: 8080,
                host_port: 61000,
            }],
        })
        .unwrap();
        sqlx::query(
            r#"
            UPDATE actual_lrps
            SET state = 2, net_info = ?
            WHERE process_guid = ? AND instance_index = ? AND evacuating = 0
            "#,
        )
        .bind(net_info)
        .bind(guid)
        .bind(index)
        .execute(&self.pool)
        .await
        .expect("failed to start actual");
    }

    pub async fn crash(&self, guid: &str, index: i32, crash_count: i32) {
        sqlx::query(
            r#"
            UPDATE actual_lrps
            SET state = 3, crash_count = ?, net_info = NULL
            WHERE process_guid = ? AND instance_index = ? AND evacuating = 0
            "#,
        )
        .bind(crash_count)
        .bind(guid)
        .bind(index)
        .execute(&self.pool)
        .await
        .expect("failed to crash actual");
    }

    /// Flip every record of `guid` to the evacuating side, optionally with
    /// an expiry deadline.
    pub async fn mark_evacuating(&self, guid: &str, expire_time_ns: Option<i64>) {
        sqlx::query(
            r#"
            UPDATE actual_lrps
            SET evacuating = 1, expire_time = ?
            WHERE process_guid = ?
            "#,
        )
        .bind(expire_time_ns)
        .bind(guid)
        .execute(&self.pool)
        .await
        .expect("failed to mark evacuating");
    }

    // ========================================================================
    // Read-back helpers
    // ========================================================================

    pub async fn domain_names(&self) -> Vec<String> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM domains ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .expect("failed to list domains");
        rows.into_iter().map(|r| r.0).collect()
    }

    pub async fn actual_guids(&self) -> Vec<String> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT process_guid FROM actual_lrps ORDER BY process_guid")
                .fetch_all(&self.pool)
                .await
                .expect("failed to list actuals");
        rows.into_iter().map(|r| r.0).collect()
    }

    /// State code of the non-evacuating record at (guid, index), if present.
    pub async fn actual_state(&self, guid: &str, index: i32) -> Option<i16> {
        let row: Option<(i16,)> = sqlx::query_as(
            r#"
            SELECT state FROM actual_lrps
            WHERE process_guid = ? AND instance_index = ? AND evacuating = 0
            "#,
        )
        .bind(guid)
        .bind(index)
        .fetch_optional(&self.pool)
        .await
        .expect("failed to read actual state");
        row.map(|r| r.0)
    }

    /// Cell of the non-evacuating record at (guid, index), if any.
    pub async fn actual_cell(&self, guid: &str, index: i32) -> Option<String> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            SELECT cell_id FROM actual_lrps
            WHERE process_guid = ? AND instance_index = ? AND evacuating = 0
            "#,
        )
        .bind(guid)
        .bind(index)
        .fetch_optional(&self.pool)
        .await
        .expect("failed to read actual cell");
        row.and_then(|r| r.0)
    }

    pub async fn evacuating_count(&self, guid: &str) -> i64 {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM actual_lrps WHERE process_guid = ? AND evacuating = 1",
        )
        .bind(guid)
        .fetch_one(&self.pool)
        .await
        .expect("failed to count evacuating records");
        row.0
    }

    /// Snapshot of every column of `guid`'s records, for before/after
    /// comparisons.
    pub async fn dump_actuals(&self, guid: &str) -> Vec<(i32, bool, i16, Option<String>, i32, i64)> {
        let rows: Vec<(i32, bool, i16, Option<String>, i32, i64)> = sqlx::query_as(
            r#"
            SELECT instance_index, evacuating, state, cell_id, crash_count, since
            FROM actual_lrps
            WHERE process_guid = ?
            ORDER BY instance_index, evacuating
            "#,
        )
        .bind(guid)
        .fetch_all(&self.pool)
        .await
        .expect("failed to dump actuals");
        rows
    }
}
