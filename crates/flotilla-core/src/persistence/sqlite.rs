// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed store implementation.

use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::{EngineError, Result};
use crate::models::{ActualLrp, ActualLrpKey, DesiredLrp, Domain};

use super::{ActualLrpRow, DesiredLrpRow, DomainRow, LrpStore};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed state store.
#[derive(Clone)]
pub struct SqliteLrpStore {
    pool: SqlitePool,
}

impl SqliteLrpStore {
    /// Create a store from an existing pool. The schema must already be
    /// migrated (see [`crate::migrations`]).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file as needed, connects
    /// with sensible defaults, and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::StorageUnavailable {
                operation: "create-dir".to_string(),
                details: format!("failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| EngineError::from_sqlx("connect", e))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| EngineError::StorageUnavailable {
                operation: "migrate".to_string(),
                details: e.to_string(),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl LrpStore for SqliteLrpStore {
    async fn desired_lrps(&self) -> Result<Vec<DesiredLrp>> {
        let rows = sqlx::query_as::<_, DesiredLrpRow>(
            r#"
            SELECT process_guid, domain, instances, max_restarts, scheduling_info
            FROM desired_lrps
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::from_sqlx("list-desired-lrps", e))?;

        rows.into_iter().map(DesiredLrpRow::into_model).collect()
    }

    async fn actual_lrps(&self) -> Result<Vec<ActualLrp>> {
        let rows = sqlx::query_as::<_, ActualLrpRow>(
            r#"
            SELECT process_guid, instance_index, evacuating, domain, state,
                   instance_guid, cell_id, net_info, crash_count, since, expire_time
            FROM actual_lrps
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::from_sqlx("list-actual-lrps", e))?;

        rows.into_iter().map(ActualLrpRow::into_model).collect()
    }

    async fn domains(&self) -> Result<Vec<Domain>> {
        let rows = sqlx::query_as::<_, DomainRow>(
            r#"
            SELECT name, expire_time
            FROM domains
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::from_sqlx("list-domains", e))?;

        Ok(rows.into_iter().map(DomainRow::into_model).collect())
    }

    async fn delete_domain(&self, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM domains
            WHERE name = ?
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::from_sqlx("delete-domain", e))?;

        Ok(())
    }

    async fn delete_actual(&self, key: &ActualLrpKey, evacuating: bool) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM actual_lrps
            WHERE process_guid = ? AND instance_index = ? AND evacuating = ?
            "#,
        )
        .bind(&key.process_guid)
        .bind(key.index)
        .bind(evacuating)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::from_sqlx("delete-actual", e))?;

        Ok(())
    }

    async fn insert_unclaimed_actual(&self, key: &ActualLrpKey, now_ns: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO actual_lrps
                (process_guid, instance_index, evacuating, domain, state, crash_count, since)
            VALUES (?, ?, 0, ?, 0, 0, ?)
            "#,
        )
        .bind(&key.process_guid)
        .bind(key.index)
        .bind(&key.domain)
        .bind(now_ns)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::from_sqlx("insert-unclaimed", e))?;

        Ok(())
    }

    async fn unclaim_actual(&self, key: &ActualLrpKey, now_ns: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE actual_lrps
            SET state = 0,
                instance_guid = NULL,
                cell_id = NULL,
                net_info = NULL,
                since = ?
            WHERE process_guid = ? AND instance_index = ? AND evacuating = 0
            "#,
        )
        .bind(now_ns)
        .bind(&key.process_guid)
        .bind(key.index)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::from_sqlx("unclaim-actual", e))?;

        Ok(())
    }
}
