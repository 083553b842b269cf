// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed store implementation.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{EngineError, Result};
use crate::models::{ActualLrp, ActualLrpKey, DesiredLrp, Domain};

use super::{ActualLrpRow, DesiredLrpRow, DomainRow, LrpStore};

/// PostgreSQL-backed state store.
#[derive(Clone)]
pub struct PostgresLrpStore {
    pool: PgPool,
}

impl PostgresLrpStore {
    /// Create a store from an existing pool. The schema must already be
    /// migrated (see [`crate::migrations`]).
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LrpStore for PostgresLrpStore {
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
            WHERE name = $1
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
            WHERE process_guid = $1 AND instance_index = $2 AND evacuating = $3
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
            INSERT INTO actual_lrps
                (process_guid, instance_index, evacuating, domain, state, crash_count, since)
            VALUES ($1, $2, FALSE, $3, 0, 0, $4)
            ON CONFLICT (process_guid, instance_index, evacuating) DO NOTHING
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
                since = $1
            WHERE process_guid = $2 AND instance_index = $3 AND evacuating = FALSE
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
