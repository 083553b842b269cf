// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use crate::convergence::ConvergenceSettings;

/// Converger configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Interval between convergence runs
    pub converge_interval: Duration,
    /// Age at which an Unclaimed record is overdue for auction
    pub stale_unclaimed_after: Duration,
    /// Default crash budget for workloads without an override
    pub default_max_restarts: i32,
    /// Optional per-run deadline
    pub run_deadline: Option<Duration>,
    /// Statically configured cell identifiers
    pub cells: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FLOTILLA_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `FLOTILLA_CONVERGE_INTERVAL_SECS`: seconds between runs (default: 30)
    /// - `FLOTILLA_STALE_UNCLAIMED_SECS`: staleness threshold (default: 30)
    /// - `FLOTILLA_MAX_RESTARTS`: default crash budget (default: 3)
    /// - `FLOTILLA_RUN_DEADLINE_SECS`: per-run deadline (default: none)
    /// - `FLOTILLA_CELLS`: comma-separated cell ids (default: empty)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FLOTILLA_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("FLOTILLA_DATABASE_URL"))?;

        let converge_interval = secs_var("FLOTILLA_CONVERGE_INTERVAL_SECS", 30)?;
        let stale_unclaimed_after = secs_var("FLOTILLA_STALE_UNCLAIMED_SECS", 30)?;

        let default_max_restarts: i32 = std::env::var("FLOTILLA_MAX_RESTARTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("FLOTILLA_MAX_RESTARTS", "must be an integer"))?;

        let run_deadline = match std::env::var("FLOTILLA_RUN_DEADLINE_SECS") {
            Ok(raw) => Some(Duration::from_secs(raw.parse().map_err(|_| {
                ConfigError::Invalid("FLOTILLA_RUN_DEADLINE_SECS", "must be a number of seconds")
            })?)),
            Err(_) => None,
        };

        let cells = std::env::var("FLOTILLA_CELLS")
            .map(|raw| parse_cells(&raw))
            .unwrap_or_default();

        Ok(Self {
            database_url,
            converge_interval,
            stale_unclaimed_after,
            default_max_restarts,
            run_deadline,
            cells,
        })
    }

    /// Classification tunables derived from this configuration.
    pub fn convergence_settings(&self) -> ConvergenceSettings {
        ConvergenceSettings {
            stale_unclaimed_after: self.stale_unclaimed_after,
            default_max_restarts: self.default_max_restarts,
        }
    }
}

fn secs_var(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, "must be a number of seconds"))?;
    Ok(Duration::from_secs(secs))
}

fn parse_cells(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cells_trims_and_drops_empties() {
        assert_eq!(
            parse_cells("cell-a, cell-b ,,cell-c"),
            vec!["cell-a", "cell-b", "cell-c"]
        );
        assert!(parse_cells("").is_empty());
    }
}
