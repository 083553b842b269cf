// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the convergence engine.
//!
//! Every fallible engine operation returns [`EngineError`]. Storage failures
//! are split into two kinds with different run-level consequences: an
//! unreachable store aborts the run entirely, while a unique-key violation
//! signals a concurrent mutation and also aborts, but is logged as a
//! consistency problem rather than an availability one.

use std::fmt;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the convergence engine.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// The state store could not be reached or failed a query.
    StorageUnavailable {
        /// The store operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A mutation violated a unique-key constraint mid-run, which indicates a
    /// concurrent writer. The run is aborted; the next run observes the new
    /// state.
    ConsistencyViolation {
        /// The store operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// The run deadline expired before the mutation phase began.
    DeadlineExceeded {
        /// The deadline that was missed, in epoch nanoseconds.
        deadline_ns: i64,
    },

    /// The planner produced inconsistent outputs (e.g. the same index both
    /// started and retired). This is a bug; the run is aborted.
    PlannerInvariant {
        /// Description of the violated invariant.
        details: String,
    },

    /// A collaborator rejected a dispatched output set.
    DispatchFailed {
        /// The collaborator that failed.
        collaborator: &'static str,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Classify a sqlx error that occurred during `operation`.
    ///
    /// Unique-key violations become [`EngineError::ConsistencyViolation`];
    /// everything else is treated as the store being unavailable.
    pub fn from_sqlx(operation: &str, err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                EngineError::ConsistencyViolation {
                    operation: operation.to_string(),
                    details: err.to_string(),
                }
            }
            _ => EngineError::StorageUnavailable {
                operation: operation.to_string(),
                details: err.to_string(),
            },
        }
    }

    /// True when the error aborts the whole convergence run.
    ///
    /// Mutation sub-steps tolerate transient storage failures (each mutation
    /// is independently idempotent, so the next run reconverges), but a
    /// consistency violation or planner bug always aborts.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            Self::ConsistencyViolation { .. } | Self::PlannerInvariant { .. }
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageUnavailable { operation, details } => {
                write!(f, "store unavailable during '{}': {}", operation, details)
            }
            Self::ConsistencyViolation { operation, details } => {
                write!(
                    f,
                    "consistency violation during '{}': {}",
                    operation, details
                )
            }
            Self::DeadlineExceeded { deadline_ns } => {
                write!(f, "run deadline {} expired before mutations", deadline_ns)
            }
            Self::PlannerInvariant { details } => {
                write!(f, "planner produced inconsistent outputs: {}", details)
            }
            Self::DispatchFailed {
                collaborator,
                details,
            } => {
                write!(f, "dispatch to {} failed: {}", collaborator, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::from_sqlx("query", err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::ConsistencyViolation {
            operation: "decode-net-info".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<crate::encoding::EncodingError> for EngineError {
    fn from(err: crate::encoding::EncodingError) -> Self {
        EngineError::ConsistencyViolation {
            operation: "decode-payload".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_storage_unavailable() {
        let err = EngineError::StorageUnavailable {
            operation: "list-domains".to_string(),
            details: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "store unavailable during 'list-domains': connection refused"
        );
    }

    #[test]
    fn test_display_consistency_violation() {
        let err = EngineError::ConsistencyViolation {
            operation: "insert-unclaimed".to_string(),
            details: "UNIQUE constraint failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "consistency violation during 'insert-unclaimed': UNIQUE constraint failed"
        );
    }

    #[test]
    fn test_display_planner_invariant() {
        let err = EngineError::PlannerInvariant {
            details: "index 3 of 'guid' both started and retired".to_string(),
        };
        assert!(err.to_string().contains("inconsistent outputs"));
    }

    #[test]
    fn test_aborts_run() {
        assert!(
            EngineError::ConsistencyViolation {
                operation: "x".to_string(),
                details: "y".to_string(),
            }
            .aborts_run()
        );
        assert!(
            EngineError::PlannerInvariant {
                details: "z".to_string()
            }
            .aborts_run()
        );
        assert!(
            !EngineError::StorageUnavailable {
                operation: "x".to_string(),
                details: "y".to_string(),
            }
            .aborts_run()
        );
    }
}
