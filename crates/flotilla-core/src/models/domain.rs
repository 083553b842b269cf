// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain freshness registry.
//!
//! A domain is a tenancy bucket with a freshness TTL. While a domain is not
//! fresh the engine cannot distinguish "instances intentionally removed"
//! from "instances not yet reported", so it withholds retirement of
//! un-desired actuals in that domain.

use std::collections::BTreeMap;

/// One domain row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    /// Domain name.
    pub name: String,
    /// Wall-clock nanoseconds after which the domain is no longer fresh.
    pub expire_time_ns: i64,
}

/// Pure view over the domain rows of one convergence snapshot.
#[derive(Debug, Clone, Default)]
pub struct DomainSet {
    expirations: BTreeMap<String, i64>,
}

impl DomainSet {
    /// Build the registry from the rows read at snapshot time.
    pub fn from_rows(rows: impl IntoIterator<Item = Domain>) -> Self {
        Self {
            expirations: rows
                .into_iter()
                .map(|d| (d.name, d.expire_time_ns))
                .collect(),
        }
    }

    /// Whether `name` exists and has not expired. A missing domain is never
    /// fresh.
    pub fn is_fresh(&self, name: &str, now_ns: i64) -> bool {
        matches!(self.expirations.get(name), Some(&t) if now_ns < t)
    }

    /// Names of all fresh domains, in lexical order.
    pub fn fresh_names(&self, now_ns: i64) -> impl Iterator<Item = &str> {
        self.expirations
            .iter()
            .filter(move |&(_, &t)| now_ns < t)
            .map(|(name, _)| name.as_str())
    }

    /// Names of all expired domains, in lexical order.
    pub fn expired_names(&self, now_ns: i64) -> impl Iterator<Item = &str> {
        self.expirations
            .iter()
            .filter(move |&(_, &t)| t <= now_ns)
            .map(|(name, _)| name.as_str())
    }
}
