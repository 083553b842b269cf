// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Value records the convergence engine operates on.
//!
//! These are plain data types. The classification logic that decides what to
//! do with each record lives in the planner, not in a type hierarchy.

pub mod actual_lrp;
pub mod cell;
pub mod desired_lrp;
pub mod domain;

pub use self::actual_lrp::{ActualLrp, ActualLrpKey, ActualLrpState, InstanceKey, NetInfo, PortMapping};
pub use self::cell::CellSet;
pub use self::desired_lrp::DesiredLrp;
pub use self::domain::{Domain, DomainSet};
