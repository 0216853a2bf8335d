// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pure state model for workspace prebuild reconciliation.
//!
//! This crate holds the value types shared between the reconciler and its
//! store: a point-in-time snapshot of every prebuild pool, and the action
//! computation that turns one preset's snapshot into a set of create/delete
//! decisions. Nothing here performs I/O; the reconciler feeds rows in and
//! executes the decisions that come out, which keeps the decision logic
//! trivially testable.

pub mod actions;
pub mod snapshot;

pub use actions::{determine_actions, ReconciliationActions};
pub use snapshot::{
	BackoffState, ExceptionalPrebuild, InFlightPrebuild, PresetDefinition, PresetSnapshot,
	ReconciliationSnapshot, RunningPrebuild,
};
