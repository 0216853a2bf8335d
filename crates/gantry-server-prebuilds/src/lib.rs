// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Prebuild pools for gantry server.
//!
//! A preset may declare a desired number of pre-provisioned idle workspaces
//! ("prebuilds"). This crate keeps every pool sized to its declaration and
//! hands pool members over to users on demand:
//!
//! - [`StoreReconciler`] runs the control loop: periodically (and on pubsub
//!   wake-ups) it snapshots the store, computes per-preset create/delete
//!   actions, and executes them. Passes are serialized across replicas by an
//!   advisory lock.
//! - [`StoreClaimer`] serves the request path: it atomically transfers an
//!   eligible prebuild to the requesting user and enqueues the follow-on
//!   build that materializes the user's configuration.
//! - [`notify`] carries the agent-facing readiness entry point and the pool
//!   definition announcement.

pub mod claimer;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod reconciler;
pub mod settings;

pub use claimer::{ClaimRequest, ClaimedWorkspace, Claimer, StoreClaimer};
pub use error::{PrebuildsError, Result};
pub use metrics::PrebuildMetrics;
pub use notify::{announce_pool_definition, mark_prebuild_ready};
pub use reconciler::StoreReconciler;
pub use settings::ReconcilerSettings;
