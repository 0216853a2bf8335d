// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stable channel names for the prebuild subsystem.

/// Published after a preset's prebuild pool definition is added or updated.
/// Payload: UTF-8 encoded preset identifier.
pub const PREBUILD_CREATED_CHANNEL: &str = "prebuild-created";

/// Published by the workspace agent path once a prebuild has finished
/// starting and all of its agents are ready. Payload: UTF-8 encoded
/// workspace identifier.
pub const PREBUILD_READY_CHANNEL: &str = "prebuild-ready";

/// Published after a successful claim to prompt replenishment of the pool.
/// Payload: UTF-8 encoded preset identifier.
pub const PREBUILD_RECONCILE_CHANNEL: &str = "prebuild-reconcile";
