// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-preset action computation.
//!
//! Rules are applied in order:
//!
//! 1. Inactive template version: never create, delete every expired running
//!    prebuild. In-flight and exceptional prebuilds are left alone.
//! 2. Failure backoff: after recent failed builds, creates are suspended
//!    until `last_failed_at + num_failed * backoff_interval`. Deletions still
//!    proceed.
//! 3. Otherwise create up to the deficit and delete the extraneous surplus.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::PresetSnapshot;

/// The decisions for one preset in one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconciliationActions {
	/// Number of new prebuilds to provision.
	pub create: u32,
	/// Workspaces to issue `delete` builds for.
	pub delete_ids: Vec<Uuid>,
	/// When set, creates are suspended until this instant.
	pub backoff_until: Option<DateTime<Utc>>,
}

/// Compute the actions for a single preset. Pure: the same snapshot and
/// instant always produce the same actions.
pub fn determine_actions(
	preset: &PresetSnapshot,
	now: DateTime<Utc>,
	backoff_interval: Duration,
) -> ReconciliationActions {
	if !preset.using_active_version {
		return ReconciliationActions {
			create: 0,
			delete_ids: preset.expired.clone(),
			backoff_until: None,
		};
	}

	if let Some(backoff) = preset.backoff {
		if backoff.num_failed > 0 {
			let until = backoff.last_failed_at + backoff_interval * backoff.num_failed as i32;
			if now < until {
				return ReconciliationActions {
					create: 0,
					delete_ids: preset.extraneous.clone(),
					backoff_until: Some(until),
				};
			}
		}
	}

	ReconciliationActions {
		create: preset.desired.saturating_sub(preset.actual),
		delete_ids: preset.extraneous.clone(),
		backoff_until: None,
	}
}
