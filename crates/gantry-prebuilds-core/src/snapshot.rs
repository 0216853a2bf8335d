// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Point-in-time reconciliation state.
//!
//! A [`ReconciliationSnapshot`] is assembled from one consistent read of the
//! store and is immutable afterwards. Each [`PresetSnapshot`] classifies the
//! preset's prebuilds into running / in-flight / exceptional sets and
//! pre-computes the expired and extraneous candidates so that action
//! computation stays a pure function of the snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A preset that carries a prebuild pool definition, as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetDefinition {
	pub preset_id: Uuid,
	pub preset_name: String,
	pub template_id: Uuid,
	pub template_name: String,
	pub template_version_id: Uuid,
	pub desired_instances: u32,
	/// Whether the preset's template version is the template's active version.
	pub using_active_version: bool,
}

/// A prebuild whose latest build is a succeeded `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningPrebuild {
	pub workspace_id: Uuid,
	pub preset_id: Uuid,
	/// All agents of the workspace have reached the `ready` lifecycle state.
	pub ready: bool,
	pub created_at: DateTime<Utc>,
}

/// A prebuild whose latest `start` build is still pending, running, or canceling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightPrebuild {
	pub workspace_id: Uuid,
	pub preset_id: Uuid,
}

/// A prebuild whose latest job failed or was canceled. These are retained for
/// operator inspection and never touched by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionalPrebuild {
	pub workspace_id: Uuid,
	pub preset_id: Uuid,
}

/// Failure history for a preset within the backoff lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffState {
	pub num_failed: u32,
	pub last_failed_at: DateTime<Utc>,
}

/// The observed and desired state of a single prebuild pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetSnapshot {
	pub preset_id: Uuid,
	pub preset_name: String,
	pub template_id: Uuid,
	pub template_name: String,
	pub template_version_id: Uuid,
	pub desired: u32,
	pub using_active_version: bool,
	/// Running successful starts plus in-flight starts. Exceptional prebuilds
	/// are excluded: they will never become claimable, so counting them would
	/// permanently starve the pool of replacements.
	pub actual: u32,
	/// Running, all agents ready, claimable right now.
	pub eligible: u32,
	pub in_flight: u32,
	pub exceptional: u32,
	/// Running prebuilds on a no-longer-active template version, oldest first.
	pub expired: Vec<Uuid>,
	/// Eligible prebuilds beyond the desired count, oldest first.
	pub extraneous: Vec<Uuid>,
	pub backoff: Option<BackoffState>,
}

/// An immutable view of every prebuild pool, derived from one consistent read
/// of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSnapshot {
	pub presets: Vec<PresetSnapshot>,
	pub as_of: DateTime<Utc>,
}

impl ReconciliationSnapshot {
	pub fn new(
		as_of: DateTime<Utc>,
		definitions: Vec<PresetDefinition>,
		running: Vec<RunningPrebuild>,
		in_flight: Vec<InFlightPrebuild>,
		exceptional: Vec<ExceptionalPrebuild>,
		backoffs: HashMap<Uuid, BackoffState>,
	) -> Self {
		let presets = definitions
			.into_iter()
			.map(|def| {
				let mut running_here: Vec<&RunningPrebuild> = running
					.iter()
					.filter(|r| r.preset_id == def.preset_id)
					.collect();
				running_here.sort_by_key(|r| r.created_at);

				let in_flight_count = in_flight
					.iter()
					.filter(|p| p.preset_id == def.preset_id)
					.count() as u32;
				let exceptional_count = exceptional
					.iter()
					.filter(|p| p.preset_id == def.preset_id)
					.count() as u32;

				let actual = running_here.len() as u32 + in_flight_count;
				// Prebuilds on a retired version are expired, not claimable.
				let eligible_ids: Vec<Uuid> = if def.using_active_version {
					running_here
						.iter()
						.filter(|r| r.ready)
						.map(|r| r.workspace_id)
						.collect()
				} else {
					Vec::new()
				};

				let expired = if def.using_active_version {
					Vec::new()
				} else {
					running_here.iter().map(|r| r.workspace_id).collect()
				};

				let extraneous = if def.using_active_version && actual > def.desired_instances {
					let excess = (actual - def.desired_instances) as usize;
					eligible_ids.iter().copied().take(excess).collect()
				} else {
					Vec::new()
				};

				PresetSnapshot {
					preset_id: def.preset_id,
					preset_name: def.preset_name,
					template_id: def.template_id,
					template_name: def.template_name,
					template_version_id: def.template_version_id,
					desired: def.desired_instances,
					using_active_version: def.using_active_version,
					actual,
					eligible: eligible_ids.len() as u32,
					in_flight: in_flight_count,
					exceptional: exceptional_count,
					expired,
					extraneous,
					backoff: backoffs.get(&def.preset_id).copied(),
				}
			})
			.collect();

		Self { presets, as_of }
	}

	/// Restrict the snapshot to a single preset.
	pub fn filter_by_preset(&self, preset_id: Uuid) -> Option<&PresetSnapshot> {
		self.presets.iter().find(|p| p.preset_id == preset_id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;

	fn definition(desired: u32, active: bool) -> PresetDefinition {
		PresetDefinition {
			preset_id: Uuid::new_v4(),
			preset_name: "big".to_string(),
			template_id: Uuid::new_v4(),
			template_name: "docker".to_string(),
			template_version_id: Uuid::new_v4(),
			desired_instances: desired,
			using_active_version: active,
		}
	}

	fn running(preset_id: Uuid, ready: bool, age_secs: i64) -> RunningPrebuild {
		RunningPrebuild {
			workspace_id: Uuid::new_v4(),
			preset_id,
			ready,
			created_at: Utc::now() - Duration::seconds(age_secs),
		}
	}

	#[test]
	fn test_empty_pool_counts() {
		let def = definition(2, true);
		let id = def.preset_id;
		let snapshot = ReconciliationSnapshot::new(
			Utc::now(),
			vec![def],
			vec![],
			vec![],
			vec![],
			HashMap::new(),
		);

		let preset = snapshot.filter_by_preset(id).unwrap();
		assert_eq!(preset.desired, 2);
		assert_eq!(preset.actual, 0);
		assert_eq!(preset.eligible, 0);
		assert!(preset.expired.is_empty());
		assert!(preset.extraneous.is_empty());
	}

	#[test]
	fn test_in_flight_counts_toward_actual_but_not_eligible() {
		let def = definition(2, true);
		let id = def.preset_id;
		let snapshot = ReconciliationSnapshot::new(
			Utc::now(),
			vec![def],
			vec![running(id, true, 60)],
			vec![InFlightPrebuild {
				workspace_id: Uuid::new_v4(),
				preset_id: id,
			}],
			vec![],
			HashMap::new(),
		);

		let preset = snapshot.filter_by_preset(id).unwrap();
		assert_eq!(preset.actual, 2);
		assert_eq!(preset.eligible, 1);
		assert_eq!(preset.in_flight, 1);
	}

	#[test]
	fn test_exceptional_excluded_from_actual() {
		let def = definition(1, true);
		let id = def.preset_id;
		let snapshot = ReconciliationSnapshot::new(
			Utc::now(),
			vec![def],
			vec![],
			vec![],
			vec![ExceptionalPrebuild {
				workspace_id: Uuid::new_v4(),
				preset_id: id,
			}],
			HashMap::new(),
		);

		let preset = snapshot.filter_by_preset(id).unwrap();
		assert_eq!(preset.actual, 0);
		assert_eq!(preset.exceptional, 1);
	}

	#[test]
	fn test_not_ready_prebuild_is_not_eligible() {
		let def = definition(1, true);
		let id = def.preset_id;
		let snapshot = ReconciliationSnapshot::new(
			Utc::now(),
			vec![def],
			vec![running(id, false, 60)],
			vec![],
			vec![],
			HashMap::new(),
		);

		let preset = snapshot.filter_by_preset(id).unwrap();
		assert_eq!(preset.actual, 1);
		assert_eq!(preset.eligible, 0);
	}

	#[test]
	fn test_inactive_version_marks_running_as_expired() {
		let def = definition(1, false);
		let id = def.preset_id;
		let one = running(id, true, 120);
		let two = running(id, false, 60);
		let snapshot = ReconciliationSnapshot::new(
			Utc::now(),
			vec![def],
			vec![two.clone(), one.clone()],
			vec![],
			vec![],
			HashMap::new(),
		);

		let preset = snapshot.filter_by_preset(id).unwrap();
		// Oldest first, ready or not.
		assert_eq!(preset.expired, vec![one.workspace_id, two.workspace_id]);
		assert!(preset.extraneous.is_empty());
	}

	#[test]
	fn test_extraneous_selects_oldest_eligible() {
		let def = definition(1, true);
		let id = def.preset_id;
		let oldest = running(id, true, 300);
		let newer = running(id, true, 30);
		let snapshot = ReconciliationSnapshot::new(
			Utc::now(),
			vec![def],
			vec![newer.clone(), oldest.clone()],
			vec![],
			vec![],
			HashMap::new(),
		);

		let preset = snapshot.filter_by_preset(id).unwrap();
		assert_eq!(preset.actual, 2);
		assert_eq!(preset.extraneous, vec![oldest.workspace_id]);
	}

	#[test]
	fn test_extraneous_never_selects_in_flight() {
		// Two in-flight plus one eligible against desired=1: the excess is two,
		// but only the eligible prebuild may be nominated for deletion.
		let def = definition(1, true);
		let id = def.preset_id;
		let only_eligible = running(id, true, 300);
		let snapshot = ReconciliationSnapshot::new(
			Utc::now(),
			vec![def],
			vec![only_eligible.clone()],
			vec![
				InFlightPrebuild {
					workspace_id: Uuid::new_v4(),
					preset_id: id,
				},
				InFlightPrebuild {
					workspace_id: Uuid::new_v4(),
					preset_id: id,
				},
			],
			vec![],
			HashMap::new(),
		);

		let preset = snapshot.filter_by_preset(id).unwrap();
		assert_eq!(preset.actual, 3);
		assert_eq!(preset.extraneous, vec![only_eligible.workspace_id]);
	}

	#[test]
	fn test_filter_by_preset_unknown_id() {
		let snapshot = ReconciliationSnapshot::new(
			Utc::now(),
			vec![],
			vec![],
			vec![],
			vec![],
			HashMap::new(),
		);
		assert!(snapshot.filter_by_preset(Uuid::new_v4()).is_none());
	}
}
