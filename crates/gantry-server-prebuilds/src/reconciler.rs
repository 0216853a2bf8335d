// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The prebuild reconciliation loop.
//!
//! One pass reads a consistent snapshot of every pool, computes per-preset
//! actions, and executes them: a `start` build for each missing prebuild, a
//! `delete` build for each expired or extraneous one. Passes run under a
//! cross-replica advisory lock; a replica that loses the lock skips its pass,
//! because another replica is already doing the same work.
//!
//! Errors are absorbed at preset granularity so one broken pool cannot starve
//! the others. Provisioner failures surface in the next snapshot as backoff
//! state, which suspends creates for that preset without blocking deletes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use gantry_prebuilds_core::{
	determine_actions, PresetSnapshot, ReconciliationActions, ReconciliationSnapshot,
};
use gantry_server_db::{
	AuditEvent, AuditRepository, BuildReason, BuildRepository, BuildRequest, CreatePrebuildParams,
	DbError, LockRepository, PrebuildsRepository, UserRepository, WorkspaceTransition,
	PREBUILDS_USER_ID, RECONCILE_LOCK_KEY,
};
use gantry_server_pubsub::{
	Pubsub, PREBUILD_CREATED_CHANNEL, PREBUILD_READY_CHANNEL, PREBUILD_RECONCILE_CHANNEL,
};

use crate::error::{PrebuildsError, Result};
use crate::metrics::PrebuildMetrics;
use crate::settings::ReconcilerSettings;

pub struct StoreReconciler {
	prebuilds: PrebuildsRepository,
	builds: BuildRepository,
	users: UserRepository,
	audit: AuditRepository,
	locks: LockRepository,
	pool: SqlitePool,
	pubsub: Arc<dyn Pubsub>,
	metrics: Arc<PrebuildMetrics>,
	settings: ReconcilerSettings,
	/// Distinguishes this replica's advisory-lock leases from its peers'.
	replica_id: Uuid,
	/// Last observed in-window failure count per preset, for counter deltas.
	seen_failures: Mutex<HashMap<Uuid, u32>>,
}

impl StoreReconciler {
	pub fn new(
		pool: SqlitePool,
		pubsub: Arc<dyn Pubsub>,
		settings: ReconcilerSettings,
		metrics: Arc<PrebuildMetrics>,
	) -> Self {
		Self {
			prebuilds: PrebuildsRepository::new(pool.clone()),
			builds: BuildRepository::new(pool.clone()),
			users: UserRepository::new(pool.clone()),
			audit: AuditRepository::new(pool.clone()),
			locks: LockRepository::new(pool.clone()),
			pool,
			pubsub,
			metrics,
			settings,
			replica_id: Uuid::new_v4(),
			seen_failures: Mutex::new(HashMap::new()),
		}
	}

	/// Startup validation. The reconciler refuses to run without the
	/// well-known prebuilds user, or with a corrupt pool definition.
	#[tracing::instrument(skip(self))]
	pub async fn validate_startup(&self) -> Result<()> {
		if self.users.get_user(PREBUILDS_USER_ID).await?.is_none() {
			return Err(PrebuildsError::MissingPrebuildsUser);
		}

		let invalid: Vec<(String, i64)> = sqlx::query_as(
			"SELECT preset_id, desired_instances FROM preset_prebuilds WHERE desired_instances < 0",
		)
		.fetch_all(&self.pool)
		.await
		.map_err(DbError::from)?;
		if let Some((preset_id, desired)) = invalid.into_iter().next() {
			return Err(PrebuildsError::InvalidPrebuildSpec { preset_id, desired });
		}

		Ok(())
	}

	/// Run the control loop until a shutdown signal arrives. Wakes on the
	/// periodic tick and on any prebuild pubsub message; both funnel into the
	/// same full reconciliation pass, so a dropped message only costs
	/// latency.
	#[tracing::instrument(skip_all, fields(replica_id = %self.replica_id))]
	pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
		let mut tick = tokio::time::interval(self.settings.reconciliation_interval);
		tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

		let mut created = self.pubsub.subscribe(PREBUILD_CREATED_CHANNEL);
		let mut ready = self.pubsub.subscribe(PREBUILD_READY_CHANNEL);
		let mut nudged = self.pubsub.subscribe(PREBUILD_RECONCILE_CHANNEL);

		loop {
			let wake = tokio::select! {
				_ = tick.tick() => "interval",
				_ = wake_signal(&mut created) => PREBUILD_CREATED_CHANNEL,
				_ = wake_signal(&mut ready) => PREBUILD_READY_CHANNEL,
				_ = wake_signal(&mut nudged) => PREBUILD_RECONCILE_CHANNEL,
				_ = shutdown.recv() => {
					tracing::info!("prebuild reconciler shutting down");
					return;
				}
			};

			tracing::debug!(wake, "reconciling prebuild pools");
			if let Err(error) = self.reconcile_all().await {
				tracing::warn!(%error, wake, "reconciliation pass failed");
			}
		}
	}

	/// One full pass over every pool, under the cross-replica lock. Skips
	/// silently when another replica holds the lock.
	#[tracing::instrument(skip(self), fields(replica_id = %self.replica_id))]
	pub async fn reconcile_all(&self) -> Result<()> {
		match self
			.locks
			.acquire_advisory_lock(RECONCILE_LOCK_KEY, self.replica_id, self.settings.lock_ttl)
			.await
		{
			Ok(()) => {}
			Err(DbError::LockNotAcquired(_)) => {
				tracing::debug!("another replica is reconciling; skipping this pass");
				return Ok(());
			}
			Err(error) => return Err(error.into()),
		}

		let outcome = self.reconcile_locked().await;

		if let Err(error) = self
			.locks
			.release_advisory_lock(RECONCILE_LOCK_KEY, self.replica_id)
			.await
		{
			tracing::warn!(%error, "failed to release reconciliation lock; lease will expire");
		}

		outcome
	}

	async fn reconcile_locked(&self) -> Result<()> {
		let snapshot = self.snapshot_state().await?;

		for preset in &snapshot.presets {
			self.observe_preset(preset);
			if let Err(error) = self.reconcile_preset(preset, snapshot.as_of).await {
				tracing::warn!(
					preset_id = %preset.preset_id,
					preset = %preset.preset_name,
					%error,
					"failed to reconcile preset; continuing with the rest"
				);
			}
		}

		Ok(())
	}

	/// One consistent read of everything a pass needs.
	#[tracing::instrument(skip(self))]
	pub async fn snapshot_state(&self) -> Result<ReconciliationSnapshot> {
		let as_of = Utc::now();
		let definitions = self.prebuilds.snapshot_presets().await?;
		let running = self.prebuilds.get_running_prebuilds().await?;
		let in_flight = self.prebuilds.get_in_flight_prebuilds().await?;
		let exceptional = self.prebuilds.get_exceptional_prebuilds().await?;

		let mut backoffs = HashMap::new();
		for definition in &definitions {
			if let Some(backoff) = self
				.prebuilds
				.get_preset_backoff(definition.preset_id, self.settings.backoff_lookback, as_of)
				.await?
			{
				backoffs.insert(definition.preset_id, backoff);
			}
		}

		Ok(ReconciliationSnapshot::new(
			as_of,
			definitions,
			running,
			in_flight,
			exceptional,
			backoffs,
		))
	}

	async fn reconcile_preset(&self, preset: &PresetSnapshot, now: DateTime<Utc>) -> Result<()> {
		let actions = determine_actions(preset, now, self.settings.backoff_interval);
		self.log_actions(preset, &actions);

		for workspace_id in &actions.delete_ids {
			if let Err(error) = self.delete_prebuild(preset, *workspace_id).await {
				tracing::warn!(
					workspace_id = %workspace_id,
					preset = %preset.preset_name,
					%error,
					"failed to enqueue prebuild deletion"
				);
			}
		}

		for _ in 0..actions.create {
			if let Err(error) = self.create_prebuild(preset).await {
				tracing::warn!(
					preset = %preset.preset_name,
					%error,
					"failed to enqueue prebuild creation"
				);
				self
					.metrics
					.record_failed(&preset.template_name, &preset.preset_name, 1);
			}
		}

		Ok(())
	}

	/// Each create runs in its own transaction; one failure does not abort
	/// the rest of the batch.
	async fn create_prebuild(&self, preset: &PresetSnapshot) -> Result<()> {
		let name = generate_prebuild_name(&preset.preset_name);
		let workspace_id = self
			.prebuilds
			.create_prebuild_workspace(&CreatePrebuildParams {
				template_id: preset.template_id,
				template_version_id: preset.template_version_id,
				preset_id: preset.preset_id,
				name: name.clone(),
			})
			.await?;

		self
			.metrics
			.record_created(&preset.template_name, &preset.preset_name);
		self
			.audit
			.append(
				AuditEvent::PrebuildCreated,
				PREBUILDS_USER_ID,
				"workspace",
				workspace_id,
				Some(serde_json::json!({ "preset_id": preset.preset_id, "name": name })),
			)
			.await?;

		tracing::info!(
			workspace_id = %workspace_id,
			preset = %preset.preset_name,
			template = %preset.template_name,
			name = %name,
			"provisioning prebuild workspace"
		);
		Ok(())
	}

	async fn delete_prebuild(&self, preset: &PresetSnapshot, workspace_id: Uuid) -> Result<()> {
		self
			.builds
			.enqueue_build(&BuildRequest {
				workspace_id,
				template_version_id: preset.template_version_id,
				preset_id: Some(preset.preset_id),
				transition: WorkspaceTransition::Delete,
				reason: BuildReason::PrebuildCleanup,
				initiator_id: PREBUILDS_USER_ID,
				parameters: Vec::new(),
			})
			.await?;

		self
			.audit
			.append(
				AuditEvent::PrebuildDeleted,
				PREBUILDS_USER_ID,
				"workspace",
				workspace_id,
				Some(serde_json::json!({ "preset_id": preset.preset_id })),
			)
			.await?;

		tracing::info!(
			workspace_id = %workspace_id,
			preset = %preset.preset_name,
			"deleting prebuild workspace"
		);
		Ok(())
	}

	/// Refresh gauges and convert in-window failure counts into monotonic
	/// counter increments.
	fn observe_preset(&self, preset: &PresetSnapshot) {
		self.metrics.set_pool_gauges(
			&preset.template_name,
			&preset.preset_name,
			preset.desired,
			preset.actual,
			preset.eligible,
		);

		let observed = preset.backoff.map(|b| b.num_failed).unwrap_or(0);
		let mut seen = self
			.seen_failures
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		let prior = seen.insert(preset.preset_id, observed).unwrap_or(0);
		if observed > prior {
			self.metrics.record_failed(
				&preset.template_name,
				&preset.preset_name,
				(observed - prior) as u64,
			);
		}
	}

	fn log_actions(&self, preset: &PresetSnapshot, actions: &ReconciliationActions) {
		if let Some(until) = actions.backoff_until {
			tracing::info!(
				preset = %preset.preset_name,
				num_failed = preset.backoff.map(|b| b.num_failed).unwrap_or(0),
				until = %until,
				"pool is backing off after failed builds"
			);
		}
		if actions.create > 0 || !actions.delete_ids.is_empty() {
			tracing::debug!(
				preset = %preset.preset_name,
				desired = preset.desired,
				actual = preset.actual,
				eligible = preset.eligible,
				create = actions.create,
				delete = actions.delete_ids.len(),
				"computed pool actions"
			);
		}
	}
}

/// Resolves when the receiver yields a message or reports shed messages;
/// pends forever once the channel is closed so the select falls back to the
/// periodic tick.
async fn wake_signal(rx: &mut broadcast::Receiver<Vec<u8>>) {
	loop {
		match rx.recv().await {
			Ok(_) => return,
			Err(broadcast::error::RecvError::Lagged(shed)) => {
				tracing::debug!(shed, "pubsub shed messages; reconciling anyway");
				return;
			}
			Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
		}
	}
}

/// `<preset>-<6-byte-random-hex>`, matching the workspace name constraints
/// presets already satisfy.
fn generate_prebuild_name(base: &str) -> String {
	let suffix = fastrand::u64(..) & 0xffff_ffff_ffff;
	format!("{base}-{suffix:012x}")
}
