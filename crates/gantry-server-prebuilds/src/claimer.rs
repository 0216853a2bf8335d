// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The claim path: atomic transfer of an idle prebuild to a user.
//!
//! Claiming happens on the workspace-creation request path. When the request
//! names a preset whose pool has an eligible member, ownership flips to the
//! user in a single store transaction, and a follow-on `start` build is
//! enqueued under the user's identity carrying the preset's parameter values
//! merged with the user's overrides. An empty pool is not an error: the
//! caller falls through to regular provisioning.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use gantry_server_db::{
	BuildReason, BuildRepository, BuildRequest, ClaimPrebuildParams, DbError, PrebuildsRepository,
	PresetRepository, TemplateRepository, WorkspaceTransition,
};
use gantry_server_pubsub::{Pubsub, PREBUILD_RECONCILE_CHANNEL};

use crate::error::Result;
use crate::metrics::PrebuildMetrics;

#[derive(Debug, Clone)]
pub struct ClaimRequest {
	pub user_id: Uuid,
	pub workspace_name: String,
	pub preset_id: Uuid,
	/// User-supplied parameter values; they win over the preset's values on
	/// name collisions.
	pub rich_parameter_values: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimedWorkspace {
	pub workspace_id: Uuid,
	pub build_id: Uuid,
}

/// Capability used by the workspace-creation path. Tests substitute spies;
/// production uses [`StoreClaimer`].
#[async_trait]
pub trait Claimer: Send + Sync {
	/// Attempt to claim a prebuild for the request's preset. `Ok(None)` means
	/// no eligible prebuild existed (or a concurrent claim won every race),
	/// and the caller should provision a workspace from scratch.
	async fn claim(&self, request: &ClaimRequest) -> Result<Option<ClaimedWorkspace>>;
}

pub struct StoreClaimer {
	prebuilds: PrebuildsRepository,
	presets: PresetRepository,
	templates: TemplateRepository,
	builds: BuildRepository,
	pubsub: Arc<dyn Pubsub>,
	metrics: Arc<PrebuildMetrics>,
}

impl StoreClaimer {
	pub fn new(pool: SqlitePool, pubsub: Arc<dyn Pubsub>, metrics: Arc<PrebuildMetrics>) -> Self {
		Self {
			prebuilds: PrebuildsRepository::new(pool.clone()),
			presets: PresetRepository::new(pool.clone()),
			templates: TemplateRepository::new(pool.clone()),
			builds: BuildRepository::new(pool),
			pubsub,
			metrics,
		}
	}
}

#[async_trait]
impl Claimer for StoreClaimer {
	#[tracing::instrument(skip(self, request), fields(preset_id = %request.preset_id, user_id = %request.user_id))]
	async fn claim(&self, request: &ClaimRequest) -> Result<Option<ClaimedWorkspace>> {
		let claimed = match self
			.prebuilds
			.claim_prebuild(&ClaimPrebuildParams {
				new_user_id: request.user_id,
				new_name: request.workspace_name.clone(),
				preset_id: request.preset_id,
			})
			.await
		{
			Ok(claimed) => claimed,
			Err(DbError::NoEligiblePrebuild(preset_id)) => {
				tracing::debug!(%preset_id, "no eligible prebuild; falling through to regular provisioning");
				return Ok(None);
			}
			Err(error) => return Err(error.into()),
		};

		let preset = self
			.presets
			.get_preset(request.preset_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("preset {}", request.preset_id)))?;

		// The handoff point: user-supplied configuration is materialized by
		// the follow-on build, under the user's identity.
		let mut parameters: BTreeMap<String, String> = self
			.presets
			.get_preset_parameters(preset.id)
			.await?
			.into_iter()
			.collect();
		parameters.extend(request.rich_parameter_values.iter().cloned());

		let build = self
			.builds
			.enqueue_build(&BuildRequest {
				workspace_id: claimed.workspace_id,
				template_version_id: preset.template_version_id,
				preset_id: Some(preset.id),
				transition: WorkspaceTransition::Start,
				reason: BuildReason::PrebuildClaim,
				initiator_id: request.user_id,
				parameters: parameters.into_iter().collect(),
			})
			.await?;

		if let Some(version) = self
			.templates
			.get_template_version(preset.template_version_id)
			.await?
		{
			if let Some(template) = self.templates.get_template(version.template_id).await? {
				self
					.metrics
					.record_assigned(&template.name, &preset.name);
			}
		}

		// Nudge the reconciler to replenish the pool. Best-effort: the
		// periodic tick covers a lost message.
		if let Err(error) = self
			.pubsub
			.publish(
				PREBUILD_RECONCILE_CHANNEL,
				request.preset_id.to_string().as_bytes(),
			)
			.await
		{
			tracing::warn!(%error, "failed to publish pool replenishment nudge");
		}

		tracing::info!(
			workspace_id = %claimed.workspace_id,
			build_id = %build.id,
			preset = %preset.name,
			"claimed prebuild for user"
		);
		Ok(Some(ClaimedWorkspace {
			workspace_id: claimed.workspace_id,
			build_id: build.id,
		}))
	}
}
