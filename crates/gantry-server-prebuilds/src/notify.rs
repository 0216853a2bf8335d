// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pubsub entry points that feed the reconciliation loop.

use sqlx::SqlitePool;
use uuid::Uuid;

use gantry_server_db::{DbError, WorkspaceRepository, PREBUILDS_USER_ID};
use gantry_server_pubsub::{Pubsub, PREBUILD_CREATED_CHANNEL, PREBUILD_READY_CHANNEL};

use crate::error::Result;

/// Announce that a preset's pool definition was added or resized, so the
/// reconciler picks it up without waiting for the next tick.
pub async fn announce_pool_definition(pubsub: &dyn Pubsub, preset_id: Uuid) -> Result<()> {
	pubsub
		.publish(PREBUILD_CREATED_CHANNEL, preset_id.to_string().as_bytes())
		.await?;
	Ok(())
}

/// Agent-facing readiness notification: mark every agent of the workspace
/// `ready` and broadcast that the prebuild became claimable.
///
/// Returns `false` without touching anything when the workspace is not an
/// unclaimed prebuild. The agent path calls this for every workspace, and
/// claimed or user-owned workspaces have nothing to report.
#[tracing::instrument(skip(pool, pubsub))]
pub async fn mark_prebuild_ready(
	pool: &SqlitePool,
	pubsub: &dyn Pubsub,
	workspace_id: Uuid,
) -> Result<bool> {
	let workspaces = WorkspaceRepository::new(pool.clone());
	let workspace = workspaces
		.get_workspace(workspace_id)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("workspace {workspace_id}")))?;

	if workspace.owner_id != PREBUILDS_USER_ID || workspace.deleted {
		return Ok(false);
	}

	workspaces.set_agents_ready(workspace_id).await?;
	pubsub
		.publish(PREBUILD_READY_CHANNEL, workspace_id.to_string().as_bytes())
		.await?;

	tracing::info!(workspace_id = %workspace_id, "prebuild is ready to be claimed");
	Ok(true)
}
