// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared fixtures for store-backed tests.
//!
//! The pool is capped at a single connection so that `:memory:` databases
//! are shared between every query in a test, and timestamps can be chosen
//! freely by inserting rows directly rather than going through the
//! repositories.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::migrations::run_migrations;
use crate::preset::PresetRepository;
use crate::template::TemplateRepository;
use crate::types::{format_timestamp, AgentLifecycleState, ProvisionerJobStatus, WorkspaceTransition};
use crate::user::{UserRepository, PREBUILDS_USER_ID};

pub async fn create_test_pool() -> SqlitePool {
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect(":memory:")
		.await
		.unwrap();
	run_migrations(&pool).await.unwrap();
	pool
}

/// A template with one active version carrying one preset with a prebuild
/// pool definition.
#[derive(Debug, Clone, Copy)]
pub struct SeededPreset {
	pub template_id: Uuid,
	pub template_version_id: Uuid,
	pub preset_id: Uuid,
}

pub async fn seed_template_with_preset(pool: &SqlitePool, desired: u32) -> SeededPreset {
	UserRepository::new(pool.clone())
		.ensure_prebuilds_user()
		.await
		.unwrap();

	let templates = TemplateRepository::new(pool.clone());
	let template = templates
		.create_template(&format!("docker-{}", Uuid::new_v4()))
		.await
		.unwrap();
	let version = templates
		.create_template_version(template.id, "v1", None)
		.await
		.unwrap();
	templates
		.set_active_version(template.id, version.id)
		.await
		.unwrap();

	let presets = PresetRepository::new(pool.clone());
	let preset = presets.create_preset(version.id, "big").await.unwrap();
	presets
		.set_preset_parameters(
			preset.id,
			&[("cpu".to_string(), "8".to_string())],
		)
		.await
		.unwrap();
	presets.upsert_prebuild_spec(preset.id, desired).await.unwrap();

	SeededPreset {
		template_id: template.id,
		template_version_id: version.id,
		preset_id: preset.id,
	}
}

/// Raw material for one prebuild workspace in a chosen state.
#[derive(Debug, Clone)]
pub struct PrebuildSeed {
	pub template_id: Uuid,
	pub template_version_id: Uuid,
	pub preset_id: Uuid,
	pub transition: WorkspaceTransition,
	pub job_status: ProvisionerJobStatus,
	pub created_at: DateTime<Utc>,
	pub agent_states: Vec<AgentLifecycleState>,
}

/// Insert a prebuild workspace with its latest build and job in the given
/// state. Rows are written directly so tests control every timestamp: jobs
/// past `pending` get `started_at`, terminal jobs get `completed_at`, all
/// pinned to the seed's `created_at`.
pub async fn seed_prebuild(pool: &SqlitePool, seed: &PrebuildSeed) -> Uuid {
	let created_at = format_timestamp(seed.created_at);
	let workspace_id = Uuid::new_v4();
	sqlx::query(
		r#"
		INSERT INTO workspaces (id, template_id, owner_id, name, deleted, created_at, updated_at)
		VALUES (?, ?, ?, ?, 0, ?, ?)
		"#,
	)
	.bind(workspace_id.to_string())
	.bind(seed.template_id.to_string())
	.bind(PREBUILDS_USER_ID.to_string())
	.bind(format!("prebuild-{}", &workspace_id.to_string()[..8]))
	.bind(&created_at)
	.bind(&created_at)
	.execute(pool)
	.await
	.unwrap();

	let started_at = match seed.job_status {
		ProvisionerJobStatus::Pending => None,
		_ => Some(created_at.clone()),
	};
	let completed_at = match seed.job_status {
		ProvisionerJobStatus::Succeeded
		| ProvisionerJobStatus::Failed
		| ProvisionerJobStatus::Canceled => Some(created_at.clone()),
		_ => None,
	};
	let canceled_at = match seed.job_status {
		ProvisionerJobStatus::Canceling | ProvisionerJobStatus::Canceled => {
			Some(created_at.clone())
		}
		_ => None,
	};
	let error = match seed.job_status {
		ProvisionerJobStatus::Failed => Some("build failed"),
		_ => None,
	};

	let job_id = Uuid::new_v4();
	sqlx::query(
		r#"
		INSERT INTO provisioner_jobs (id, status, error, initiator_id, created_at, started_at, completed_at, canceled_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(job_id.to_string())
	.bind(seed.job_status.as_str())
	.bind(error)
	.bind(PREBUILDS_USER_ID.to_string())
	.bind(&created_at)
	.bind(started_at)
	.bind(completed_at)
	.bind(canceled_at)
	.execute(pool)
	.await
	.unwrap();

	sqlx::query(
		r#"
		INSERT INTO workspace_builds
			(id, workspace_id, template_version_id, preset_id, build_number, transition, reason, initiator_id, job_id, created_at)
		VALUES (?, ?, ?, ?, 1, ?, 'prebuild', ?, ?, ?)
		"#,
	)
	.bind(Uuid::new_v4().to_string())
	.bind(workspace_id.to_string())
	.bind(seed.template_version_id.to_string())
	.bind(seed.preset_id.to_string())
	.bind(seed.transition.as_str())
	.bind(PREBUILDS_USER_ID.to_string())
	.bind(job_id.to_string())
	.bind(&created_at)
	.execute(pool)
	.await
	.unwrap();

	for (index, state) in seed.agent_states.iter().enumerate() {
		let ready_at = match state {
			AgentLifecycleState::Ready => Some(created_at.clone()),
			_ => None,
		};
		sqlx::query(
			"INSERT INTO workspace_agents (id, workspace_id, name, lifecycle_state, ready_at) VALUES (?, ?, ?, ?, ?)",
		)
		.bind(Uuid::new_v4().to_string())
		.bind(workspace_id.to_string())
		.bind(format!("agent-{index}"))
		.bind(state.as_str())
		.bind(ready_at)
		.execute(pool)
		.await
		.unwrap();
	}

	workspace_id
}
