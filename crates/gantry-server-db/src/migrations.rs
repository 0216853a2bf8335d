// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Idempotent schema setup, applied at startup and by test pools.

use sqlx::SqlitePool;

use crate::error::Result;

const SCHEMA: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS users (
		id TEXT PRIMARY KEY,
		username TEXT NOT NULL UNIQUE,
		is_system INTEGER NOT NULL DEFAULT 0,
		created_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS templates (
		id TEXT PRIMARY KEY,
		name TEXT NOT NULL UNIQUE,
		active_version_id TEXT,
		created_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS template_versions (
		id TEXT PRIMARY KEY,
		template_id TEXT NOT NULL REFERENCES templates(id),
		name TEXT NOT NULL,
		job_id TEXT,
		created_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS presets (
		id TEXT PRIMARY KEY,
		template_version_id TEXT NOT NULL REFERENCES template_versions(id),
		name TEXT NOT NULL,
		created_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS preset_parameters (
		preset_id TEXT NOT NULL REFERENCES presets(id) ON DELETE CASCADE,
		name TEXT NOT NULL,
		value TEXT NOT NULL,
		PRIMARY KEY (preset_id, name)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS preset_prebuilds (
		id TEXT PRIMARY KEY,
		preset_id TEXT NOT NULL UNIQUE REFERENCES presets(id) ON DELETE CASCADE,
		desired_instances INTEGER NOT NULL CHECK (desired_instances >= 0)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS workspaces (
		id TEXT PRIMARY KEY,
		template_id TEXT NOT NULL REFERENCES templates(id),
		owner_id TEXT NOT NULL REFERENCES users(id),
		name TEXT NOT NULL,
		deleted INTEGER NOT NULL DEFAULT 0,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS provisioner_jobs (
		id TEXT PRIMARY KEY,
		status TEXT NOT NULL,
		error TEXT,
		initiator_id TEXT NOT NULL REFERENCES users(id),
		created_at TEXT NOT NULL,
		started_at TEXT,
		completed_at TEXT,
		canceled_at TEXT
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS workspace_builds (
		id TEXT PRIMARY KEY,
		workspace_id TEXT NOT NULL REFERENCES workspaces(id),
		template_version_id TEXT NOT NULL REFERENCES template_versions(id),
		preset_id TEXT REFERENCES presets(id),
		build_number INTEGER NOT NULL,
		transition TEXT NOT NULL,
		reason TEXT NOT NULL,
		initiator_id TEXT NOT NULL REFERENCES users(id),
		job_id TEXT NOT NULL REFERENCES provisioner_jobs(id),
		created_at TEXT NOT NULL,
		UNIQUE (workspace_id, build_number)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS workspace_build_parameters (
		build_id TEXT NOT NULL REFERENCES workspace_builds(id) ON DELETE CASCADE,
		name TEXT NOT NULL,
		value TEXT NOT NULL,
		PRIMARY KEY (build_id, name)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS workspace_agents (
		id TEXT PRIMARY KEY,
		workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
		name TEXT NOT NULL,
		lifecycle_state TEXT NOT NULL DEFAULT 'created',
		ready_at TEXT
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS advisory_locks (
		key TEXT PRIMARY KEY,
		holder TEXT NOT NULL,
		expires_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS audit_logs (
		id TEXT PRIMARY KEY,
		event_type TEXT NOT NULL,
		actor_id TEXT NOT NULL,
		resource_type TEXT NOT NULL,
		resource_id TEXT NOT NULL,
		detail TEXT,
		timestamp TEXT NOT NULL
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_workspace_builds_workspace ON workspace_builds(workspace_id, build_number)",
	"CREATE INDEX IF NOT EXISTS idx_workspace_builds_preset ON workspace_builds(preset_id)",
	"CREATE INDEX IF NOT EXISTS idx_workspaces_owner ON workspaces(owner_id)",
	"CREATE INDEX IF NOT EXISTS idx_workspace_agents_workspace ON workspace_agents(workspace_id)",
	"CREATE INDEX IF NOT EXISTS idx_audit_logs_event ON audit_logs(event_type, timestamp)",
];

/// Apply the schema. Safe to run on every startup.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	for statement in SCHEMA {
		sqlx::query(statement).execute(pool).await?;
	}
	tracing::debug!(statements = SCHEMA.len(), "schema applied");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	#[tokio::test]
	async fn test_migrations_are_idempotent() {
		let pool = create_test_pool().await;
		run_migrations(&pool).await.unwrap();
	}

	#[tokio::test]
	async fn test_negative_desired_instances_rejected() {
		let pool = create_test_pool().await;

		let result = sqlx::query(
			"INSERT INTO preset_prebuilds (id, preset_id, desired_instances) VALUES ('a', 'b', -1)",
		)
		.execute(&pool)
		.await;
		assert!(result.is_err());
	}
}
