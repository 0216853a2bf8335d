// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Workspaces and their agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
	format_timestamp, parse_enum, parse_id, parse_opt_timestamp, parse_timestamp,
	AgentLifecycleState,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
	pub id: Uuid,
	pub template_id: Uuid,
	pub owner_id: Uuid,
	pub name: String,
	pub deleted: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceAgent {
	pub id: Uuid,
	pub workspace_id: Uuid,
	pub name: String,
	pub lifecycle_state: AgentLifecycleState,
	pub ready_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct WorkspaceRepository {
	pool: SqlitePool,
}

impl WorkspaceRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn create_workspace(
		&self,
		template_id: Uuid,
		owner_id: Uuid,
		name: &str,
	) -> Result<Workspace> {
		let now = Utc::now();
		let workspace = Workspace {
			id: Uuid::new_v4(),
			template_id,
			owner_id,
			name: name.to_string(),
			deleted: false,
			created_at: now,
			updated_at: now,
		};
		sqlx::query(
			r#"
			INSERT INTO workspaces (id, template_id, owner_id, name, deleted, created_at, updated_at)
			VALUES (?, ?, ?, ?, 0, ?, ?)
			"#,
		)
		.bind(workspace.id.to_string())
		.bind(workspace.template_id.to_string())
		.bind(workspace.owner_id.to_string())
		.bind(&workspace.name)
		.bind(format_timestamp(workspace.created_at))
		.bind(format_timestamp(workspace.updated_at))
		.execute(&self.pool)
		.await?;
		Ok(workspace)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_workspace(&self, id: Uuid) -> Result<Option<Workspace>> {
		let row = sqlx::query_as::<_, (String, String, String, String, bool, String, String)>(
			r#"
			SELECT id, template_id, owner_id, name, deleted, created_at, updated_at
			FROM workspaces WHERE id = ?
			"#,
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(Self::map_workspace).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_workspaces_by_template(&self, template_id: Uuid) -> Result<Vec<Workspace>> {
		let rows = sqlx::query_as::<_, (String, String, String, String, bool, String, String)>(
			r#"
			SELECT id, template_id, owner_id, name, deleted, created_at, updated_at
			FROM workspaces WHERE template_id = ? ORDER BY created_at
			"#,
		)
		.bind(template_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(Self::map_workspace).collect()
	}

	/// Flag a workspace as deleted once its delete build has been applied.
	#[tracing::instrument(skip(self))]
	pub async fn mark_deleted(&self, id: Uuid) -> Result<()> {
		sqlx::query("UPDATE workspaces SET deleted = 1, updated_at = ? WHERE id = ?")
			.bind(format_timestamp(Utc::now()))
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn create_agent(&self, workspace_id: Uuid, name: &str) -> Result<WorkspaceAgent> {
		let agent = WorkspaceAgent {
			id: Uuid::new_v4(),
			workspace_id,
			name: name.to_string(),
			lifecycle_state: AgentLifecycleState::Created,
			ready_at: None,
		};
		sqlx::query(
			"INSERT INTO workspace_agents (id, workspace_id, name, lifecycle_state) VALUES (?, ?, ?, ?)",
		)
		.bind(agent.id.to_string())
		.bind(agent.workspace_id.to_string())
		.bind(&agent.name)
		.bind(agent.lifecycle_state.as_str())
		.execute(&self.pool)
		.await?;
		Ok(agent)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_agents(&self, workspace_id: Uuid) -> Result<Vec<WorkspaceAgent>> {
		let rows = sqlx::query_as::<_, (String, String, String, String, Option<String>)>(
			r#"
			SELECT id, workspace_id, name, lifecycle_state, ready_at
			FROM workspace_agents WHERE workspace_id = ? ORDER BY name
			"#,
		)
		.bind(workspace_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter()
			.map(|(id, workspace_id, name, lifecycle_state, ready_at)| {
				Ok(WorkspaceAgent {
					id: parse_id(&id)?,
					workspace_id: parse_id(&workspace_id)?,
					name,
					lifecycle_state: parse_enum(&lifecycle_state)?,
					ready_at: parse_opt_timestamp(ready_at)?,
				})
			})
			.collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn update_agent_lifecycle(
		&self,
		agent_id: Uuid,
		state: AgentLifecycleState,
	) -> Result<()> {
		let ready_at = match state {
			AgentLifecycleState::Ready => Some(format_timestamp(Utc::now())),
			_ => None,
		};
		sqlx::query("UPDATE workspace_agents SET lifecycle_state = ?, ready_at = ? WHERE id = ?")
			.bind(state.as_str())
			.bind(ready_at)
			.bind(agent_id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Move every agent of a workspace to `ready` in one statement. Used by
	/// the prebuild-ready notification path.
	#[tracing::instrument(skip(self))]
	pub async fn set_agents_ready(&self, workspace_id: Uuid) -> Result<u64> {
		let result = sqlx::query(
			r#"
			UPDATE workspace_agents SET lifecycle_state = 'ready', ready_at = ?
			WHERE workspace_id = ? AND lifecycle_state <> 'ready'
			"#,
		)
		.bind(format_timestamp(Utc::now()))
		.bind(workspace_id.to_string())
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected())
	}

	fn map_workspace(
		row: (String, String, String, String, bool, String, String),
	) -> Result<Workspace> {
		let (id, template_id, owner_id, name, deleted, created_at, updated_at) = row;
		Ok(Workspace {
			id: parse_id(&id)?,
			template_id: parse_id(&template_id)?,
			owner_id: parse_id(&owner_id)?,
			name,
			deleted,
			created_at: parse_timestamp(&created_at)?,
			updated_at: parse_timestamp(&updated_at)?,
		})
	}
}
