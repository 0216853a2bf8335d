// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Workspace builds and their provisioner jobs.
//!
//! A build is one entry in a workspace's ordered history; the job is the
//! asynchronous unit of work the provisioner executes for it. Enqueueing a
//! build inserts both rows (plus any rich parameter values) in a single
//! transaction so the history can never reference a missing job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
	format_timestamp, parse_enum, parse_id, parse_opt_id, parse_opt_timestamp, parse_timestamp,
	BuildReason, ProvisionerJobStatus, WorkspaceTransition,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceBuild {
	pub id: Uuid,
	pub workspace_id: Uuid,
	pub template_version_id: Uuid,
	pub preset_id: Option<Uuid>,
	pub build_number: i64,
	pub transition: WorkspaceTransition,
	pub reason: BuildReason,
	pub initiator_id: Uuid,
	pub job_id: Uuid,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerJob {
	pub id: Uuid,
	pub status: ProvisionerJobStatus,
	pub error: Option<String>,
	pub initiator_id: Uuid,
	pub created_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub canceled_at: Option<DateTime<Utc>>,
}

/// Everything needed to append one build to a workspace's history.
#[derive(Debug, Clone)]
pub struct BuildRequest {
	pub workspace_id: Uuid,
	pub template_version_id: Uuid,
	pub preset_id: Option<Uuid>,
	pub transition: WorkspaceTransition,
	pub reason: BuildReason,
	pub initiator_id: Uuid,
	pub parameters: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct BuildRepository {
	pool: SqlitePool,
}

impl BuildRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Append a build and its pending job in one transaction.
	#[tracing::instrument(skip(self, request), fields(workspace_id = %request.workspace_id, transition = request.transition.as_str()))]
	pub async fn enqueue_build(&self, request: &BuildRequest) -> Result<WorkspaceBuild> {
		let mut tx = self.pool.begin().await?;

		let now = Utc::now();
		let job_id = Uuid::new_v4();
		sqlx::query(
			"INSERT INTO provisioner_jobs (id, status, initiator_id, created_at) VALUES (?, 'pending', ?, ?)",
		)
		.bind(job_id.to_string())
		.bind(request.initiator_id.to_string())
		.bind(format_timestamp(now))
		.execute(&mut *tx)
		.await?;

		let (next_number,): (i64,) = sqlx::query_as(
			"SELECT COALESCE(MAX(build_number), 0) + 1 FROM workspace_builds WHERE workspace_id = ?",
		)
		.bind(request.workspace_id.to_string())
		.fetch_one(&mut *tx)
		.await?;

		let build = WorkspaceBuild {
			id: Uuid::new_v4(),
			workspace_id: request.workspace_id,
			template_version_id: request.template_version_id,
			preset_id: request.preset_id,
			build_number: next_number,
			transition: request.transition,
			reason: request.reason,
			initiator_id: request.initiator_id,
			job_id,
			created_at: now,
		};
		sqlx::query(
			r#"
			INSERT INTO workspace_builds
				(id, workspace_id, template_version_id, preset_id, build_number, transition, reason, initiator_id, job_id, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(build.id.to_string())
		.bind(build.workspace_id.to_string())
		.bind(build.template_version_id.to_string())
		.bind(build.preset_id.map(|id| id.to_string()))
		.bind(build.build_number)
		.bind(build.transition.as_str())
		.bind(build.reason.as_str())
		.bind(build.initiator_id.to_string())
		.bind(build.job_id.to_string())
		.bind(format_timestamp(build.created_at))
		.execute(&mut *tx)
		.await?;

		for (name, value) in &request.parameters {
			sqlx::query(
				"INSERT INTO workspace_build_parameters (build_id, name, value) VALUES (?, ?, ?)",
			)
			.bind(build.id.to_string())
			.bind(name)
			.bind(value)
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		tracing::info!(
			workspace_id = %build.workspace_id,
			build_id = %build.id,
			build_number = build.build_number,
			transition = build.transition.as_str(),
			reason = build.reason.as_str(),
			"enqueued workspace build"
		);
		Ok(build)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_latest_build(&self, workspace_id: Uuid) -> Result<Option<WorkspaceBuild>> {
		let row = sqlx::query_as::<_, BuildRow>(
			r#"
			SELECT id, workspace_id, template_version_id, preset_id, build_number,
			       transition, reason, initiator_id, job_id, created_at
			FROM workspace_builds
			WHERE workspace_id = ?
			ORDER BY build_number DESC
			LIMIT 1
			"#,
		)
		.bind(workspace_id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(map_build).transpose()
	}

	/// Full build history, newest first.
	#[tracing::instrument(skip(self))]
	pub async fn get_builds(&self, workspace_id: Uuid) -> Result<Vec<WorkspaceBuild>> {
		let rows = sqlx::query_as::<_, BuildRow>(
			r#"
			SELECT id, workspace_id, template_version_id, preset_id, build_number,
			       transition, reason, initiator_id, job_id, created_at
			FROM workspace_builds
			WHERE workspace_id = ?
			ORDER BY build_number DESC
			"#,
		)
		.bind(workspace_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(map_build).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_build_parameters(&self, build_id: Uuid) -> Result<Vec<(String, String)>> {
		let rows = sqlx::query_as::<_, (String, String)>(
			"SELECT name, value FROM workspace_build_parameters WHERE build_id = ? ORDER BY name",
		)
		.bind(build_id.to_string())
		.fetch_all(&self.pool)
		.await?;
		Ok(rows)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_job(&self, id: Uuid) -> Result<Option<ProvisionerJob>> {
		let row = sqlx::query_as::<_, JobRow>(
			r#"
			SELECT id, status, error, initiator_id, created_at, started_at, completed_at, canceled_at
			FROM provisioner_jobs WHERE id = ?
			"#,
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(map_job).transpose()
	}

	/// Advance a job's lifecycle. The relevant timestamps follow the status:
	/// leaving `pending` stamps `started_at`, terminal states stamp
	/// `completed_at`, cancellation stamps `canceled_at`.
	#[tracing::instrument(skip(self))]
	pub async fn update_job_status(
		&self,
		job_id: Uuid,
		status: ProvisionerJobStatus,
		error: Option<&str>,
	) -> Result<()> {
		let now = format_timestamp(Utc::now());
		let started = !matches!(status, ProvisionerJobStatus::Pending);
		let completed = matches!(
			status,
			ProvisionerJobStatus::Succeeded
				| ProvisionerJobStatus::Failed
				| ProvisionerJobStatus::Canceled
		);
		let canceled = matches!(
			status,
			ProvisionerJobStatus::Canceling | ProvisionerJobStatus::Canceled
		);

		sqlx::query(
			r#"
			UPDATE provisioner_jobs SET
				status = ?,
				error = ?,
				started_at = CASE WHEN ? THEN COALESCE(started_at, ?) ELSE started_at END,
				completed_at = CASE WHEN ? THEN ? ELSE NULL END,
				canceled_at = CASE WHEN ? THEN COALESCE(canceled_at, ?) ELSE canceled_at END
			WHERE id = ?
			"#,
		)
		.bind(status.as_str())
		.bind(error)
		.bind(started)
		.bind(&now)
		.bind(completed)
		.bind(&now)
		.bind(canceled)
		.bind(&now)
		.bind(job_id.to_string())
		.execute(&self.pool)
		.await?;
		Ok(())
	}
}

#[derive(sqlx::FromRow)]
struct BuildRow {
	id: String,
	workspace_id: String,
	template_version_id: String,
	preset_id: Option<String>,
	build_number: i64,
	transition: String,
	reason: String,
	initiator_id: String,
	job_id: String,
	created_at: String,
}

fn map_build(row: BuildRow) -> Result<WorkspaceBuild> {
	Ok(WorkspaceBuild {
		id: parse_id(&row.id)?,
		workspace_id: parse_id(&row.workspace_id)?,
		template_version_id: parse_id(&row.template_version_id)?,
		preset_id: parse_opt_id(row.preset_id)?,
		build_number: row.build_number,
		transition: parse_enum(&row.transition)?,
		reason: parse_enum(&row.reason)?,
		initiator_id: parse_id(&row.initiator_id)?,
		job_id: parse_id(&row.job_id)?,
		created_at: parse_timestamp(&row.created_at)?,
	})
}

#[derive(sqlx::FromRow)]
struct JobRow {
	id: String,
	status: String,
	error: Option<String>,
	initiator_id: String,
	created_at: String,
	started_at: Option<String>,
	completed_at: Option<String>,
	canceled_at: Option<String>,
}

fn map_job(row: JobRow) -> Result<ProvisionerJob> {
	Ok(ProvisionerJob {
		id: parse_id(&row.id)?,
		status: parse_enum(&row.status)?,
		error: row.error,
		initiator_id: parse_id(&row.initiator_id)?,
		created_at: parse_timestamp(&row.created_at)?,
		started_at: parse_opt_timestamp(row.started_at)?,
		completed_at: parse_opt_timestamp(row.completed_at)?,
		canceled_at: parse_opt_timestamp(row.canceled_at)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::template::TemplateRepository;
	use crate::testing::create_test_pool;
	use crate::user::UserRepository;
	use crate::workspace::WorkspaceRepository;

	async fn setup(pool: &SqlitePool) -> (Uuid, Uuid, Uuid) {
		let user = UserRepository::new(pool.clone())
			.create_user("dorothy")
			.await
			.unwrap();
		let templates = TemplateRepository::new(pool.clone());
		let template = templates.create_template("docker").await.unwrap();
		let version = templates
			.create_template_version(template.id, "v1", None)
			.await
			.unwrap();
		let workspace = WorkspaceRepository::new(pool.clone())
			.create_workspace(template.id, user.id, "sandbox")
			.await
			.unwrap();
		(workspace.id, version.id, user.id)
	}

	fn request(workspace_id: Uuid, version_id: Uuid, initiator_id: Uuid) -> BuildRequest {
		BuildRequest {
			workspace_id,
			template_version_id: version_id,
			preset_id: None,
			transition: WorkspaceTransition::Start,
			reason: BuildReason::Initiator,
			initiator_id,
			parameters: vec![("cpu".to_string(), "8".to_string())],
		}
	}

	#[tokio::test]
	async fn test_enqueue_build_assigns_sequential_numbers() {
		let pool = create_test_pool().await;
		let (workspace_id, version_id, user_id) = setup(&pool).await;
		let repo = BuildRepository::new(pool);

		let first = repo
			.enqueue_build(&request(workspace_id, version_id, user_id))
			.await
			.unwrap();
		let second = repo
			.enqueue_build(&request(workspace_id, version_id, user_id))
			.await
			.unwrap();

		assert_eq!(first.build_number, 1);
		assert_eq!(second.build_number, 2);

		let latest = repo.get_latest_build(workspace_id).await.unwrap().unwrap();
		assert_eq!(latest.id, second.id);
	}

	#[tokio::test]
	async fn test_enqueue_build_creates_pending_job_and_parameters() {
		let pool = create_test_pool().await;
		let (workspace_id, version_id, user_id) = setup(&pool).await;
		let repo = BuildRepository::new(pool);

		let build = repo
			.enqueue_build(&request(workspace_id, version_id, user_id))
			.await
			.unwrap();

		let job = repo.get_job(build.job_id).await.unwrap().unwrap();
		assert_eq!(job.status, ProvisionerJobStatus::Pending);
		assert!(job.started_at.is_none());

		let params = repo.get_build_parameters(build.id).await.unwrap();
		assert_eq!(params, vec![("cpu".to_string(), "8".to_string())]);
	}

	#[tokio::test]
	async fn test_job_status_timestamps() {
		let pool = create_test_pool().await;
		let (workspace_id, version_id, user_id) = setup(&pool).await;
		let repo = BuildRepository::new(pool);

		let build = repo
			.enqueue_build(&request(workspace_id, version_id, user_id))
			.await
			.unwrap();

		repo.update_job_status(build.job_id, ProvisionerJobStatus::Running, None)
			.await
			.unwrap();
		let job = repo.get_job(build.job_id).await.unwrap().unwrap();
		assert!(job.started_at.is_some());
		assert!(job.completed_at.is_none());

		repo.update_job_status(build.job_id, ProvisionerJobStatus::Failed, Some("boom"))
			.await
			.unwrap();
		let job = repo.get_job(build.job_id).await.unwrap().unwrap();
		assert_eq!(job.status, ProvisionerJobStatus::Failed);
		assert_eq!(job.error.as_deref(), Some("boom"));
		assert!(job.completed_at.is_some());
	}
}
