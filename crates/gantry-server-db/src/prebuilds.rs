// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The prebuild-specific store surface: snapshot reads for the reconciler,
//! the transactional create path, and the atomic claim.
//!
//! A prebuild is a workspace whose latest build was initiated by the
//! prebuilds user and whose owner is still the prebuilds user. Every query
//! here anchors on the latest build per workspace (highest build number), so
//! a workspace leaves these result sets the moment a newer build supersedes
//! the state being selected on.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use gantry_prebuilds_core::{
	BackoffState, ExceptionalPrebuild, InFlightPrebuild, PresetDefinition, RunningPrebuild,
};

use crate::audit::AuditEvent;
use crate::error::{DbError, Result};
use crate::types::{format_timestamp, parse_id, parse_timestamp};
use crate::user::PREBUILDS_USER_ID;

/// Restricts a latest-build join to the build with the highest number.
const LATEST_BUILD: &str =
	"b.build_number = (SELECT MAX(b2.build_number) FROM workspace_builds b2 WHERE b2.workspace_id = w.id)";

#[derive(Debug, Clone)]
pub struct CreatePrebuildParams {
	pub template_id: Uuid,
	pub template_version_id: Uuid,
	pub preset_id: Uuid,
	pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimPrebuildParams {
	pub new_user_id: Uuid,
	pub new_name: String,
	pub preset_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimedPrebuild {
	pub workspace_id: Uuid,
}

#[derive(Clone)]
pub struct PrebuildsRepository {
	pool: SqlitePool,
}

impl PrebuildsRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Every preset that carries a prebuild pool definition, tagged with
	/// whether its template version is currently the active one.
	#[tracing::instrument(skip(self))]
	pub async fn snapshot_presets(&self) -> Result<Vec<PresetDefinition>> {
		let rows = sqlx::query_as::<_, PresetDefinitionRow>(
			r#"
			SELECT
				p.id AS preset_id,
				p.name AS preset_name,
				t.id AS template_id,
				t.name AS template_name,
				p.template_version_id AS template_version_id,
				pp.desired_instances AS desired_instances,
				CASE WHEN t.active_version_id = p.template_version_id THEN 1 ELSE 0 END AS using_active_version
			FROM presets p
			JOIN preset_prebuilds pp ON pp.preset_id = p.id
			JOIN template_versions tv ON tv.id = p.template_version_id
			JOIN templates t ON t.id = tv.template_id
			ORDER BY p.created_at
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter()
			.map(|row| {
				Ok(PresetDefinition {
					preset_id: parse_id(&row.preset_id)?,
					preset_name: row.preset_name,
					template_id: parse_id(&row.template_id)?,
					template_name: row.template_name,
					template_version_id: parse_id(&row.template_version_id)?,
					desired_instances: row.desired_instances as u32,
					using_active_version: row.using_active_version,
				})
			})
			.collect()
	}

	/// Prebuilds whose latest build is a succeeded `start`.
	#[tracing::instrument(skip(self))]
	pub async fn get_running_prebuilds(&self) -> Result<Vec<RunningPrebuild>> {
		let sql = format!(
			r#"
			SELECT
				w.id AS workspace_id,
				b.preset_id AS preset_id,
				w.created_at AS created_at,
				CASE WHEN EXISTS (
					SELECT 1 FROM workspace_agents a
					WHERE a.workspace_id = w.id AND a.lifecycle_state <> 'ready'
				) THEN 0 ELSE 1 END AS ready
			FROM workspaces w
			JOIN workspace_builds b ON b.workspace_id = w.id
			JOIN provisioner_jobs j ON j.id = b.job_id
			WHERE w.owner_id = ?
				AND w.deleted = 0
				AND b.preset_id IS NOT NULL
				AND b.transition = 'start'
				AND j.status = 'succeeded'
				AND {LATEST_BUILD}
			ORDER BY w.created_at
			"#
		);
		let rows = sqlx::query_as::<_, (String, String, String, bool)>(&sql)
			.bind(PREBUILDS_USER_ID.to_string())
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter()
			.map(|(workspace_id, preset_id, created_at, ready)| {
				Ok(RunningPrebuild {
					workspace_id: parse_id(&workspace_id)?,
					preset_id: parse_id(&preset_id)?,
					ready,
					created_at: parse_timestamp(&created_at)?,
				})
			})
			.collect()
	}

	/// Prebuilds whose latest `start` build has not yet reached a terminal
	/// job state. These occupy pool capacity but cannot be claimed.
	#[tracing::instrument(skip(self))]
	pub async fn get_in_flight_prebuilds(&self) -> Result<Vec<InFlightPrebuild>> {
		let sql = format!(
			r#"
			SELECT w.id AS workspace_id, b.preset_id AS preset_id
			FROM workspaces w
			JOIN workspace_builds b ON b.workspace_id = w.id
			JOIN provisioner_jobs j ON j.id = b.job_id
			WHERE w.owner_id = ?
				AND w.deleted = 0
				AND b.preset_id IS NOT NULL
				AND b.transition = 'start'
				AND j.status IN ('pending', 'running', 'canceling')
				AND {LATEST_BUILD}
			"#
		);
		let rows = sqlx::query_as::<_, (String, String)>(&sql)
			.bind(PREBUILDS_USER_ID.to_string())
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter()
			.map(|(workspace_id, preset_id)| {
				Ok(InFlightPrebuild {
					workspace_id: parse_id(&workspace_id)?,
					preset_id: parse_id(&preset_id)?,
				})
			})
			.collect()
	}

	/// Prebuilds whose latest job failed or was canceled. Retained for
	/// operator diagnosis; the reconciler never deletes them.
	#[tracing::instrument(skip(self))]
	pub async fn get_exceptional_prebuilds(&self) -> Result<Vec<ExceptionalPrebuild>> {
		let sql = format!(
			r#"
			SELECT w.id AS workspace_id, b.preset_id AS preset_id
			FROM workspaces w
			JOIN workspace_builds b ON b.workspace_id = w.id
			JOIN provisioner_jobs j ON j.id = b.job_id
			WHERE w.owner_id = ?
				AND w.deleted = 0
				AND b.preset_id IS NOT NULL
				AND j.status IN ('failed', 'canceled')
				AND {LATEST_BUILD}
			"#
		);
		let rows = sqlx::query_as::<_, (String, String)>(&sql)
			.bind(PREBUILDS_USER_ID.to_string())
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter()
			.map(|(workspace_id, preset_id)| {
				Ok(ExceptionalPrebuild {
					workspace_id: parse_id(&workspace_id)?,
					preset_id: parse_id(&preset_id)?,
				})
			})
			.collect()
	}

	/// Failure history for one preset within the lookback window: how many
	/// prebuild start builds failed, and when the most recent failure
	/// completed.
	#[tracing::instrument(skip(self))]
	pub async fn get_preset_backoff(
		&self,
		preset_id: Uuid,
		lookback: Duration,
		now: DateTime<Utc>,
	) -> Result<Option<BackoffState>> {
		let window_start = format_timestamp(now - lookback);
		let (num_failed, last_failed_at): (i64, Option<String>) = sqlx::query_as(
			r#"
			SELECT COUNT(*), MAX(j.completed_at)
			FROM workspace_builds b
			JOIN provisioner_jobs j ON j.id = b.job_id
			WHERE b.preset_id = ?
				AND b.transition = 'start'
				AND b.initiator_id = ?
				AND j.status = 'failed'
				AND j.completed_at >= ?
			"#,
		)
		.bind(preset_id.to_string())
		.bind(PREBUILDS_USER_ID.to_string())
		.bind(window_start)
		.fetch_one(&self.pool)
		.await?;

		match last_failed_at {
			Some(ts) if num_failed > 0 => Ok(Some(BackoffState {
				num_failed: num_failed as u32,
				last_failed_at: parse_timestamp(&ts)?,
			})),
			_ => Ok(None),
		}
	}

	/// Provision a new prebuild: workspace row owned by the prebuilds user,
	/// plus its initial `start` build and pending job, in one transaction.
	#[tracing::instrument(skip(self, params), fields(preset_id = %params.preset_id, name = %params.name))]
	pub async fn create_prebuild_workspace(&self, params: &CreatePrebuildParams) -> Result<Uuid> {
		let mut tx = self.pool.begin().await?;

		let now = format_timestamp(Utc::now());
		let workspace_id = Uuid::new_v4();
		sqlx::query(
			r#"
			INSERT INTO workspaces (id, template_id, owner_id, name, deleted, created_at, updated_at)
			VALUES (?, ?, ?, ?, 0, ?, ?)
			"#,
		)
		.bind(workspace_id.to_string())
		.bind(params.template_id.to_string())
		.bind(PREBUILDS_USER_ID.to_string())
		.bind(&params.name)
		.bind(&now)
		.bind(&now)
		.execute(&mut *tx)
		.await?;

		let job_id = Uuid::new_v4();
		sqlx::query(
			"INSERT INTO provisioner_jobs (id, status, initiator_id, created_at) VALUES (?, 'pending', ?, ?)",
		)
		.bind(job_id.to_string())
		.bind(PREBUILDS_USER_ID.to_string())
		.bind(&now)
		.execute(&mut *tx)
		.await?;

		sqlx::query(
			r#"
			INSERT INTO workspace_builds
				(id, workspace_id, template_version_id, preset_id, build_number, transition, reason, initiator_id, job_id, created_at)
			VALUES (?, ?, ?, ?, 1, 'start', 'prebuild', ?, ?, ?)
			"#,
		)
		.bind(Uuid::new_v4().to_string())
		.bind(workspace_id.to_string())
		.bind(params.template_version_id.to_string())
		.bind(params.preset_id.to_string())
		.bind(PREBUILDS_USER_ID.to_string())
		.bind(job_id.to_string())
		.bind(&now)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		tracing::info!(workspace_id = %workspace_id, "created prebuild workspace");
		Ok(workspace_id)
	}

	/// Atomically transfer one eligible prebuild to a user.
	///
	/// The candidate scan and the ownership flip run in a single transaction,
	/// and the flip is guarded on the owner still being the prebuilds user,
	/// so two concurrent claims can never acquire the same workspace: the
	/// loser's guarded update matches zero rows and it moves to the next
	/// candidate.
	#[tracing::instrument(skip(self, params), fields(preset_id = %params.preset_id, user_id = %params.new_user_id))]
	pub async fn claim_prebuild(&self, params: &ClaimPrebuildParams) -> Result<ClaimedPrebuild> {
		let mut tx = self.pool.begin().await?;

		let sql = format!(
			r#"
			SELECT w.id
			FROM workspaces w
			JOIN workspace_builds b ON b.workspace_id = w.id
			JOIN provisioner_jobs j ON j.id = b.job_id
			JOIN presets p ON p.id = b.preset_id
			JOIN template_versions tv ON tv.id = p.template_version_id
			JOIN templates t ON t.id = tv.template_id AND t.active_version_id = tv.id
			WHERE w.owner_id = ?
				AND w.deleted = 0
				AND b.preset_id = ?
				AND b.transition = 'start'
				AND j.status = 'succeeded'
				AND {LATEST_BUILD}
				AND NOT EXISTS (
					SELECT 1 FROM workspace_agents a
					WHERE a.workspace_id = w.id AND a.lifecycle_state <> 'ready'
				)
			ORDER BY w.created_at
			"#
		);
		let candidates: Vec<(String,)> = sqlx::query_as(&sql)
			.bind(PREBUILDS_USER_ID.to_string())
			.bind(params.preset_id.to_string())
			.fetch_all(&mut *tx)
			.await?;

		for (candidate,) in candidates {
			let workspace_id = parse_id(&candidate)?;
			let flipped = sqlx::query(
				"UPDATE workspaces SET owner_id = ?, name = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
			)
			.bind(params.new_user_id.to_string())
			.bind(&params.new_name)
			.bind(format_timestamp(Utc::now()))
			.bind(workspace_id.to_string())
			.bind(PREBUILDS_USER_ID.to_string())
			.execute(&mut *tx)
			.await?
			.rows_affected();

			if flipped == 0 {
				continue;
			}

			sqlx::query(
				r#"
				INSERT INTO audit_logs (id, event_type, actor_id, resource_type, resource_id, detail, timestamp)
				VALUES (?, ?, ?, 'workspace', ?, ?, ?)
				"#,
			)
			.bind(Uuid::new_v4().to_string())
			.bind(AuditEvent::PrebuildClaimed.as_str())
			.bind(params.new_user_id.to_string())
			.bind(workspace_id.to_string())
			.bind(
				serde_json::json!({
					"preset_id": params.preset_id,
					"name": params.new_name,
				})
				.to_string(),
			)
			.bind(format_timestamp(Utc::now()))
			.execute(&mut *tx)
			.await?;

			tx.commit().await?;
			tracing::info!(workspace_id = %workspace_id, "claimed prebuild");
			return Ok(ClaimedPrebuild { workspace_id });
		}

		Err(DbError::NoEligiblePrebuild(params.preset_id))
	}
}

#[derive(sqlx::FromRow)]
struct PresetDefinitionRow {
	preset_id: String,
	preset_name: String,
	template_id: String,
	template_name: String,
	template_version_id: String,
	desired_instances: i64,
	using_active_version: bool,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_test_pool, seed_prebuild, seed_template_with_preset, PrebuildSeed};
	use crate::types::{AgentLifecycleState, ProvisionerJobStatus, WorkspaceTransition};
	use crate::user::UserRepository;

	fn seed(
		fixture: &crate::testing::SeededPreset,
		transition: WorkspaceTransition,
		status: ProvisionerJobStatus,
	) -> PrebuildSeed {
		PrebuildSeed {
			template_id: fixture.template_id,
			template_version_id: fixture.template_version_id,
			preset_id: fixture.preset_id,
			transition,
			job_status: status,
			created_at: Utc::now(),
			agent_states: vec![AgentLifecycleState::Ready],
		}
	}

	#[tokio::test]
	async fn test_snapshot_presets_tags_active_version() {
		let pool = create_test_pool().await;
		let fixture = seed_template_with_preset(&pool, 2).await;

		let repo = PrebuildsRepository::new(pool.clone());
		let presets = repo.snapshot_presets().await.unwrap();
		assert_eq!(presets.len(), 1);
		assert_eq!(presets[0].preset_id, fixture.preset_id);
		assert_eq!(presets[0].desired_instances, 2);
		assert!(presets[0].using_active_version);

		// A newer active version retires the preset's version.
		let templates = crate::template::TemplateRepository::new(pool.clone());
		let newer = templates
			.create_template_version(fixture.template_id, "v2", None)
			.await
			.unwrap();
		templates
			.set_active_version(fixture.template_id, newer.id)
			.await
			.unwrap();

		let presets = repo.snapshot_presets().await.unwrap();
		assert!(!presets[0].using_active_version);
	}

	#[tokio::test]
	async fn test_running_prebuilds_classification() {
		let pool = create_test_pool().await;
		let fixture = seed_template_with_preset(&pool, 2).await;
		let repo = PrebuildsRepository::new(pool.clone());

		let running = seed_prebuild(
			&pool,
			&seed(
				&fixture,
				WorkspaceTransition::Start,
				ProvisionerJobStatus::Succeeded,
			),
		)
		.await;
		seed_prebuild(
			&pool,
			&seed(
				&fixture,
				WorkspaceTransition::Start,
				ProvisionerJobStatus::Pending,
			),
		)
		.await;
		seed_prebuild(
			&pool,
			&seed(
				&fixture,
				WorkspaceTransition::Start,
				ProvisionerJobStatus::Failed,
			),
		)
		.await;

		let rows = repo.get_running_prebuilds().await.unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].workspace_id, running);
		assert!(rows[0].ready);

		let in_flight = repo.get_in_flight_prebuilds().await.unwrap();
		assert_eq!(in_flight.len(), 1);

		let exceptional = repo.get_exceptional_prebuilds().await.unwrap();
		assert_eq!(exceptional.len(), 1);
	}

	#[tokio::test]
	async fn test_running_prebuild_not_ready_until_agents_ready() {
		let pool = create_test_pool().await;
		let fixture = seed_template_with_preset(&pool, 1).await;
		let repo = PrebuildsRepository::new(pool.clone());

		let mut prebuild = seed(
			&fixture,
			WorkspaceTransition::Start,
			ProvisionerJobStatus::Succeeded,
		);
		prebuild.agent_states = vec![AgentLifecycleState::Starting, AgentLifecycleState::Ready];
		seed_prebuild(&pool, &prebuild).await;

		let rows = repo.get_running_prebuilds().await.unwrap();
		assert_eq!(rows.len(), 1);
		assert!(!rows[0].ready);
	}

	#[tokio::test]
	async fn test_stop_and_delete_builds_are_not_in_flight() {
		// A pending stop or delete build occupies the provisioner, but the
		// workspace can never become claimable again, so it must not count
		// against the pool size.
		let pool = create_test_pool().await;
		let fixture = seed_template_with_preset(&pool, 1).await;
		let repo = PrebuildsRepository::new(pool.clone());

		seed_prebuild(
			&pool,
			&seed(
				&fixture,
				WorkspaceTransition::Delete,
				ProvisionerJobStatus::Pending,
			),
		)
		.await;
		seed_prebuild(
			&pool,
			&seed(
				&fixture,
				WorkspaceTransition::Stop,
				ProvisionerJobStatus::Running,
			),
		)
		.await;

		assert!(repo.get_in_flight_prebuilds().await.unwrap().is_empty());
		assert!(repo.get_running_prebuilds().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_backoff_counts_failures_in_window() {
		let pool = create_test_pool().await;
		let fixture = seed_template_with_preset(&pool, 1).await;
		let repo = PrebuildsRepository::new(pool.clone());
		let now = Utc::now();

		// Two failures inside the window, one ancient failure outside it.
		for age in [Duration::minutes(10), Duration::minutes(5), Duration::hours(30)] {
			let mut prebuild = seed(
				&fixture,
				WorkspaceTransition::Start,
				ProvisionerJobStatus::Failed,
			);
			prebuild.created_at = now - age;
			seed_prebuild(&pool, &prebuild).await;
		}

		let backoff = repo
			.get_preset_backoff(fixture.preset_id, Duration::hours(2), now)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(backoff.num_failed, 2);
		assert_eq!(backoff.last_failed_at, now - Duration::minutes(5));

		let none = repo
			.get_preset_backoff(fixture.preset_id, Duration::minutes(1), now)
			.await
			.unwrap();
		assert!(none.is_none());
	}

	#[tokio::test]
	async fn test_claim_prefers_oldest_eligible() {
		let pool = create_test_pool().await;
		let fixture = seed_template_with_preset(&pool, 2).await;
		let repo = PrebuildsRepository::new(pool.clone());
		let users = UserRepository::new(pool.clone());
		let user = users.create_user("dorothy").await.unwrap();

		let mut older = seed(
			&fixture,
			WorkspaceTransition::Start,
			ProvisionerJobStatus::Succeeded,
		);
		older.created_at = Utc::now() - Duration::minutes(10);
		let older_id = seed_prebuild(&pool, &older).await;
		seed_prebuild(
			&pool,
			&seed(
				&fixture,
				WorkspaceTransition::Start,
				ProvisionerJobStatus::Succeeded,
			),
		)
		.await;

		let claimed = repo
			.claim_prebuild(&ClaimPrebuildParams {
				new_user_id: user.id,
				new_name: "my-workspace".to_string(),
				preset_id: fixture.preset_id,
			})
			.await
			.unwrap();
		assert_eq!(claimed.workspace_id, older_id);

		let workspace = crate::workspace::WorkspaceRepository::new(pool.clone())
			.get_workspace(older_id)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(workspace.owner_id, user.id);
		assert_eq!(workspace.name, "my-workspace");

		// The claimed workspace no longer shows up as a running prebuild.
		let rows = repo.get_running_prebuilds().await.unwrap();
		assert_eq!(rows.len(), 1);
		assert_ne!(rows[0].workspace_id, older_id);
	}

	#[tokio::test]
	async fn test_claim_requires_ready_agents() {
		let pool = create_test_pool().await;
		let fixture = seed_template_with_preset(&pool, 1).await;
		let repo = PrebuildsRepository::new(pool.clone());
		let user = UserRepository::new(pool.clone())
			.create_user("dorothy")
			.await
			.unwrap();

		let mut prebuild = seed(
			&fixture,
			WorkspaceTransition::Start,
			ProvisionerJobStatus::Succeeded,
		);
		prebuild.agent_states = vec![AgentLifecycleState::Starting];
		seed_prebuild(&pool, &prebuild).await;

		let err = repo
			.claim_prebuild(&ClaimPrebuildParams {
				new_user_id: user.id,
				new_name: "my-workspace".to_string(),
				preset_id: fixture.preset_id,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::NoEligiblePrebuild(_)));
	}

	#[tokio::test]
	async fn test_claim_is_exactly_once_under_contention() {
		let pool = create_test_pool().await;
		let fixture = seed_template_with_preset(&pool, 1).await;
		let users = UserRepository::new(pool.clone());
		let alice = users.create_user("alice").await.unwrap();
		let bob = users.create_user("bob").await.unwrap();

		seed_prebuild(
			&pool,
			&seed(
				&fixture,
				WorkspaceTransition::Start,
				ProvisionerJobStatus::Succeeded,
			),
		)
		.await;

		let repo_a = PrebuildsRepository::new(pool.clone());
		let repo_b = PrebuildsRepository::new(pool.clone());
		let preset_id = fixture.preset_id;

		let first = tokio::spawn(async move {
			repo_a
				.claim_prebuild(&ClaimPrebuildParams {
					new_user_id: alice.id,
					new_name: "alice-ws".to_string(),
					preset_id,
				})
				.await
		});
		let second = tokio::spawn(async move {
			repo_b
				.claim_prebuild(&ClaimPrebuildParams {
					new_user_id: bob.id,
					new_name: "bob-ws".to_string(),
					preset_id,
				})
				.await
		});

		let outcomes = [first.await.unwrap(), second.await.unwrap()];
		let wins = outcomes.iter().filter(|r| r.is_ok()).count();
		let misses = outcomes
			.iter()
			.filter(|r| matches!(r, Err(DbError::NoEligiblePrebuild(_))))
			.count();
		assert_eq!(wins, 1);
		assert_eq!(misses, 1);
	}

	#[tokio::test]
	async fn test_claim_skips_inactive_version_presets() {
		let pool = create_test_pool().await;
		let fixture = seed_template_with_preset(&pool, 1).await;
		let repo = PrebuildsRepository::new(pool.clone());
		let user = UserRepository::new(pool.clone())
			.create_user("dorothy")
			.await
			.unwrap();

		seed_prebuild(
			&pool,
			&seed(
				&fixture,
				WorkspaceTransition::Start,
				ProvisionerJobStatus::Succeeded,
			),
		)
		.await;

		let templates = crate::template::TemplateRepository::new(pool.clone());
		let newer = templates
			.create_template_version(fixture.template_id, "v2", None)
			.await
			.unwrap();
		templates
			.set_active_version(fixture.template_id, newer.id)
			.await
			.unwrap();

		let err = repo
			.claim_prebuild(&ClaimPrebuildParams {
				new_user_id: user.id,
				new_name: "my-workspace".to_string(),
				preset_id: fixture.preset_id,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::NoEligiblePrebuild(_)));
	}

	#[tokio::test]
	async fn test_claim_writes_audit_entry() {
		let pool = create_test_pool().await;
		let fixture = seed_template_with_preset(&pool, 1).await;
		let repo = PrebuildsRepository::new(pool.clone());
		let user = UserRepository::new(pool.clone())
			.create_user("dorothy")
			.await
			.unwrap();

		seed_prebuild(
			&pool,
			&seed(
				&fixture,
				WorkspaceTransition::Start,
				ProvisionerJobStatus::Succeeded,
			),
		)
		.await;

		repo.claim_prebuild(&ClaimPrebuildParams {
			new_user_id: user.id,
			new_name: "my-workspace".to_string(),
			preset_id: fixture.preset_id,
		})
		.await
		.unwrap();

		let audit = crate::audit::AuditRepository::new(pool.clone());
		let entries = audit
			.query_by_type(AuditEvent::PrebuildClaimed.as_str())
			.await
			.unwrap();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].actor_id, user.id);
	}

	#[tokio::test]
	async fn test_create_prebuild_workspace_shows_in_flight() {
		let pool = create_test_pool().await;
		let fixture = seed_template_with_preset(&pool, 1).await;
		let repo = PrebuildsRepository::new(pool.clone());

		let workspace_id = repo
			.create_prebuild_workspace(&CreatePrebuildParams {
				template_id: fixture.template_id,
				template_version_id: fixture.template_version_id,
				preset_id: fixture.preset_id,
				name: "big-abc123".to_string(),
			})
			.await
			.unwrap();

		let in_flight = repo.get_in_flight_prebuilds().await.unwrap();
		assert_eq!(in_flight.len(), 1);
		assert_eq!(in_flight[0].workspace_id, workspace_id);
		assert!(repo.get_running_prebuilds().await.unwrap().is_empty());
	}
}
