// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! User rows, including the well-known prebuilds owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::types::{format_timestamp, parse_id, parse_timestamp};

/// The process-wide identity that owns every prebuild until it is claimed.
/// This value is fixed across replicas and deployments
/// (`c42fdf75-3097-471c-8c33-fb52454d81c0`); the row is inserted by
/// [`UserRepository::ensure_prebuilds_user`] at startup.
pub const PREBUILDS_USER_ID: Uuid = Uuid::from_u128(0xc42fdf75_3097_471c_8c33_fb52454d81c0);

const PREBUILDS_USERNAME: &str = "prebuilds";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
	pub id: Uuid,
	pub username: String,
	pub is_system: bool,
	pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct UserRepository {
	pool: SqlitePool,
}

impl UserRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn create_user(&self, username: &str) -> Result<User> {
		let user = User {
			id: Uuid::new_v4(),
			username: username.to_string(),
			is_system: false,
			created_at: Utc::now(),
		};
		sqlx::query("INSERT INTO users (id, username, is_system, created_at) VALUES (?, ?, ?, ?)")
			.bind(user.id.to_string())
			.bind(&user.username)
			.bind(user.is_system)
			.bind(format_timestamp(user.created_at))
			.execute(&self.pool)
			.await?;
		Ok(user)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
		let row = sqlx::query_as::<_, (String, String, bool, String)>(
			"SELECT id, username, is_system, created_at FROM users WHERE id = ?",
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|(id, username, is_system, created_at)| {
			Ok(User {
				id: parse_id(&id)?,
				username,
				is_system,
				created_at: parse_timestamp(&created_at)?,
			})
		})
		.transpose()
	}

	/// Insert the well-known prebuilds owner if it is not present. Idempotent;
	/// called from startup before the reconciler is allowed to run.
	#[tracing::instrument(skip(self))]
	pub async fn ensure_prebuilds_user(&self) -> Result<()> {
		sqlx::query(
			"INSERT OR IGNORE INTO users (id, username, is_system, created_at) VALUES (?, ?, 1, ?)",
		)
		.bind(PREBUILDS_USER_ID.to_string())
		.bind(PREBUILDS_USERNAME)
		.bind(format_timestamp(Utc::now()))
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Verify the prebuilds owner row exists. The reconciler refuses to start
	/// without it.
	pub async fn require_prebuilds_user(&self) -> Result<User> {
		self.get_user(PREBUILDS_USER_ID).await?.ok_or_else(|| {
			DbError::NotFound(format!("prebuilds user {PREBUILDS_USER_ID} is missing"))
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	#[tokio::test]
	async fn test_ensure_prebuilds_user_is_idempotent() {
		let pool = create_test_pool().await;
		let repo = UserRepository::new(pool);

		repo.ensure_prebuilds_user().await.unwrap();
		repo.ensure_prebuilds_user().await.unwrap();

		let user = repo.require_prebuilds_user().await.unwrap();
		assert_eq!(user.id, PREBUILDS_USER_ID);
		assert!(user.is_system);
	}

	#[tokio::test]
	async fn test_require_prebuilds_user_missing() {
		let pool = create_test_pool().await;
		let repo = UserRepository::new(pool);

		let err = repo.require_prebuilds_user().await.unwrap_err();
		assert!(matches!(err, DbError::NotFound(_)));
	}

	#[tokio::test]
	async fn test_create_and_get_user() {
		let pool = create_test_pool().await;
		let repo = UserRepository::new(pool);

		let created = repo.create_user("dorothy").await.unwrap();
		let fetched = repo.get_user(created.id).await.unwrap().unwrap();
		assert_eq!(fetched, created);
		assert!(!fetched.is_system);
	}
}
