// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cross-replica advisory locks.
//!
//! Acquisition is a single guarded upsert: the row is taken when it is free,
//! when its lease has expired, or when the same holder re-enters. The lease
//! TTL bounds how long a crashed replica can wedge the lock.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::types::format_timestamp;

/// Lock name serializing reconciliation passes across replicas.
pub const RECONCILE_LOCK_KEY: &str = "prebuild-reconcile";

#[derive(Clone)]
pub struct LockRepository {
	pool: SqlitePool,
}

impl LockRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Take the named lock for `holder`, renewing the lease if the holder
	/// already owns it. Returns `DbError::LockNotAcquired` when another
	/// holder's lease is still live.
	#[tracing::instrument(skip(self))]
	pub async fn acquire_advisory_lock(
		&self,
		key: &str,
		holder: Uuid,
		ttl: Duration,
	) -> Result<()> {
		let now = Utc::now();
		let acquired = sqlx::query(
			r#"
			INSERT INTO advisory_locks (key, holder, expires_at) VALUES (?, ?, ?)
			ON CONFLICT(key) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
			WHERE advisory_locks.expires_at < ? OR advisory_locks.holder = excluded.holder
			"#,
		)
		.bind(key)
		.bind(holder.to_string())
		.bind(format_timestamp(now + ttl))
		.bind(format_timestamp(now))
		.execute(&self.pool)
		.await?
		.rows_affected();

		if acquired == 0 {
			return Err(DbError::LockNotAcquired(key.to_string()));
		}
		Ok(())
	}

	/// Release the named lock if this holder still owns it. Releasing a lock
	/// that expired and was taken over by another holder is a no-op.
	#[tracing::instrument(skip(self))]
	pub async fn release_advisory_lock(&self, key: &str, holder: Uuid) -> Result<()> {
		sqlx::query("DELETE FROM advisory_locks WHERE key = ? AND holder = ?")
			.bind(key)
			.bind(holder.to_string())
			.execute(&self.pool)
			.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	#[tokio::test]
	async fn test_lock_is_exclusive_across_holders() {
		let pool = create_test_pool().await;
		let repo = LockRepository::new(pool);
		let first = Uuid::new_v4();
		let second = Uuid::new_v4();

		repo.acquire_advisory_lock(RECONCILE_LOCK_KEY, first, Duration::minutes(1))
			.await
			.unwrap();

		let err = repo
			.acquire_advisory_lock(RECONCILE_LOCK_KEY, second, Duration::minutes(1))
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::LockNotAcquired(_)));

		repo.release_advisory_lock(RECONCILE_LOCK_KEY, first)
			.await
			.unwrap();
		repo.acquire_advisory_lock(RECONCILE_LOCK_KEY, second, Duration::minutes(1))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_lock_is_reentrant_for_same_holder() {
		let pool = create_test_pool().await;
		let repo = LockRepository::new(pool);
		let holder = Uuid::new_v4();

		repo.acquire_advisory_lock(RECONCILE_LOCK_KEY, holder, Duration::minutes(1))
			.await
			.unwrap();
		repo.acquire_advisory_lock(RECONCILE_LOCK_KEY, holder, Duration::minutes(1))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_expired_lease_is_stolen() {
		let pool = create_test_pool().await;
		let repo = LockRepository::new(pool);
		let crashed = Uuid::new_v4();
		let healthy = Uuid::new_v4();

		// A lease that expired in the past, as if its holder died.
		repo.acquire_advisory_lock(RECONCILE_LOCK_KEY, crashed, Duration::seconds(-1))
			.await
			.unwrap();

		repo.acquire_advisory_lock(RECONCILE_LOCK_KEY, healthy, Duration::minutes(1))
			.await
			.unwrap();

		// The crashed holder's stale release must not free the new lease.
		repo.release_advisory_lock(RECONCILE_LOCK_KEY, crashed)
			.await
			.unwrap();
		let err = repo
			.acquire_advisory_lock(RECONCILE_LOCK_KEY, crashed, Duration::minutes(1))
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::LockNotAcquired(_)));
	}

	#[tokio::test]
	async fn test_distinct_keys_do_not_contend() {
		let pool = create_test_pool().await;
		let repo = LockRepository::new(pool);

		repo.acquire_advisory_lock("alpha", Uuid::new_v4(), Duration::minutes(1))
			.await
			.unwrap();
		repo.acquire_advisory_lock("beta", Uuid::new_v4(), Duration::minutes(1))
			.await
			.unwrap();
	}
}
