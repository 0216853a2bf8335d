// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Presets: named parameter bundles attached to a template version. A preset
//! opts into prebuilds by carrying a `preset_prebuilds` row with the desired
//! pool size.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::types::{format_timestamp, parse_id, parse_timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
	pub id: Uuid,
	pub template_version_id: Uuid,
	pub name: String,
	pub created_at: DateTime<Utc>,
}

/// The prebuild pool definition for one preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetPrebuild {
	pub id: Uuid,
	pub preset_id: Uuid,
	pub desired_instances: u32,
}

#[derive(Clone)]
pub struct PresetRepository {
	pool: SqlitePool,
}

impl PresetRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn create_preset(&self, template_version_id: Uuid, name: &str) -> Result<Preset> {
		let preset = Preset {
			id: Uuid::new_v4(),
			template_version_id,
			name: name.to_string(),
			created_at: Utc::now(),
		};
		sqlx::query(
			"INSERT INTO presets (id, template_version_id, name, created_at) VALUES (?, ?, ?, ?)",
		)
		.bind(preset.id.to_string())
		.bind(preset.template_version_id.to_string())
		.bind(&preset.name)
		.bind(format_timestamp(preset.created_at))
		.execute(&self.pool)
		.await?;
		Ok(preset)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_preset(&self, id: Uuid) -> Result<Option<Preset>> {
		let row = sqlx::query_as::<_, (String, String, String, String)>(
			"SELECT id, template_version_id, name, created_at FROM presets WHERE id = ?",
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|(id, template_version_id, name, created_at)| {
			Ok(Preset {
				id: parse_id(&id)?,
				template_version_id: parse_id(&template_version_id)?,
				name,
				created_at: parse_timestamp(&created_at)?,
			})
		})
		.transpose()
	}

	#[tracing::instrument(skip(self, parameters), fields(count = parameters.len()))]
	pub async fn set_preset_parameters(
		&self,
		preset_id: Uuid,
		parameters: &[(String, String)],
	) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		for (name, value) in parameters {
			sqlx::query(
				r#"
				INSERT INTO preset_parameters (preset_id, name, value) VALUES (?, ?, ?)
				ON CONFLICT(preset_id, name) DO UPDATE SET value = excluded.value
				"#,
			)
			.bind(preset_id.to_string())
			.bind(name)
			.bind(value)
			.execute(&mut *tx)
			.await?;
		}
		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_preset_parameters(&self, preset_id: Uuid) -> Result<Vec<(String, String)>> {
		let rows = sqlx::query_as::<_, (String, String)>(
			"SELECT name, value FROM preset_parameters WHERE preset_id = ? ORDER BY name",
		)
		.bind(preset_id.to_string())
		.fetch_all(&self.pool)
		.await?;
		Ok(rows)
	}

	/// Attach or resize a preset's prebuild pool. A desired count of zero is
	/// valid and drains the pool without removing the definition.
	#[tracing::instrument(skip(self))]
	pub async fn upsert_prebuild_spec(
		&self,
		preset_id: Uuid,
		desired_instances: u32,
	) -> Result<PresetPrebuild> {
		if self.get_preset(preset_id).await?.is_none() {
			return Err(DbError::NotFound(format!("preset {preset_id}")));
		}

		let id = Uuid::new_v4();
		sqlx::query(
			r#"
			INSERT INTO preset_prebuilds (id, preset_id, desired_instances) VALUES (?, ?, ?)
			ON CONFLICT(preset_id) DO UPDATE SET desired_instances = excluded.desired_instances
			"#,
		)
		.bind(id.to_string())
		.bind(preset_id.to_string())
		.bind(desired_instances as i64)
		.execute(&self.pool)
		.await?;

		let (id, desired) = sqlx::query_as::<_, (String, i64)>(
			"SELECT id, desired_instances FROM preset_prebuilds WHERE preset_id = ?",
		)
		.bind(preset_id.to_string())
		.fetch_one(&self.pool)
		.await?;

		Ok(PresetPrebuild {
			id: parse_id(&id)?,
			preset_id,
			desired_instances: desired as u32,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::template::TemplateRepository;
	use crate::testing::create_test_pool;

	async fn setup(pool: &SqlitePool) -> Preset {
		let templates = TemplateRepository::new(pool.clone());
		let template = templates.create_template("docker").await.unwrap();
		let version = templates
			.create_template_version(template.id, "v1", None)
			.await
			.unwrap();
		PresetRepository::new(pool.clone())
			.create_preset(version.id, "big")
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn test_upsert_prebuild_spec_resizes() {
		let pool = create_test_pool().await;
		let preset = setup(&pool).await;
		let repo = PresetRepository::new(pool);

		let spec = repo.upsert_prebuild_spec(preset.id, 2).await.unwrap();
		assert_eq!(spec.desired_instances, 2);

		let resized = repo.upsert_prebuild_spec(preset.id, 5).await.unwrap();
		assert_eq!(resized.desired_instances, 5);
		assert_eq!(resized.id, spec.id);
	}

	#[tokio::test]
	async fn test_upsert_prebuild_spec_unknown_preset() {
		let pool = create_test_pool().await;
		let repo = PresetRepository::new(pool);

		let err = repo
			.upsert_prebuild_spec(Uuid::new_v4(), 1)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::NotFound(_)));
	}

	#[tokio::test]
	async fn test_preset_parameters_upsert_and_order() {
		let pool = create_test_pool().await;
		let preset = setup(&pool).await;
		let repo = PresetRepository::new(pool);

		repo.set_preset_parameters(
			preset.id,
			&[
				("region".to_string(), "eu-west-1".to_string()),
				("cpu".to_string(), "8".to_string()),
			],
		)
		.await
		.unwrap();
		repo.set_preset_parameters(preset.id, &[("cpu".to_string(), "16".to_string())])
			.await
			.unwrap();

		let params = repo.get_preset_parameters(preset.id).await.unwrap();
		assert_eq!(
			params,
			vec![
				("cpu".to_string(), "16".to_string()),
				("region".to_string(), "eu-west-1".to_string()),
			]
		);
	}
}
