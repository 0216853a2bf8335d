// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Templates and their immutable versions. At most one version per template
//! is active at a time; activity is recorded on the template row itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{format_timestamp, parse_id, parse_opt_id, parse_timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
	pub id: Uuid,
	pub name: String,
	pub active_version_id: Option<Uuid>,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateVersion {
	pub id: Uuid,
	pub template_id: Uuid,
	pub name: String,
	pub job_id: Option<Uuid>,
	pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TemplateRepository {
	pool: SqlitePool,
}

impl TemplateRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn create_template(&self, name: &str) -> Result<Template> {
		let template = Template {
			id: Uuid::new_v4(),
			name: name.to_string(),
			active_version_id: None,
			created_at: Utc::now(),
		};
		sqlx::query("INSERT INTO templates (id, name, created_at) VALUES (?, ?, ?)")
			.bind(template.id.to_string())
			.bind(&template.name)
			.bind(format_timestamp(template.created_at))
			.execute(&self.pool)
			.await?;
		Ok(template)
	}

	#[tracing::instrument(skip(self))]
	pub async fn create_template_version(
		&self,
		template_id: Uuid,
		name: &str,
		job_id: Option<Uuid>,
	) -> Result<TemplateVersion> {
		let version = TemplateVersion {
			id: Uuid::new_v4(),
			template_id,
			name: name.to_string(),
			job_id,
			created_at: Utc::now(),
		};
		sqlx::query(
			"INSERT INTO template_versions (id, template_id, name, job_id, created_at) VALUES (?, ?, ?, ?, ?)",
		)
		.bind(version.id.to_string())
		.bind(version.template_id.to_string())
		.bind(&version.name)
		.bind(version.job_id.map(|id| id.to_string()))
		.bind(format_timestamp(version.created_at))
		.execute(&self.pool)
		.await?;
		Ok(version)
	}

	/// Promote a version to be the template's active one, demoting any other.
	#[tracing::instrument(skip(self))]
	pub async fn set_active_version(&self, template_id: Uuid, version_id: Uuid) -> Result<()> {
		sqlx::query("UPDATE templates SET active_version_id = ? WHERE id = ?")
			.bind(version_id.to_string())
			.bind(template_id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_template_version(&self, id: Uuid) -> Result<Option<TemplateVersion>> {
		let row = sqlx::query_as::<_, (String, String, String, Option<String>, String)>(
			"SELECT id, template_id, name, job_id, created_at FROM template_versions WHERE id = ?",
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|(id, template_id, name, job_id, created_at)| {
			Ok(TemplateVersion {
				id: parse_id(&id)?,
				template_id: parse_id(&template_id)?,
				name,
				job_id: parse_opt_id(job_id)?,
				created_at: parse_timestamp(&created_at)?,
			})
		})
		.transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_template(&self, id: Uuid) -> Result<Option<Template>> {
		let row = sqlx::query_as::<_, (String, String, Option<String>, String)>(
			"SELECT id, name, active_version_id, created_at FROM templates WHERE id = ?",
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|(id, name, active_version_id, created_at)| {
			Ok(Template {
				id: parse_id(&id)?,
				name,
				active_version_id: parse_opt_id(active_version_id)?,
				created_at: parse_timestamp(&created_at)?,
			})
		})
		.transpose()
	}
}
