// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit trail for prebuild lifecycle actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{format_timestamp, parse_id, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
	PrebuildCreated,
	PrebuildDeleted,
	PrebuildClaimed,
}

impl AuditEvent {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuditEvent::PrebuildCreated => "prebuild_created",
			AuditEvent::PrebuildDeleted => "prebuild_deleted",
			AuditEvent::PrebuildClaimed => "prebuild_claimed",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
	pub id: Uuid,
	pub event_type: String,
	pub actor_id: Uuid,
	pub resource_type: String,
	pub resource_id: Uuid,
	pub detail: Option<serde_json::Value>,
	pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuditRepository {
	pool: SqlitePool,
}

impl AuditRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, detail))]
	pub async fn append(
		&self,
		event: AuditEvent,
		actor_id: Uuid,
		resource_type: &str,
		resource_id: Uuid,
		detail: Option<serde_json::Value>,
	) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO audit_logs (id, event_type, actor_id, resource_type, resource_id, detail, timestamp)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(Uuid::new_v4().to_string())
		.bind(event.as_str())
		.bind(actor_id.to_string())
		.bind(resource_type)
		.bind(resource_id.to_string())
		.bind(detail.map(|d| d.to_string()))
		.bind(format_timestamp(Utc::now()))
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Entries of one event type, newest first.
	#[tracing::instrument(skip(self))]
	pub async fn query_by_type(&self, event_type: &str) -> Result<Vec<AuditLogEntry>> {
		let rows = sqlx::query_as::<_, (String, String, String, String, String, Option<String>, String)>(
			r#"
			SELECT id, event_type, actor_id, resource_type, resource_id, detail, timestamp
			FROM audit_logs WHERE event_type = ? ORDER BY timestamp DESC
			"#,
		)
		.bind(event_type)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter()
			.map(
				|(id, event_type, actor_id, resource_type, resource_id, detail, timestamp)| {
					Ok(AuditLogEntry {
						id: parse_id(&id)?,
						event_type,
						actor_id: parse_id(&actor_id)?,
						resource_type,
						resource_id: parse_id(&resource_id)?,
						detail: detail.map(|d| serde_json::from_str(&d)).transpose()?,
						timestamp: parse_timestamp(&timestamp)?,
					})
				},
			)
			.collect()
	}
}
