// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Health and metrics HTTP handlers.

use std::sync::Arc;

use axum::{extract::State, http::header, http::StatusCode, response::IntoResponse, Json};
use sqlx::SqlitePool;

use gantry_server_prebuilds::PrebuildMetrics;

#[derive(Clone)]
pub struct AppState {
	pub pool: SqlitePool,
	pub metrics: Arc<PrebuildMetrics>,
}

/// GET /healthz - liveness plus a database round-trip.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
	match sqlx::query("SELECT 1").execute(&state.pool).await {
		Ok(_) => (
			StatusCode::OK,
			Json(serde_json::json!({ "status": "ok", "database": "ok" })),
		),
		Err(error) => {
			tracing::warn!(%error, "health check failed to reach the database");
			(
				StatusCode::SERVICE_UNAVAILABLE,
				Json(serde_json::json!({ "status": "unhealthy", "database": "unreachable" })),
			)
		}
	}
}

/// GET /metrics - Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
	(
		[(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
		state.metrics.encode(),
	)
}
