// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use gantry_server_db::DbError;
use gantry_server_pubsub::PubsubError;

#[derive(Debug, thiserror::Error)]
pub enum PrebuildsError {
	#[error(transparent)]
	Db(#[from] DbError),

	#[error(transparent)]
	Pubsub(#[from] PubsubError),

	#[error("Prebuilds user is missing; run startup migrations before starting the reconciler")]
	MissingPrebuildsUser,

	#[error("Preset {preset_id} has an invalid prebuild definition: desired instances {desired}")]
	InvalidPrebuildSpec { preset_id: String, desired: i64 },
}

pub type Result<T> = std::result::Result<T, PrebuildsError>;
