// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Row-level enums and the TEXT encodings shared by every repository.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceTransition {
	Start,
	Stop,
	Delete,
}

impl WorkspaceTransition {
	pub fn as_str(&self) -> &'static str {
		match self {
			WorkspaceTransition::Start => "start",
			WorkspaceTransition::Stop => "stop",
			WorkspaceTransition::Delete => "delete",
		}
	}
}

impl std::str::FromStr for WorkspaceTransition {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"start" => Ok(WorkspaceTransition::Start),
			"stop" => Ok(WorkspaceTransition::Stop),
			"delete" => Ok(WorkspaceTransition::Delete),
			_ => Err(format!("unknown workspace transition: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildReason {
	/// Requested directly by a user.
	Initiator,
	/// Issued by the reconciler to grow a prebuild pool.
	Prebuild,
	/// Issued by the reconciler to shrink a pool or retire an expired prebuild.
	PrebuildCleanup,
	/// The follow-on build enqueued after a prebuild is claimed.
	PrebuildClaim,
}

impl BuildReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			BuildReason::Initiator => "initiator",
			BuildReason::Prebuild => "prebuild",
			BuildReason::PrebuildCleanup => "prebuild-cleanup",
			BuildReason::PrebuildClaim => "prebuild-claim",
		}
	}
}

impl std::str::FromStr for BuildReason {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"initiator" => Ok(BuildReason::Initiator),
			"prebuild" => Ok(BuildReason::Prebuild),
			"prebuild-cleanup" => Ok(BuildReason::PrebuildCleanup),
			"prebuild-claim" => Ok(BuildReason::PrebuildClaim),
			_ => Err(format!("unknown build reason: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionerJobStatus {
	Pending,
	Running,
	Canceling,
	Succeeded,
	Failed,
	Canceled,
}

impl ProvisionerJobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProvisionerJobStatus::Pending => "pending",
			ProvisionerJobStatus::Running => "running",
			ProvisionerJobStatus::Canceling => "canceling",
			ProvisionerJobStatus::Succeeded => "succeeded",
			ProvisionerJobStatus::Failed => "failed",
			ProvisionerJobStatus::Canceled => "canceled",
		}
	}

	/// The job has been accepted but has not reached a terminal state.
	pub fn is_in_flight(&self) -> bool {
		matches!(
			self,
			ProvisionerJobStatus::Pending
				| ProvisionerJobStatus::Running
				| ProvisionerJobStatus::Canceling
		)
	}

	/// The job ended without succeeding.
	pub fn is_exceptional(&self) -> bool {
		matches!(
			self,
			ProvisionerJobStatus::Failed | ProvisionerJobStatus::Canceled
		)
	}
}

impl std::str::FromStr for ProvisionerJobStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"pending" => Ok(ProvisionerJobStatus::Pending),
			"running" => Ok(ProvisionerJobStatus::Running),
			"canceling" => Ok(ProvisionerJobStatus::Canceling),
			"succeeded" => Ok(ProvisionerJobStatus::Succeeded),
			"failed" => Ok(ProvisionerJobStatus::Failed),
			"canceled" => Ok(ProvisionerJobStatus::Canceled),
			_ => Err(format!("unknown provisioner job status: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycleState {
	Created,
	Starting,
	Ready,
	StartError,
}

impl AgentLifecycleState {
	pub fn as_str(&self) -> &'static str {
		match self {
			AgentLifecycleState::Created => "created",
			AgentLifecycleState::Starting => "starting",
			AgentLifecycleState::Ready => "ready",
			AgentLifecycleState::StartError => "start_error",
		}
	}
}

impl std::str::FromStr for AgentLifecycleState {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"created" => Ok(AgentLifecycleState::Created),
			"starting" => Ok(AgentLifecycleState::Starting),
			"ready" => Ok(AgentLifecycleState::Ready),
			"start_error" => Ok(AgentLifecycleState::StartError),
			_ => Err(format!("unknown agent lifecycle state: {s}")),
		}
	}
}

/// Fixed-width RFC 3339 in UTC so TEXT comparison matches temporal order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(s)
		.map(|t| t.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp {s:?}: {e}")))
}

pub(crate) fn parse_opt_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
	s.map(|s| parse_timestamp(&s)).transpose()
}

pub(crate) fn parse_id(s: &str) -> Result<Uuid> {
	Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("invalid identifier {s:?}: {e}")))
}

pub(crate) fn parse_opt_id(s: Option<String>) -> Result<Option<Uuid>> {
	s.map(|s| parse_id(&s)).transpose()
}

pub(crate) fn parse_enum<T>(s: &str) -> Result<T>
where
	T: std::str::FromStr<Err = String>,
{
	s.parse().map_err(DbError::Internal)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::str::FromStr;

	#[test]
	fn test_transition_round_trip() {
		for t in [
			WorkspaceTransition::Start,
			WorkspaceTransition::Stop,
			WorkspaceTransition::Delete,
		] {
			assert_eq!(WorkspaceTransition::from_str(t.as_str()).unwrap(), t);
		}
	}

	#[test]
	fn test_job_status_classification() {
		assert!(ProvisionerJobStatus::Pending.is_in_flight());
		assert!(ProvisionerJobStatus::Running.is_in_flight());
		assert!(ProvisionerJobStatus::Canceling.is_in_flight());
		assert!(!ProvisionerJobStatus::Succeeded.is_in_flight());

		assert!(ProvisionerJobStatus::Failed.is_exceptional());
		assert!(ProvisionerJobStatus::Canceled.is_exceptional());
		assert!(!ProvisionerJobStatus::Succeeded.is_exceptional());
		assert!(!ProvisionerJobStatus::Canceling.is_exceptional());
	}

	#[test]
	fn test_timestamp_text_ordering() {
		let earlier = Utc::now();
		let later = earlier + chrono::Duration::milliseconds(1);
		assert!(format_timestamp(earlier) < format_timestamp(later));
		assert_eq!(parse_timestamp(&format_timestamp(earlier)).unwrap(), earlier);
	}

	#[test]
	fn test_unknown_values_rejected() {
		assert!(WorkspaceTransition::from_str("restart").is_err());
		assert!(ProvisionerJobStatus::from_str("exploded").is_err());
		assert!(BuildReason::from_str("whim").is_err());
	}
}
