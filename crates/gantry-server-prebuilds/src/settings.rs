// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Duration;

/// Tunables for the reconciliation loop. The periodic tick is the backstop
/// for lost pubsub messages; the backoff values implement linear
/// wait-after-failure per preset.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
	/// Period between backstop reconciliation passes.
	pub reconciliation_interval: std::time::Duration,
	/// Unit of linear backoff after a failed prebuild build.
	pub backoff_interval: Duration,
	/// Window in which failed builds are counted toward backoff.
	pub backoff_lookback: Duration,
	/// Lease TTL for the cross-replica reconciliation lock.
	pub lock_ttl: Duration,
}

impl Default for ReconcilerSettings {
	fn default() -> Self {
		Self {
			reconciliation_interval: std::time::Duration::from_secs(30),
			backoff_interval: Duration::minutes(1),
			backoff_lookback: Duration::hours(2),
			lock_ttl: Duration::minutes(1),
		}
	}
}
