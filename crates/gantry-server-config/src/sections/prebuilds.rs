// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Prebuild reconciler configuration section.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrebuildsConfigLayer {
	pub reconciliation_interval_secs: Option<u64>,
	pub backoff_interval_secs: Option<u64>,
	pub backoff_lookback_secs: Option<u64>,
	pub lock_ttl_secs: Option<u64>,
}

impl PrebuildsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.reconciliation_interval_secs.is_some() {
			self.reconciliation_interval_secs = other.reconciliation_interval_secs;
		}
		if other.backoff_interval_secs.is_some() {
			self.backoff_interval_secs = other.backoff_interval_secs;
		}
		if other.backoff_lookback_secs.is_some() {
			self.backoff_lookback_secs = other.backoff_lookback_secs;
		}
		if other.lock_ttl_secs.is_some() {
			self.lock_ttl_secs = other.lock_ttl_secs;
		}
	}

	pub fn finalize(self) -> PrebuildsConfig {
		PrebuildsConfig {
			reconciliation_interval_secs: self.reconciliation_interval_secs.unwrap_or(30),
			backoff_interval_secs: self.backoff_interval_secs.unwrap_or(60),
			backoff_lookback_secs: self.backoff_lookback_secs.unwrap_or(7200), // 2 hours
			lock_ttl_secs: self.lock_ttl_secs.unwrap_or(60),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrebuildsConfig {
	/// Period between backstop reconciliation passes.
	pub reconciliation_interval_secs: u64,
	/// Unit of linear backoff after a failed prebuild build.
	pub backoff_interval_secs: u64,
	/// Window in which failed builds are counted toward backoff.
	pub backoff_lookback_secs: u64,
	/// Lease TTL for the cross-replica reconciliation lock.
	pub lock_ttl_secs: u64,
}

impl Default for PrebuildsConfig {
	fn default() -> Self {
		PrebuildsConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_values() {
		let config = PrebuildsConfig::default();
		assert_eq!(config.reconciliation_interval_secs, 30);
		assert_eq!(config.backoff_interval_secs, 60);
		assert_eq!(config.backoff_lookback_secs, 7200);
		assert_eq!(config.lock_ttl_secs, 60);
	}

	#[test]
	fn test_layer_finalize_with_values() {
		let layer = PrebuildsConfigLayer {
			reconciliation_interval_secs: Some(5),
			..Default::default()
		};
		let config = layer.finalize();
		assert_eq!(config.reconciliation_interval_secs, 5);
		assert_eq!(config.backoff_interval_secs, 60);
	}

	#[test]
	fn test_serde_roundtrip() {
		let config = PrebuildsConfig {
			reconciliation_interval_secs: 15,
			backoff_interval_secs: 90,
			backoff_lookback_secs: 3600,
			lock_ttl_secs: 30,
		};
		let toml_str = toml::to_string(&config).unwrap();
		let parsed: PrebuildsConfig = toml::from_str(&toml_str).unwrap();
		assert_eq!(config, parsed);
	}

	#[test]
	fn test_deserialize_layer_partial() {
		let layer: PrebuildsConfigLayer = toml::from_str(
			r#"
			backoff_interval_secs = 120
			"#,
		)
		.unwrap();
		assert_eq!(layer.backoff_interval_secs, Some(120));
		assert!(layer.reconciliation_interval_secs.is_none());
	}
}
