// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

const POOL_LABELS: &[&str] = &["template_name", "preset_name"];

/// Prometheus metrics for the prebuild subsystem. Counters track lifecycle
/// events as they happen; gauges are refreshed from the snapshot on every
/// reconciliation pass.
pub struct PrebuildMetrics {
	registry: Registry,

	pub created: CounterVec,
	pub failed: CounterVec,
	pub assigned: CounterVec,

	pub desired: GaugeVec,
	pub actual: GaugeVec,
	pub eligible: GaugeVec,
}

impl Default for PrebuildMetrics {
	fn default() -> Self {
		Self::new()
	}
}

impl PrebuildMetrics {
	pub fn new() -> Self {
		let registry = Registry::new();

		let created = CounterVec::new(
			Opts::new(
				"gantry_prebuilds_created_total",
				"Prebuild workspaces created",
			),
			POOL_LABELS,
		)
		.unwrap();
		registry.register(Box::new(created.clone())).unwrap();

		let failed = CounterVec::new(
			Opts::new(
				"gantry_prebuilds_failed_total",
				"Prebuild builds that failed",
			),
			POOL_LABELS,
		)
		.unwrap();
		registry.register(Box::new(failed.clone())).unwrap();

		let assigned = CounterVec::new(
			Opts::new(
				"gantry_prebuilds_assigned_total",
				"Prebuilds claimed by users",
			),
			POOL_LABELS,
		)
		.unwrap();
		registry.register(Box::new(assigned.clone())).unwrap();

		let desired = GaugeVec::new(
			Opts::new("gantry_prebuilds_desired", "Desired prebuilds per pool"),
			POOL_LABELS,
		)
		.unwrap();
		registry.register(Box::new(desired.clone())).unwrap();

		let actual = GaugeVec::new(
			Opts::new("gantry_prebuilds_actual", "Current prebuilds per pool"),
			POOL_LABELS,
		)
		.unwrap();
		registry.register(Box::new(actual.clone())).unwrap();

		let eligible = GaugeVec::new(
			Opts::new(
				"gantry_prebuilds_eligible",
				"Prebuilds ready to be claimed per pool",
			),
			POOL_LABELS,
		)
		.unwrap();
		registry.register(Box::new(eligible.clone())).unwrap();

		PrebuildMetrics {
			registry,
			created,
			failed,
			assigned,
			desired,
			actual,
			eligible,
		}
	}

	pub fn record_created(&self, template: &str, preset: &str) {
		self.created.with_label_values(&[template, preset]).inc();
	}

	pub fn record_failed(&self, template: &str, preset: &str, count: u64) {
		self
			.failed
			.with_label_values(&[template, preset])
			.inc_by(count as f64);
	}

	pub fn record_assigned(&self, template: &str, preset: &str) {
		self.assigned.with_label_values(&[template, preset]).inc();
	}

	pub fn set_pool_gauges(
		&self,
		template: &str,
		preset: &str,
		desired: u32,
		actual: u32,
		eligible: u32,
	) {
		self
			.desired
			.with_label_values(&[template, preset])
			.set(desired as f64);
		self
			.actual
			.with_label_values(&[template, preset])
			.set(actual as f64);
		self
			.eligible
			.with_label_values(&[template, preset])
			.set(eligible as f64);
	}

	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		let mut buffer = Vec::new();
		encoder.encode(&metric_families, &mut buffer).unwrap();
		String::from_utf8(buffer).unwrap()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_counters_accumulate_per_pool() {
		let metrics = PrebuildMetrics::new();
		metrics.record_created("docker", "big");
		metrics.record_created("docker", "big");
		metrics.record_created("docker", "small");

		assert_eq!(
			metrics.created.with_label_values(&["docker", "big"]).get(),
			2.0
		);
		assert_eq!(
			metrics
				.created
				.with_label_values(&["docker", "small"])
				.get(),
			1.0
		);
	}

	#[test]
	fn test_gauges_overwrite() {
		let metrics = PrebuildMetrics::new();
		metrics.set_pool_gauges("docker", "big", 3, 1, 0);
		metrics.set_pool_gauges("docker", "big", 3, 3, 2);

		assert_eq!(
			metrics.actual.with_label_values(&["docker", "big"]).get(),
			3.0
		);
		assert_eq!(
			metrics.eligible.with_label_values(&["docker", "big"]).get(),
			2.0
		);
	}

	#[test]
	fn test_encode_renders_prometheus_text() {
		let metrics = PrebuildMetrics::new();
		metrics.record_assigned("docker", "big");

		let text = metrics.encode();
		assert!(text.contains("gantry_prebuilds_assigned_total"));
		assert!(text.contains("template_name=\"docker\""));
	}
}
