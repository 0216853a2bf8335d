// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for gantry server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`GANTRY_SERVER_*`)

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::debug;

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
	pub prebuilds: PrebuildsConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`GANTRY_SERVER_*`)
/// 2. Config file (`/etc/gantry/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	Ok(finalize(merged))
}

fn finalize(layer: ServerConfigLayer) -> ServerConfig {
	ServerConfig {
		database: layer.database.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
		prebuilds: layer.prebuilds.unwrap_or_default().finalize(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_finalize_empty_layer_yields_defaults() {
		let config = finalize(ServerConfigLayer::default());
		assert_eq!(config.database.url, "sqlite:./gantry.db");
		assert_eq!(config.logging.level, "info");
		assert_eq!(config.prebuilds.reconciliation_interval_secs, 30);
	}

	#[test]
	fn test_layer_precedence_last_merge_wins() {
		let mut base = ServerConfigLayer::default();
		base.merge(toml::from_str(r#"[database]
url = "sqlite:/tmp/file.db""#).unwrap());
		base.merge(toml::from_str(r#"[database]
url = "sqlite:/tmp/env.db""#).unwrap());

		let config = finalize(base);
		assert_eq!(config.database.url, "sqlite:/tmp/env.db");
	}
}
