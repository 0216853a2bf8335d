// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources, merged lowest-precedence first.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{DatabaseConfigLayer, LoggingConfigLayer, PrebuildsConfigLayer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults,
	File,
	Environment,
}

pub trait ConfigSource {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults: an empty layer, so every field falls through to its
/// section's `finalize` default.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		Ok(ServerConfigLayer::default())
	}
}

/// TOML config file. A missing file is not an error; any other read or parse
/// failure is.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/gantry/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml"
	}

	fn precedence(&self) -> Precedence {
		Precedence::File
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		let contents = match std::fs::read_to_string(&self.path) {
			Ok(contents) => contents,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Ok(ServerConfigLayer::default());
			}
			Err(e) => return Err(e.into()),
		};
		Ok(toml::from_str(&contents)?)
	}
}

/// `GANTRY_SERVER_*` environment variables.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		let mut layer = ServerConfigLayer::default();

		if let Some(url) = env_string("GANTRY_SERVER_DATABASE_URL") {
			layer.database = Some(DatabaseConfigLayer { url: Some(url) });
		}
		if let Some(level) = env_string("GANTRY_SERVER_LOG_LEVEL") {
			layer.logging = Some(LoggingConfigLayer { level: Some(level) });
		}

		let prebuilds = PrebuildsConfigLayer {
			reconciliation_interval_secs: env_u64(
				"GANTRY_SERVER_PREBUILDS_RECONCILIATION_INTERVAL_SECS",
			)?,
			backoff_interval_secs: env_u64("GANTRY_SERVER_PREBUILDS_BACKOFF_INTERVAL_SECS")?,
			backoff_lookback_secs: env_u64("GANTRY_SERVER_PREBUILDS_BACKOFF_LOOKBACK_SECS")?,
			lock_ttl_secs: env_u64("GANTRY_SERVER_PREBUILDS_LOCK_TTL_SECS")?,
		};
		if prebuilds != PrebuildsConfigLayer::default() {
			layer.prebuilds = Some(prebuilds);
		}

		Ok(layer)
	}
}

fn env_string(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_string(name) {
		None => Ok(None),
		Some(value) => value
			.parse()
			.map(Some)
			.map_err(|e| ConfigError::Invalid(format!("{name}={value}: {e}"))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_missing_file_yields_empty_layer() {
		let source = TomlSource::new("/nonexistent/gantry/server.toml");
		assert_eq!(source.load().unwrap(), ServerConfigLayer::default());
	}

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Defaults < Precedence::File);
		assert!(Precedence::File < Precedence::Environment);
	}

	// One test covers both env cases: the variables are process-global, so
	// exercising them from parallel tests would race.
	#[test]
	fn test_env_source_parsing() {
		std::env::set_var("GANTRY_SERVER_PREBUILDS_BACKOFF_INTERVAL_SECS", "120");
		let layer = EnvSource.load().unwrap();
		std::env::remove_var("GANTRY_SERVER_PREBUILDS_BACKOFF_INTERVAL_SECS");
		assert_eq!(layer.prebuilds.unwrap().backoff_interval_secs, Some(120));

		std::env::set_var("GANTRY_SERVER_PREBUILDS_LOCK_TTL_SECS", "soon");
		let result = EnvSource.load();
		std::env::remove_var("GANTRY_SERVER_PREBUILDS_LOCK_TTL_SECS");
		assert!(matches!(result, Err(ConfigError::Invalid(_))));
	}
}
