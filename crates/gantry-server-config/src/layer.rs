// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

use crate::sections::{DatabaseConfigLayer, LoggingConfigLayer, PrebuildsConfigLayer};

/// Partial configuration as read from one source. Sections and fields left
/// unset fall through to lower-precedence sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfigLayer {
	pub database: Option<DatabaseConfigLayer>,
	pub logging: Option<LoggingConfigLayer>,
	pub prebuilds: Option<PrebuildsConfigLayer>,
}

impl ServerConfigLayer {
	pub fn merge(&mut self, other: Self) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
		merge_section(
			&mut self.prebuilds,
			other.prebuilds,
			PrebuildsConfigLayer::merge,
		);
	}
}

fn merge_section<T>(base: &mut Option<T>, overlay: Option<T>, merge: fn(&mut T, T)) {
	match (base.as_mut(), overlay) {
		(Some(base), Some(overlay)) => merge(base, overlay),
		(None, Some(overlay)) => *base = Some(overlay),
		_ => {}
	}
}
