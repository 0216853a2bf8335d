// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Best-effort broadcast event bus.
//!
//! The prebuild subsystem uses pubsub purely to reduce reconciliation
//! latency: every message is a hint that state changed, and the periodic
//! reconciliation tick is the backstop. Messages may therefore be dropped
//! under load without affecting correctness, and the implementation leans on
//! `tokio::sync::broadcast` which sheds the oldest messages when a subscriber
//! lags.

pub mod channels;
pub mod error;

pub use channels::{PREBUILD_CREATED_CHANNEL, PREBUILD_READY_CHANNEL, PREBUILD_RECONCILE_CHANNEL};
pub use error::{PubsubError, Result};

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Buffered messages per channel before the oldest are shed.
const CHANNEL_CAPACITY: usize = 64;

/// Publish/subscribe capability set. Payloads are opaque bytes; the prebuild
/// channels carry UTF-8 encoded identifiers.
#[async_trait]
pub trait Pubsub: Send + Sync {
	/// Broadcast a payload to current subscribers of `channel`. Delivery is
	/// best-effort: publishing to a channel with no subscribers succeeds and
	/// the message is discarded.
	async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;

	/// Subscribe to a channel. The receiver reports `Lagged` when messages
	/// were shed; subscribers treat that the same as receiving a message,
	/// since both mean "state may have changed".
	fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>>;
}

/// In-process pubsub backed by one broadcast channel per topic.
#[derive(Default)]
pub struct InProcPubsub {
	senders: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl InProcPubsub {
	pub fn new() -> Self {
		Self::default()
	}

	fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
		let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
		senders
			.entry(channel.to_string())
			.or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
			.clone()
	}
}

#[async_trait]
impl Pubsub for InProcPubsub {
	async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
		// A send error only means there are no subscribers right now.
		let _ = self.sender(channel).send(payload.to_vec());
		tracing::trace!(channel, bytes = payload.len(), "published message");
		Ok(())
	}

	fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
		self.sender(channel).subscribe()
	}
}
