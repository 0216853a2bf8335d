// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! gantry control-plane server binary.
//!
//! Wires the store, pubsub, and the prebuild reconciler together, exposes
//! health and metrics endpoints, and shuts the reconciler down cleanly on
//! SIGINT.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gantry_server_db::{create_pool, run_migrations, UserRepository};
use gantry_server_prebuilds::{PrebuildMetrics, ReconcilerSettings, StoreReconciler};
use gantry_server_pubsub::{InProcPubsub, Pubsub};

mod routes;

/// gantry server - workspace control plane with prebuild pools.
#[derive(Parser, Debug)]
#[command(name = "gantry-server", about = "gantry workspace control-plane server", version)]
struct Args {
	/// Path to a TOML config file (defaults to /etc/gantry/server.toml).
	#[arg(long)]
	config: Option<std::path::PathBuf>,

	/// Address to serve health and metrics endpoints on.
	#[arg(long, default_value = "127.0.0.1:8080")]
	listen: String,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version information
	Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("gantry-server {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => gantry_server_config::load_config_with_file(path)?,
		None => gantry_server_config::load_config()?,
	};

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let pool = create_pool(&config.database.url).await?;
	run_migrations(&pool).await?;
	UserRepository::new(pool.clone())
		.ensure_prebuilds_user()
		.await?;

	let pubsub: Arc<dyn Pubsub> = Arc::new(InProcPubsub::new());
	let metrics = Arc::new(PrebuildMetrics::new());
	let settings = ReconcilerSettings {
		reconciliation_interval: std::time::Duration::from_secs(
			config.prebuilds.reconciliation_interval_secs,
		),
		backoff_interval: chrono::Duration::seconds(config.prebuilds.backoff_interval_secs as i64),
		backoff_lookback: chrono::Duration::seconds(config.prebuilds.backoff_lookback_secs as i64),
		lock_ttl: chrono::Duration::seconds(config.prebuilds.lock_ttl_secs as i64),
	};

	let reconciler = Arc::new(StoreReconciler::new(
		pool.clone(),
		pubsub.clone(),
		settings,
		metrics.clone(),
	));
	reconciler.validate_startup().await?;

	let (shutdown_tx, _) = broadcast::channel(1);
	let reconciler_task = {
		let reconciler = Arc::clone(&reconciler);
		let shutdown_rx = shutdown_tx.subscribe();
		tokio::spawn(async move { reconciler.run(shutdown_rx).await })
	};

	let state = routes::AppState {
		pool: pool.clone(),
		metrics,
	};
	let app = axum::Router::new()
		.route("/healthz", axum::routing::get(routes::healthz))
		.route("/metrics", axum::routing::get(routes::metrics))
		.with_state(state)
		.layer(TraceLayer::new_for_http());

	let listener = tokio::net::TcpListener::bind(&args.listen).await?;
	tracing::info!(addr = %listener.local_addr()?, "gantry server listening");

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	// Let the reconciler finish its current pass before exiting.
	let _ = shutdown_tx.send(());
	reconciler_task.await?;

	Ok(())
}

async fn shutdown_signal() {
	if let Err(error) = tokio::signal::ctrl_c().await {
		tracing::warn!(%error, "failed to listen for shutdown signal");
	}
}
