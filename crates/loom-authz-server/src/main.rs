// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loom authz server binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use loom_authz_core::{DecisionListener, EvaluatorConfig};
use loom_authz_server::{create_router, policies::reference_evaluator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Loom authz server - answers batched authorization questions over HTTP.
#[derive(Parser, Debug)]
#[command(name = "loom-authz-server", about = "Loom authorization decision server", version)]
struct Args {
	/// Path to a TOML config file (defaults to /etc/loom/authz.toml)
	#[arg(long, short)]
	config: Option<PathBuf>,

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
		println!("loom-authz-server version: {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	let config = match &args.config {
		Some(path) => loom_authz_config::load_config_with_file(path)?,
		None => loom_authz_config::load_config()?,
	};

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let secret = config.http.require_secret()?.to_string();

	let evaluator = reference_evaluator(
		config.evaluator.key_separator,
		EvaluatorConfig {
			max_call_depth: config.evaluator.max_call_depth,
		},
	)?;

	tracing::info!(policies = ?evaluator.policies().keys(), "registered policies");

	let dispatcher = loom_authz_audit::dispatcher_from_config(&config.audit)?;
	if let Some(dispatcher) = &dispatcher {
		let listener: std::sync::Arc<dyn DecisionListener> = dispatcher.clone();
		evaluator.add_listener(listener);
	}

	let app = create_router(evaluator, secret, &config.http.endpoint_path);

	let addr = config.socket_addr();
	tracing::info!(
		addr = %addr,
		endpoint = %config.http.endpoint_path,
		audit_strategy = ?config.audit.strategy,
		"starting loom-authz-server"
	);

	let listener = tokio::net::TcpListener::bind(&addr).await?;

	tokio::select! {
		result = axum::serve(listener, app) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "server error");
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("received shutdown signal");
		}
	}

	if let Some(dispatcher) = dispatcher {
		tracing::info!("flushing audit events");
		dispatcher.shutdown().await;
	}

	tracing::info!("server shutdown complete");
	Ok(())
}
