// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Buffered audit logging of authorization decisions.
//!
//! An [`AuditDispatcher`] is registered as a decision listener on the
//! evaluator and hands every event to a [`FlushStrategy`], which decides when
//! buffered events are written to an [`AuditEventSink`].

pub mod dispatcher;
pub mod error;
pub mod sink;
pub mod strategy;

use std::sync::Arc;

use loom_authz_config::{AuditConfig, AuditSinkKind, AuditStrategyKind};

pub use dispatcher::AuditDispatcher;
pub use error::{AuditError, AuditResult, AuditSinkError};
pub use sink::file::FileAuditSink;
pub use sink::tracing::TracingAuditSink;
pub use sink::AuditEventSink;
pub use strategy::{
	CompletionHook, EventFilter, FlushOptions, FlushStrategy, ImmediateFlush, ManualFlush,
	PeriodicFlush, WindowedFlush,
};

/// Builds the sink selected by `config`.
pub fn sink_from_config(config: &AuditConfig) -> AuditResult<Arc<dyn AuditEventSink>> {
	match config.sink {
		AuditSinkKind::Tracing => Ok(Arc::new(TracingAuditSink::new())),
		AuditSinkKind::File => {
			let path = config.file_path.as_ref().ok_or_else(|| {
				AuditError::ConfigError("the file audit sink requires a file path".to_string())
			})?;
			Ok(Arc::new(FileAuditSink::new(path)))
		}
	}
}

/// Builds the strategy selected by `config`. Must be called within a Tokio
/// runtime.
pub fn strategy_from_config(
	config: &AuditConfig,
	sink: Arc<dyn AuditEventSink>,
	options: FlushOptions,
) -> AuditResult<Arc<dyn FlushStrategy>> {
	Ok(match config.strategy {
		AuditStrategyKind::Immediate => Arc::new(ImmediateFlush::new(sink, options)),
		AuditStrategyKind::Manual => Arc::new(ManualFlush::new(sink, options)),
		AuditStrategyKind::Periodic => {
			Arc::new(PeriodicFlush::new(sink, config.flush_period(), options)?)
		}
		AuditStrategyKind::Windowed => {
			Arc::new(WindowedFlush::new(sink, config.batch_timeout(), options)?)
		}
	})
}

/// Builds a dispatcher for `config`, or `None` when auditing is disabled.
pub fn dispatcher_from_config(config: &AuditConfig) -> AuditResult<Option<Arc<AuditDispatcher>>> {
	if !config.enabled {
		return Ok(None);
	}
	let sink = sink_from_config(config)?;
	let strategy = strategy_from_config(config, sink, FlushOptions::new())?;
	Ok(Some(Arc::new(AuditDispatcher::new(strategy))))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn disabled_audit_builds_nothing() {
		let config = AuditConfig {
			enabled: false,
			..Default::default()
		};
		assert!(dispatcher_from_config(&config).unwrap().is_none());
	}

	#[tokio::test]
	async fn strategy_follows_config() {
		for (kind, name) in [
			(AuditStrategyKind::Immediate, "immediate"),
			(AuditStrategyKind::Manual, "manual"),
			(AuditStrategyKind::Periodic, "periodic"),
			(AuditStrategyKind::Windowed, "windowed"),
		] {
			let config = AuditConfig {
				strategy: kind,
				..Default::default()
			};
			let dispatcher = dispatcher_from_config(&config).unwrap().unwrap();
			assert_eq!(dispatcher.strategy().name(), name);
			dispatcher.shutdown().await;
		}
	}

	#[test]
	fn file_sink_requires_path() {
		let config = AuditConfig {
			sink: AuditSinkKind::File,
			..Default::default()
		};
		assert!(sink_from_config(&config).is_err());
	}

	#[tokio::test]
	async fn file_sink_from_config() {
		let dir = tempfile::tempdir().unwrap();
		let config = AuditConfig {
			sink: AuditSinkKind::File,
			file_path: Some(dir.path().join("audit.jsonl")),
			..Default::default()
		};
		assert_eq!(sink_from_config(&config).unwrap().name(), "file");
	}
}
