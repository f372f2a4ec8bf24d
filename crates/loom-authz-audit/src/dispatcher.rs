// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loom_authz_core::{AuditEvent, DecisionListener, ListenerError};
use tracing::info;

use crate::strategy::FlushStrategy;

/// Feeds an evaluator's decision events into a [`FlushStrategy`].
pub struct AuditDispatcher {
	strategy: Arc<dyn FlushStrategy>,
	closed: AtomicBool,
}

impl AuditDispatcher {
	pub fn new(strategy: Arc<dyn FlushStrategy>) -> Self {
		Self {
			strategy,
			closed: AtomicBool::new(false),
		}
	}

	pub fn strategy(&self) -> &Arc<dyn FlushStrategy> {
		&self.strategy
	}

	pub async fn flush(&self) {
		self.strategy.trigger_flush().await;
	}

	/// Stops accepting events and drains the strategy.
	pub async fn shutdown(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		info!(strategy = self.strategy.name(), "shutting down audit dispatcher");
		self.strategy.shutdown().await;
	}
}

impl DecisionListener for AuditDispatcher {
	fn on_decision(&self, event: AuditEvent) -> Result<(), ListenerError> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(ListenerError::Closed);
		}
		self.strategy.on_event(event);
		Ok(())
	}
}
