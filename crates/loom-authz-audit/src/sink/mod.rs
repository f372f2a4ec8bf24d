// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Destinations for flushed decision events.

pub mod file;
pub mod tracing;

use async_trait::async_trait;
use loom_authz_core::AuditEvent;

use crate::error::AuditSinkError;

/// Receives batches of decision events from a flush strategy.
///
/// A batch holds one event for the immediate strategy and everything
/// buffered since the previous flush for the others.
#[async_trait]
pub trait AuditEventSink: Send + Sync {
	fn name(&self) -> &str;

	async fn publish(&self, events: Vec<AuditEvent>) -> Result<(), AuditSinkError>;
}
