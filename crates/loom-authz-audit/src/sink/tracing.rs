// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use loom_authz_core::AuditEvent;
use tracing::info;

use crate::error::AuditSinkError;
use crate::sink::AuditEventSink;

/// Emits every decision as a structured `tracing` event on the
/// `loom_authz_audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl TracingAuditSink {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl AuditEventSink for TracingAuditSink {
	fn name(&self) -> &str {
		"tracing"
	}

	async fn publish(&self, events: Vec<AuditEvent>) -> Result<(), AuditSinkError> {
		for event in &events {
			info!(
				target: "loom_authz_audit",
				event_id = %event.id,
				policy_key = %event.policy_key,
				granted = event.decision.granted,
				reason = event.decision.reason.as_deref(),
				denial_message = event.decision.message.as_deref(),
				subject = %event.subject,
				resource = ?event.resource,
				timestamp = %event.timestamp,
				"authorization decision"
			);
		}
		Ok(())
	}
}
