// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Decision events emitted after every evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::decision::DecisionSummary;

/// Immutable record of one evaluated decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
	pub id: Uuid,
	pub policy_key: String,
	pub subject: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource: Option<Value>,
	pub decision: DecisionSummary,
	pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
	pub fn new(
		policy_key: impl Into<String>,
		subject: Value,
		resource: Option<Value>,
		decision: DecisionSummary,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			policy_key: policy_key.into(),
			subject,
			resource,
			decision,
			timestamp: Utc::now(),
		}
	}

	pub fn granted(&self) -> bool {
		self.decision.granted
	}
}

#[derive(Debug, Error)]
pub enum ListenerError {
	#[error("listener rejected event: {0}")]
	Rejected(String),

	#[error("listener has been shut down")]
	Closed,
}

/// Receives every decision event produced by an evaluator.
///
/// Called on the evaluation path; implementations should only enqueue work.
/// Errors are logged by the evaluator and never affect the decision.
pub trait DecisionListener: Send + Sync {
	fn on_decision(&self, event: AuditEvent) -> Result<(), ListenerError>;
}
