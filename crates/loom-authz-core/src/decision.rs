// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Decision values returned by policies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_DENIAL_MESSAGE: &str = "unauthorized";

/// Outcome of a single policy evaluation.
///
/// `Granted` always carries a subject, which may be a narrowed or refined
/// version of the subject the policy received. `Denied` never does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Decision<S> {
	Granted { subject: S },
	Denied(Denial),
}

impl<S> Decision<S> {
	/// Grants access, passing `subject` on as the narrowed subject.
	pub fn grant(subject: S) -> Self {
		Self::Granted { subject }
	}

	/// Denies access without a message.
	pub fn deny() -> Self {
		Self::Denied(Denial::default())
	}

	/// Denies access with a human readable message.
	pub fn deny_with(message: impl Into<String>) -> Self {
		Self::Denied(Denial::new().with_message(message))
	}

	/// Builds a decision from a boolean check result.
	pub fn from_bool(allowed: bool, subject: S) -> Self {
		if allowed {
			Self::grant(subject)
		} else {
			Self::deny()
		}
	}

	pub fn is_granted(&self) -> bool {
		matches!(self, Self::Granted { .. })
	}

	pub fn subject(&self) -> Option<&S> {
		match self {
			Self::Granted { subject } => Some(subject),
			Self::Denied(_) => None,
		}
	}

	pub fn denial(&self) -> Option<&Denial> {
		match self {
			Self::Granted { .. } => None,
			Self::Denied(denial) => Some(denial),
		}
	}

	/// Projects the decision into the form recorded on audit events.
	pub fn summary(&self) -> DecisionSummary {
		match self {
			Self::Granted { .. } => DecisionSummary {
				granted: true,
				message: None,
				reason: None,
			},
			Self::Denied(denial) => DecisionSummary {
				granted: false,
				message: denial.message.clone(),
				reason: denial.reason.clone(),
			},
		}
	}
}

/// Details attached to a denied decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Denial {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
}

impl Denial {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}

	/// Sets a machine readable reason code (e.g. `"not_owner"`).
	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());
		self
	}

	pub fn with_metadata(mut self, metadata: Value) -> Self {
		self.metadata = Some(metadata);
		self
	}

	pub fn message_or_default(&self) -> &str {
		self.message.as_deref().unwrap_or(DEFAULT_DENIAL_MESSAGE)
	}
}

/// Subject-free projection of a [`Decision`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSummary {
	pub granted: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}
