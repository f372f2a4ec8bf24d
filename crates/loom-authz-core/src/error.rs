// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for decision evaluation.
//!
//! A [`Decision::Denied`](crate::Decision::Denied) is an expected outcome and is
//! carried as data. [`AuthzError`] is only produced for three situations:
//!
//! - `authorize` converting a denial into an error ([`AuthzError::Denied`])
//! - a handler replacing that error with its own ([`AuthzError::Handler`])
//! - programmer errors such as typo'd policy keys or runaway recursion

use thiserror::Error;

use crate::decision::Denial;

/// Errors raised while evaluating authorization decisions.
#[derive(Debug, Error)]
pub enum AuthzError {
	/// No policy is registered at the requested key.
	#[error("no policy registered at `{key}`")]
	PolicyNotFound { key: String },

	/// The key resolves to a group of policies rather than a single policy.
	#[error("`{key}` resolves to a policy group, not a policy; add the remaining path segments")]
	NotAPolicy { key: String },

	/// The key could not be registered because part of its path is already a policy.
	#[error("cannot register `{key}`: `{conflict}` is already a policy")]
	KeyConflict { key: String, conflict: String },

	/// Nested evaluations exceeded the configured call depth.
	#[error(
		"authorization call depth {depth} exceeded the limit of {limit}; a policy or the subject \
		 getter is most likely evaluating a decision that leads back to itself"
	)]
	RecursionLimit { depth: usize, limit: usize },

	/// The external subject getter failed.
	#[error("failed to load subject: {0}")]
	SubjectUnavailable(String),

	/// A policy failed while computing its decision (e.g. a lookup error).
	#[error("policy `{key}` failed: {message}")]
	PolicyFailed { key: String, message: String },

	/// Access was denied and no handler substituted its own error.
	#[error("access denied: {}", .0.message_or_default())]
	Denied(Denial),

	/// An unauthorized handler raised its own error (e.g. a redirect signal).
	#[error(transparent)]
	Handler(Box<dyn std::error::Error + Send + Sync>),
}

impl AuthzError {
	/// Wraps an arbitrary error raised by an unauthorized handler.
	pub fn handler(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
		Self::Handler(err.into())
	}

	/// Wraps a failure that occurred inside a policy body.
	pub fn policy_failed(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
		Self::PolicyFailed {
			key: key.into(),
			message: err.to_string(),
		}
	}

	/// Returns true for programmer errors that should be loud and never retried.
	pub fn is_internal(&self) -> bool {
		matches!(
			self,
			Self::PolicyNotFound { .. }
				| Self::NotAPolicy { .. }
				| Self::KeyConflict { .. }
				| Self::RecursionLimit { .. }
		)
	}

	/// Returns true if this error represents a denied decision.
	pub fn is_denied(&self) -> bool {
		matches!(self, Self::Denied(_))
	}
}

/// Result type alias for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;
