// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the authz client SDK.

use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced to callers of the client.
///
/// Cloneable because a single batched job result is shared by every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
	/// The server could not be reached.
	#[error("authz server unreachable: {0}")]
	Unreachable(String),

	/// The server rejected the shared secret.
	#[error("authz server rejected the shared secret")]
	BadSecret,

	/// The response could not be matched or decoded.
	#[error("malformed response from authz server: {0}")]
	MalformedResponse(String),

	/// Server returned a non-success status.
	#[error("authz server error (status {status}): {message}")]
	ServerError {
		/// HTTP status code.
		status: u16,
		/// Response body.
		message: String,
	},

	/// The server answered the batch but failed to evaluate this item.
	#[error("authz server failed to evaluate request: {0}")]
	ItemFailed(String),

	/// The request or job exceeded its timeout.
	#[error("authz request timed out")]
	Timeout,

	/// The caller's cancellation signal fired.
	#[error("authz request was cancelled")]
	Cancelled,

	/// The client has been shut down.
	#[error("authz client has been shut down")]
	Shutdown,

	/// Missing base URL or secret.
	#[error("invalid client configuration: {0}")]
	InvalidConfig(String),

	/// A job was left unsettled or dropped.
	#[error("internal client error: {0}")]
	Internal(String),
}

impl From<reqwest::Error> for ClientError {
	fn from(e: reqwest::Error) -> Self {
		if e.is_timeout() {
			Self::Timeout
		} else if e.is_decode() {
			Self::MalformedResponse(e.to_string())
		} else {
			Self::Unreachable(e.to_string())
		}
	}
}
