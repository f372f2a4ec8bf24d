// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

/// Request-level failures of the decision endpoint.
///
/// Per-item evaluation failures are not errors at this level; they are
/// reported inside the response array.
#[derive(Debug, Error)]
pub enum EndpointError {
	#[error("Authorization header is required")]
	MissingAuthorization,

	#[error("Invalid authorization header format")]
	InvalidFormat,

	#[error("Invalid shared secret")]
	InvalidSecret,

	#[error("Malformed request body: {0}")]
	MalformedBody(String),
}

impl IntoResponse for EndpointError {
	fn into_response(self) -> Response {
		let (status, error) = match &self {
			Self::MissingAuthorization => (StatusCode::UNAUTHORIZED, "missing_authorization"),
			Self::InvalidFormat => (StatusCode::UNAUTHORIZED, "invalid_format"),
			Self::InvalidSecret => (StatusCode::UNAUTHORIZED, "invalid_secret"),
			Self::MalformedBody(_) => (StatusCode::BAD_REQUEST, "malformed_body"),
		};

		(
			status,
			Json(ErrorResponse {
				error: error.to_string(),
				message: self.to_string(),
			}),
		)
			.into_response()
	}
}
