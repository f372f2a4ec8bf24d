// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP endpoint configuration section.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_ENDPOINT_PATH: &str = "/api/authz";

#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpConfigLayer {
	pub host: Option<String>,
	pub port: Option<u16>,
	pub endpoint_path: Option<String>,
	pub secret: Option<String>,
}

impl std::fmt::Debug for HttpConfigLayer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HttpConfigLayer")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("endpoint_path", &self.endpoint_path)
			.field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
			.finish()
	}
}

impl HttpConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.host.is_some() {
			self.host = other.host;
		}
		if other.port.is_some() {
			self.port = other.port;
		}
		if other.endpoint_path.is_some() {
			self.endpoint_path = other.endpoint_path;
		}
		if other.secret.is_some() {
			self.secret = other.secret;
		}
	}

	pub fn finalize(self) -> HttpConfig {
		HttpConfig {
			host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
			port: self.port.unwrap_or(8080),
			endpoint_path: self
				.endpoint_path
				.unwrap_or_else(|| DEFAULT_ENDPOINT_PATH.to_string()),
			secret: self.secret,
		}
	}
}

#[derive(Clone, PartialEq)]
pub struct HttpConfig {
	pub host: String,
	pub port: u16,
	pub endpoint_path: String,
	/// Shared secret expected in the `Authorization: Bearer` header.
	pub secret: Option<String>,
}

impl HttpConfig {
	/// Returns the shared secret, which is mandatory for serving.
	pub fn require_secret(&self) -> Result<&str, ConfigError> {
		self.secret
			.as_deref()
			.ok_or_else(|| ConfigError::Missing {
				key: "LOOM_AUTHZ_SECRET".to_string(),
			})
	}
}

impl Default for HttpConfig {
	fn default() -> Self {
		HttpConfigLayer::default().finalize()
	}
}

impl std::fmt::Debug for HttpConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HttpConfig")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("endpoint_path", &self.endpoint_path)
			.field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
			.finish()
	}
}
