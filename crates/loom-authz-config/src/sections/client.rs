// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client SDK configuration section.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfigLayer {
	pub batch_delay_ms: Option<u64>,
	pub job_timeout_ms: Option<u64>,
	pub request_timeout_ms: Option<u64>,
	/// Splits policy keys into cache path segments. Defaults to the
	/// evaluator's separator.
	pub key_separator: Option<char>,
}

impl ClientConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.batch_delay_ms.is_some() {
			self.batch_delay_ms = other.batch_delay_ms;
		}
		if other.job_timeout_ms.is_some() {
			self.job_timeout_ms = other.job_timeout_ms;
		}
		if other.request_timeout_ms.is_some() {
			self.request_timeout_ms = other.request_timeout_ms;
		}
		if other.key_separator.is_some() {
			self.key_separator = other.key_separator;
		}
	}

	/// `evaluator_separator` applies when no client separator is set.
	pub fn finalize(self, evaluator_separator: char) -> ClientConfig {
		ClientConfig {
			batch_delay_ms: self.batch_delay_ms.unwrap_or(50),
			job_timeout_ms: self.job_timeout_ms.unwrap_or(10_000),
			request_timeout_ms: self.request_timeout_ms.unwrap_or(30_000),
			key_separator: self.key_separator.unwrap_or(evaluator_separator),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
	pub batch_delay_ms: u64,
	pub job_timeout_ms: u64,
	pub request_timeout_ms: u64,
	pub key_separator: char,
}

impl ClientConfig {
	pub fn batch_delay(&self) -> Duration {
		Duration::from_millis(self.batch_delay_ms)
	}

	pub fn job_timeout(&self) -> Duration {
		Duration::from_millis(self.job_timeout_ms)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}
}

impl Default for ClientConfig {
	fn default() -> Self {
		ClientConfigLayer::default().finalize(':')
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = ClientConfig::default();
		assert_eq!(config.batch_delay(), Duration::from_millis(50));
		assert_eq!(config.job_timeout(), Duration::from_secs(10));
		assert_eq!(config.request_timeout(), Duration::from_secs(30));
		assert_eq!(config.key_separator, ':');
	}

	#[test]
	fn test_separator_falls_back_to_evaluator() {
		assert_eq!(ClientConfigLayer::default().finalize('.').key_separator, '.');

		let layer = ClientConfigLayer {
			key_separator: Some('/'),
			..Default::default()
		};
		assert_eq!(layer.finalize('.').key_separator, '/');
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = ClientConfigLayer {
			batch_delay_ms: Some(10),
			job_timeout_ms: Some(500),
			..Default::default()
		};
		base.merge(ClientConfigLayer {
			job_timeout_ms: Some(2_000),
			..Default::default()
		});
		let config = base.finalize(':');
		assert_eq!(config.batch_delay_ms, 10);
		assert_eq!(config.job_timeout_ms, 2_000);
		assert_eq!(config.request_timeout_ms, 30_000);
	}
}
