// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluator configuration section.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorConfigLayer {
	pub max_call_depth: Option<usize>,
	pub key_separator: Option<char>,
}

impl EvaluatorConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.max_call_depth.is_some() {
			self.max_call_depth = other.max_call_depth;
		}
		if other.key_separator.is_some() {
			self.key_separator = other.key_separator;
		}
	}

	pub fn finalize(self) -> EvaluatorConfig {
		EvaluatorConfig {
			max_call_depth: self.max_call_depth.unwrap_or(50),
			key_separator: self.key_separator.unwrap_or(':'),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorConfig {
	pub max_call_depth: usize,
	pub key_separator: char,
}

impl Default for EvaluatorConfig {
	fn default() -> Self {
		EvaluatorConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = EvaluatorConfig::default();
		assert_eq!(config.max_call_depth, 50);
		assert_eq!(config.key_separator, ':');
	}

	#[test]
	fn test_parse_from_toml() {
		let layer: EvaluatorConfigLayer =
			toml::from_str("max_call_depth = 12\nkey_separator = \".\"").unwrap();
		let config = layer.finalize();
		assert_eq!(config.max_call_depth, 12);
		assert_eq!(config.key_separator, '.');
	}
}
