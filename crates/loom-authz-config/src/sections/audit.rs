// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit configuration section.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When buffered decision events are written to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditStrategyKind {
	#[default]
	Immediate,
	Manual,
	Periodic,
	Windowed,
}

impl FromStr for AuditStrategyKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"immediate" => Ok(Self::Immediate),
			"manual" => Ok(Self::Manual),
			"periodic" => Ok(Self::Periodic),
			"windowed" => Ok(Self::Windowed),
			other => Err(format!(
				"unknown audit strategy '{other}' (expected immediate, manual, periodic or windowed)"
			)),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
	#[default]
	Tracing,
	File,
}

impl FromStr for AuditSinkKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"tracing" => Ok(Self::Tracing),
			"file" => Ok(Self::File),
			other => Err(format!(
				"unknown audit sink '{other}' (expected tracing or file)"
			)),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditConfigLayer {
	pub enabled: Option<bool>,
	pub strategy: Option<AuditStrategyKind>,
	pub flush_period_secs: Option<u64>,
	pub batch_timeout_secs: Option<u64>,
	pub sink: Option<AuditSinkKind>,
	pub file_path: Option<PathBuf>,
}

impl AuditConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.strategy.is_some() {
			self.strategy = other.strategy;
		}
		if other.flush_period_secs.is_some() {
			self.flush_period_secs = other.flush_period_secs;
		}
		if other.batch_timeout_secs.is_some() {
			self.batch_timeout_secs = other.batch_timeout_secs;
		}
		if other.sink.is_some() {
			self.sink = other.sink;
		}
		if other.file_path.is_some() {
			self.file_path = other.file_path;
		}
	}

	pub fn finalize(self) -> AuditConfig {
		AuditConfig {
			enabled: self.enabled.unwrap_or(true),
			strategy: self.strategy.unwrap_or_default(),
			flush_period_secs: self.flush_period_secs.unwrap_or(10),
			batch_timeout_secs: self.batch_timeout_secs.unwrap_or(1),
			sink: self.sink.unwrap_or_default(),
			file_path: self.file_path,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditConfig {
	pub enabled: bool,
	pub strategy: AuditStrategyKind,
	/// Interval of the periodic strategy.
	pub flush_period_secs: u64,
	/// Window length of the windowed strategy.
	pub batch_timeout_secs: u64,
	pub sink: AuditSinkKind,
	/// Target of the file sink, required when `sink = "file"`.
	pub file_path: Option<PathBuf>,
}

impl AuditConfig {
	pub fn flush_period(&self) -> Duration {
		Duration::from_secs(self.flush_period_secs)
	}

	pub fn batch_timeout(&self) -> Duration {
		Duration::from_secs(self.batch_timeout_secs)
	}
}

impl Default for AuditConfig {
	fn default() -> Self {
		AuditConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = AuditConfig::default();
		assert!(config.enabled);
		assert_eq!(config.strategy, AuditStrategyKind::Immediate);
		assert_eq!(config.sink, AuditSinkKind::Tracing);
		assert_eq!(config.flush_period(), Duration::from_secs(10));
		assert_eq!(config.batch_timeout(), Duration::from_secs(1));
		assert!(config.file_path.is_none());
	}

	#[test]
	fn test_parse_strategy() {
		assert_eq!(
			"Windowed".parse::<AuditStrategyKind>().unwrap(),
			AuditStrategyKind::Windowed
		);
		assert!("eventually".parse::<AuditStrategyKind>().is_err());
		assert_eq!("file".parse::<AuditSinkKind>().unwrap(), AuditSinkKind::File);
	}

	#[test]
	fn test_parse_from_toml() {
		let layer: AuditConfigLayer = toml::from_str(
			r#"
			strategy = "periodic"
			flush_period_secs = 30
			sink = "file"
			file_path = "/var/log/loom/authz.jsonl"
			"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert_eq!(config.strategy, AuditStrategyKind::Periodic);
		assert_eq!(config.flush_period_secs, 30);
		assert_eq!(config.sink, AuditSinkKind::File);
		assert_eq!(
			config.file_path,
			Some(PathBuf::from("/var/log/loom/authz.jsonl"))
		);
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = AuditConfigLayer {
			strategy: Some(AuditStrategyKind::Manual),
			batch_timeout_secs: Some(5),
			..Default::default()
		};
		base.merge(AuditConfigLayer {
			strategy: Some(AuditStrategyKind::Windowed),
			..Default::default()
		});
		assert_eq!(base.strategy, Some(AuditStrategyKind::Windowed));
		assert_eq!(base.batch_timeout_secs, Some(5));
	}
}
