// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the Loom authz server and client SDK.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`LOOM_AUTHZ_*`)
//!
//! # Usage
//!
//! ```ignore
//! use loom_authz_config::load_config;
//!
//! let config = load_config()?;
//! println!("authz endpoint on {}{}", config.socket_addr(), config.http.endpoint_path);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::AuthzConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthzConfig {
	pub http: HttpConfig,
	pub evaluator: EvaluatorConfig,
	pub audit: AuditConfig,
	pub client: ClientConfig,
	pub logging: LoggingConfig,
}

impl AuthzConfig {
	/// Get the socket address string for binding.
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.http.host, self.http.port)
	}
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`LOOM_AUTHZ_*`)
/// 2. Config file (`/etc/loom/authz.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<AuthzConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only (for testing or simple deployments).
pub fn load_config_from_env() -> Result<AuthzConfig, ConfigError> {
	load_from_sources(vec![Box::new(DefaultsSource), Box::new(EnvSource)])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<AuthzConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Merge `sources` in precedence order and finalize the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<AuthzConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = AuthzConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
fn finalize(layer: AuthzConfigLayer) -> Result<AuthzConfig, ConfigError> {
	let evaluator = layer.evaluator.unwrap_or_default().finalize();
	let config = AuthzConfig {
		http: layer.http.unwrap_or_default().finalize(),
		client: layer.client.unwrap_or_default().finalize(evaluator.key_separator),
		evaluator,
		audit: layer.audit.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
	};

	validate_config(&config)?;

	info!(
		host = %config.http.host,
		port = config.http.port,
		endpoint = %config.http.endpoint_path,
		secret_configured = config.http.secret.is_some(),
		max_call_depth = config.evaluator.max_call_depth,
		audit_enabled = config.audit.enabled,
		audit_strategy = ?config.audit.strategy,
		audit_sink = ?config.audit.sink,
		"authz configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &AuthzConfig) -> Result<(), ConfigError> {
	if config.evaluator.max_call_depth == 0 {
		return Err(ConfigError::Validation(
			"evaluator.max_call_depth must be at least 1".to_string(),
		));
	}

	if !config.http.endpoint_path.starts_with('/') {
		return Err(ConfigError::Validation(format!(
			"http.endpoint_path must start with '/', got '{}'",
			config.http.endpoint_path
		)));
	}

	let audit = &config.audit;
	if audit.enabled {
		if audit.sink == AuditSinkKind::File && audit.file_path.is_none() {
			return Err(ConfigError::Validation(
				"audit.sink = \"file\" requires audit.file_path (LOOM_AUTHZ_AUDIT_FILE_PATH)"
					.to_string(),
			));
		}
		if audit.strategy == AuditStrategyKind::Periodic && audit.flush_period_secs == 0 {
			return Err(ConfigError::Validation(
				"audit.flush_period_secs must be positive for the periodic strategy".to_string(),
			));
		}
		if audit.strategy == AuditStrategyKind::Windowed && audit.batch_timeout_secs == 0 {
			return Err(ConfigError::Validation(
				"audit.batch_timeout_secs must be positive for the windowed strategy".to_string(),
			));
		}
	}

	Ok(())
}
