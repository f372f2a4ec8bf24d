// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::AuthzConfigLayer;
use crate::sections::{
	AuditConfigLayer, ClientConfigLayer, EvaluatorConfigLayer, HttpConfigLayer, LoggingConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<AuthzConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<AuthzConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(AuthzConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file yields an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/loom/authz.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<AuthzConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(AuthzConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: AuthzConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: LOOM_AUTHZ_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<AuthzConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(AuthzConfigLayer {
			http: Some(load_http_from_env()?),
			evaluator: Some(load_evaluator_from_env()?),
			audit: Some(load_audit_from_env()?),
			client: Some(load_client_from_env()?),
			logging: Some(load_logging_from_env()),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| parse_bool(&v))
}

fn parse_bool(value: &str) -> bool {
	value.eq_ignore_ascii_case("true") || value == "1"
}

/// Parses `value` read from the variable `name`.
fn parse_value<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
		key: name.to_string(),
		message: format!("'{value}': {e}"),
	})
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	env_var(name).map(|v| parse_value(name, &v)).transpose()
}

fn load_http_from_env() -> Result<HttpConfigLayer, ConfigError> {
	Ok(HttpConfigLayer {
		host: env_var("LOOM_AUTHZ_HOST"),
		port: env_parse("LOOM_AUTHZ_PORT")?,
		endpoint_path: env_var("LOOM_AUTHZ_ENDPOINT_PATH"),
		secret: env_var("LOOM_AUTHZ_SECRET"),
	})
}

fn load_evaluator_from_env() -> Result<EvaluatorConfigLayer, ConfigError> {
	Ok(EvaluatorConfigLayer {
		max_call_depth: env_parse("LOOM_AUTHZ_MAX_CALL_DEPTH")?,
		key_separator: env_parse("LOOM_AUTHZ_KEY_SEPARATOR")?,
	})
}

fn load_audit_from_env() -> Result<AuditConfigLayer, ConfigError> {
	Ok(AuditConfigLayer {
		enabled: env_bool("LOOM_AUTHZ_AUDIT_ENABLED"),
		strategy: env_parse("LOOM_AUTHZ_AUDIT_STRATEGY")?,
		flush_period_secs: env_parse("LOOM_AUTHZ_AUDIT_FLUSH_PERIOD_SECS")?,
		batch_timeout_secs: env_parse("LOOM_AUTHZ_AUDIT_BATCH_TIMEOUT_SECS")?,
		sink: env_parse("LOOM_AUTHZ_AUDIT_SINK")?,
		file_path: env_var("LOOM_AUTHZ_AUDIT_FILE_PATH").map(PathBuf::from),
	})
}

fn load_client_from_env() -> Result<ClientConfigLayer, ConfigError> {
	Ok(ClientConfigLayer {
		batch_delay_ms: env_parse("LOOM_AUTHZ_CLIENT_BATCH_DELAY_MS")?,
		job_timeout_ms: env_parse("LOOM_AUTHZ_CLIENT_JOB_TIMEOUT_MS")?,
		request_timeout_ms: env_parse("LOOM_AUTHZ_CLIENT_REQUEST_TIMEOUT_MS")?,
		key_separator: env_parse("LOOM_AUTHZ_CLIENT_KEY_SEPARATOR")?,
	})
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("LOOM_AUTHZ_LOG_LEVEL"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sections::AuditStrategyKind;
	use proptest::prelude::*;
	use std::io::Write;

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Environment > Precedence::ConfigFile);
		assert!(Precedence::ConfigFile > Precedence::Defaults);
	}

	#[test]
	fn test_defaults_source_returns_empty_layer() {
		let layer = DefaultsSource.load().unwrap();
		assert!(layer.http.is_none());
		assert!(layer.audit.is_none());
	}

	#[test]
	fn test_toml_source_missing_file_returns_empty() {
		let source = TomlSource::new("/nonexistent/authz.toml");
		let layer = source.load().unwrap();
		assert!(layer.http.is_none());
	}

	#[test]
	fn test_toml_source_reads_sections() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			"[evaluator]\nmax_call_depth = 20\n\n[audit]\nstrategy = \"windowed\"\nbatch_timeout_secs = 3"
		)
		.unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		assert_eq!(layer.evaluator.unwrap().max_call_depth, Some(20));
		let audit = layer.audit.unwrap();
		assert_eq!(audit.strategy, Some(AuditStrategyKind::Windowed));
		assert_eq!(audit.batch_timeout_secs, Some(3));
	}

	#[test]
	fn test_toml_source_reports_parse_errors() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[audit]\nstrategy = \"sometimes\"").unwrap();

		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}

	#[test]
	fn test_parse_value_reports_key() {
		let err = parse_value::<u16>("LOOM_AUTHZ_PORT", "eighty").unwrap_err();
		match err {
			ConfigError::InvalidValue { key, message } => {
				assert_eq!(key, "LOOM_AUTHZ_PORT");
				assert!(message.contains("eighty"));
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn test_parse_value_strategy() {
		let strategy: AuditStrategyKind =
			parse_value("LOOM_AUTHZ_AUDIT_STRATEGY", "periodic").unwrap();
		assert_eq!(strategy, AuditStrategyKind::Periodic);
		assert!(parse_value::<AuditStrategyKind>("LOOM_AUTHZ_AUDIT_STRATEGY", "never").is_err());
	}

	#[test]
	fn test_parse_bool() {
		assert!(parse_bool("true"));
		assert!(parse_bool("TRUE"));
		assert!(parse_bool("1"));
		assert!(!parse_bool("0"));
		assert!(!parse_bool("yes"));
	}

	proptest! {
		#[test]
		fn parse_value_accepts_any_u64(n: u64) {
			let parsed: u64 = parse_value("LOOM_AUTHZ_CLIENT_JOB_TIMEOUT_MS", &n.to_string()).unwrap();
			prop_assert_eq!(parsed, n);
		}
	}
}
