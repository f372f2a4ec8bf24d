// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration produced by each source.

use serde::{Deserialize, Serialize};

use crate::sections::{
	AuditConfigLayer, ClientConfigLayer, EvaluatorConfigLayer, HttpConfigLayer, LoggingConfigLayer,
};

/// One source's view of the configuration. Unset fields defer to lower
/// precedence sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthzConfigLayer {
	pub http: Option<HttpConfigLayer>,
	pub evaluator: Option<EvaluatorConfigLayer>,
	pub audit: Option<AuditConfigLayer>,
	pub client: Option<ClientConfigLayer>,
	pub logging: Option<LoggingConfigLayer>,
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: impl FnOnce(&mut T, T)) {
	match (base.as_mut(), other) {
		(Some(base), Some(other)) => merge(base, other),
		(None, Some(other)) => *base = Some(other),
		(_, None) => {}
	}
}

impl AuthzConfigLayer {
	/// Overlays `other` onto `self`; fields set in `other` win.
	pub fn merge(&mut self, other: Self) {
		merge_section(&mut self.http, other.http, HttpConfigLayer::merge);
		merge_section(&mut self.evaluator, other.evaluator, EvaluatorConfigLayer::merge);
		merge_section(&mut self.audit, other.audit, AuditConfigLayer::merge);
		merge_section(&mut self.client, other.client, ClientConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_fills_missing_sections() {
		let mut base = AuthzConfigLayer::default();
		base.merge(AuthzConfigLayer {
			logging: Some(LoggingConfigLayer {
				level: Some("debug".to_string()),
			}),
			..Default::default()
		});
		assert_eq!(
			base.logging.and_then(|l| l.level).as_deref(),
			Some("debug")
		);
	}

	#[test]
	fn test_merge_is_field_wise() {
		let mut base: AuthzConfigLayer = toml::from_str(
			r#"
			[http]
			host = "127.0.0.1"
			port = 9000
			"#,
		)
		.unwrap();
		let overlay: AuthzConfigLayer = toml::from_str(
			r#"
			[http]
			port = 9100
			"#,
		)
		.unwrap();
		base.merge(overlay);

		let http = base.http.unwrap();
		assert_eq!(http.host.as_deref(), Some("127.0.0.1"));
		assert_eq!(http.port, Some(9100));
	}
}
