// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use loom_authz_core::AuditEvent;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::AuditSinkError;
use crate::sink::AuditEventSink;

struct FileHandle {
	path: PathBuf,
	file: tokio::fs::File,
}

/// Appends decision events to a file as JSON lines.
///
/// The path may contain `%Y %m %d %H %M %S` placeholders, expanded on every
/// publish, so a path such as `authz-%Y-%m-%d.jsonl` rotates daily.
pub struct FileAuditSink {
	path: String,
	handle: Mutex<Option<FileHandle>>,
}

impl FileAuditSink {
	pub fn new(path: impl AsRef<Path>) -> Self {
		Self {
			path: path.as_ref().to_string_lossy().into_owned(),
			handle: Mutex::new(None),
		}
	}

	async fn write_lines(&self, expanded_path: &Path, lines: &str) -> Result<(), AuditSinkError> {
		let mut guard = self.handle.lock().await;

		let needs_reopen = match &*guard {
			Some(handle) => handle.path != expanded_path,
			None => true,
		};

		if needs_reopen {
			let file = OpenOptions::new()
				.create(true)
				.append(true)
				.open(expanded_path)
				.await
				.map_err(|e| AuditSinkError::Transient(format!("failed to open file: {e}")))?;

			*guard = Some(FileHandle {
				path: expanded_path.to_path_buf(),
				file,
			});
		}

		let handle = guard
			.as_mut()
			.ok_or_else(|| AuditSinkError::Permanent("file handle not initialized".to_string()))?;

		handle
			.file
			.write_all(lines.as_bytes())
			.await
			.map_err(|e| AuditSinkError::Transient(format!("failed to write to file: {e}")))?;

		handle
			.file
			.flush()
			.await
			.map_err(|e| AuditSinkError::Transient(format!("failed to flush file: {e}")))?;

		Ok(())
	}
}

#[async_trait]
impl AuditEventSink for FileAuditSink {
	fn name(&self) -> &str {
		"file"
	}

	async fn publish(&self, events: Vec<AuditEvent>) -> Result<(), AuditSinkError> {
		if events.is_empty() {
			return Ok(());
		}

		let mut lines = String::new();
		for event in &events {
			lines.push_str(&format_json_line(event)?);
		}

		let expanded_path = PathBuf::from(expand_path(&self.path));
		self.write_lines(&expanded_path, &lines).await
	}
}

pub fn format_json_line(event: &AuditEvent) -> Result<String, AuditSinkError> {
	let json = serde_json::to_string(event)
		.map_err(|e| AuditSinkError::Permanent(format!("JSON serialization failed: {e}")))?;
	Ok(format!("{json}\n"))
}

pub fn expand_path(path: &str) -> String {
	let now = Utc::now();

	path
		.replace("%Y", &format!("{:04}", now.year()))
		.replace("%m", &format!("{:02}", now.month()))
		.replace("%d", &format!("{:02}", now.day()))
		.replace("%H", &format!("{:02}", now.hour()))
		.replace("%M", &format!("{:02}", now.minute()))
		.replace("%S", &format!("{:02}", now.second()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_authz_core::{Decision, DecisionSummary};
	use serde_json::json;

	fn event(key: &str, granted: bool) -> AuditEvent {
		let decision = Decision::from_bool(granted, json!({"id": "u1"}));
		AuditEvent::new(key, json!({"id": "u1"}), Some(json!({"doc": 7})), decision.summary())
	}

	#[test]
	fn test_expand_path_without_placeholders() {
		assert_eq!(expand_path("/var/log/authz.jsonl"), "/var/log/authz.jsonl");
	}

	#[test]
	fn test_expand_path_year() {
		let expanded = expand_path("/var/log/authz-%Y.jsonl");
		assert!(!expanded.contains("%Y"));
		assert!(expanded.contains(&Utc::now().year().to_string()));
	}

	#[test]
	fn test_format_json_line_is_one_line() {
		let line = format_json_line(&event("docs:read", true)).unwrap();
		assert!(line.ends_with('\n'));
		assert_eq!(line.matches('\n').count(), 1);

		let parsed: AuditEvent = serde_json::from_str(line.trim_end()).unwrap();
		assert_eq!(parsed.policy_key, "docs:read");
		assert_eq!(
			parsed.decision,
			DecisionSummary {
				granted: true,
				message: None,
				reason: None
			}
		);
	}

	#[tokio::test]
	async fn test_publish_appends_lines() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("audit.jsonl");
		let sink = FileAuditSink::new(&path);

		sink.publish(vec![event("docs:read", true), event("docs:edit", false)])
			.await
			.unwrap();
		sink.publish(vec![event("docs:delete", false)]).await.unwrap();

		let content = tokio::fs::read_to_string(&path).await.unwrap();
		let keys: Vec<String> = content
			.lines()
			.map(|l| serde_json::from_str::<AuditEvent>(l).unwrap().policy_key)
			.collect();
		assert_eq!(keys, vec!["docs:read", "docs:edit", "docs:delete"]);
	}

	#[tokio::test]
	async fn test_publish_empty_batch_creates_nothing() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("audit.jsonl");
		FileAuditSink::new(&path).publish(Vec::new()).await.unwrap();
		assert!(!path.exists());
	}

	#[tokio::test]
	async fn test_unwritable_path_is_transient_error() {
		let dir = tempfile::tempdir().unwrap();
		let sink = FileAuditSink::new(dir.path().join("missing").join("audit.jsonl"));
		let err = sink.publish(vec![event("docs:read", true)]).await.unwrap_err();
		assert!(matches!(err, AuditSinkError::Transient(_)));
	}
}
