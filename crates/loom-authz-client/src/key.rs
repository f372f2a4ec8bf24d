// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Canonical serialization of cache keys.
//!
//! Keys are JSON arrays. Object keys are sorted at every level and array
//! order is preserved, so structurally equal keys serialize identically
//! regardless of field order. Prefix matching works on the serialized form:
//! a path matches every key whose serialization starts with the path's
//! serialization minus its closing `]`.

use serde_json::Value;

/// Serializes `value` with object keys sorted.
pub fn stable_stringify(value: &Value) -> String {
	let mut out = String::new();
	write_value(value, &mut out);
	out
}

/// Serializes a key made of `segments`.
pub fn stable_key(segments: &[Value]) -> String {
	let mut out = String::from("[");
	for (i, segment) in segments.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}
		write_value(segment, &mut out);
	}
	out.push(']');
	out
}

/// Returns the prefix that keys under `path` start with, or `None` for the
/// empty path, which matches every key.
pub fn path_prefix(path: &[Value]) -> Option<String> {
	if path.is_empty() {
		return None;
	}
	let mut serialized = stable_key(path);
	serialized.pop();
	Some(serialized)
}

/// Returns true if `key` lies under `path`.
pub fn key_matches_path(key: &[Value], path: &[Value]) -> bool {
	match path_prefix(path) {
		None => true,
		Some(prefix) => stable_key(key).starts_with(&prefix),
	}
}

fn write_value(value: &Value, out: &mut String) {
	match value {
		Value::Array(items) => {
			out.push('[');
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_value(item, out);
			}
			out.push(']');
		}
		Value::Object(map) => {
			let mut entries: Vec<_> = map.iter().collect();
			entries.sort_by(|a, b| a.0.cmp(b.0));
			out.push('{');
			for (i, (key, item)) in entries.into_iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				out.push_str(&Value::String(key.clone()).to_string());
				out.push(':');
				write_value(item, out);
			}
			out.push('}');
		}
		scalar => out.push_str(&scalar.to_string()),
	}
}
