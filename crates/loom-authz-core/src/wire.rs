// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wire format of the batched decision endpoint.
//!
//! The request body is a JSON array of [`RequestItem`]s and the response a
//! JSON array of [`ResponseItem`]s in arbitrary order. Both sides match items
//! by `requestId`, never by position.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a batched request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestItem {
	FetchSubject {
		#[serde(rename = "requestId")]
		request_id: String,
	},
	#[serde(alias = "fetchPermissions")]
	GetIsAuthorized {
		#[serde(rename = "requestId")]
		request_id: String,
		key: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		resource: Option<Value>,
	},
}

impl RequestItem {
	pub fn request_id(&self) -> &str {
		match self {
			Self::FetchSubject { request_id } | Self::GetIsAuthorized { request_id, .. } => {
				request_id
			}
		}
	}

	/// Returns true if both items ask the same question, ignoring request ids.
	pub fn same_question(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::FetchSubject { .. }, Self::FetchSubject { .. }) => true,
			(
				Self::GetIsAuthorized { key, resource, .. },
				Self::GetIsAuthorized {
					key: other_key,
					resource: other_resource,
					..
				},
			) => key == other_key && resource == other_resource,
			_ => false,
		}
	}
}

/// One entry of a batched response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseItem {
	#[serde(rename = "requestId")]
	pub request_id: String,
	/// `null` is a meaningful value (e.g. an anonymous subject).
	#[serde(default)]
	pub data: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl ResponseItem {
	pub fn ok(request_id: impl Into<String>, data: Value) -> Self {
		Self {
			request_id: request_id.into(),
			data,
			error: None,
		}
	}

	pub fn err(request_id: impl Into<String>, error: impl Into<String>) -> Self {
		Self {
			request_id: request_id.into(),
			data: Value::Null,
			error: Some(error.into()),
		}
	}
}
