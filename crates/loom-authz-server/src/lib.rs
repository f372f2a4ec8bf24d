// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP endpoint answering batched authorization questions.
//!
//! The endpoint accepts a JSON array of [`RequestItem`]s and answers with a
//! JSON array of [`ResponseItem`]s. Every request runs inside a fresh
//! authorization scope whose context carries the request headers, so the
//! subject getter can identify the caller and the subject is fetched at most
//! once per request.

pub mod error;
pub mod policies;

use std::sync::Arc;

use axum::{
	body::Bytes,
	extract::State,
	http::{header::AUTHORIZATION, HeaderMap},
	routing::post,
	Json, Router,
};
use loom_authz_core::{AuthzError, Evaluator, RequestItem, ResponseItem, Subject};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use tracing::{debug, error, instrument, warn};

pub use error::{EndpointError, ErrorResponse};

/// Scope context key holding the request headers as a JSON object.
pub const HEADERS_CONTEXT_KEY: &str = "headers";

/// Shared state of the decision endpoint.
pub struct AuthzState<S: Subject> {
	evaluator: Evaluator<S>,
	secret: Arc<str>,
}

impl<S: Subject> Clone for AuthzState<S> {
	fn clone(&self) -> Self {
		Self {
			evaluator: self.evaluator.clone(),
			secret: Arc::clone(&self.secret),
		}
	}
}

/// Builds the router serving the decision endpoint at `endpoint_path`.
pub fn create_router<S: Subject>(
	evaluator: Evaluator<S>,
	secret: impl Into<String>,
	endpoint_path: &str,
) -> Router {
	let state = AuthzState {
		evaluator,
		secret: Arc::from(secret.into()),
	};
	Router::new()
		.route(endpoint_path, post(handle_batch::<S>))
		.with_state(state)
}

/// Extracts the token from a "Bearer <token>" Authorization header.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
	auth_header.strip_prefix("Bearer ").map(str::trim)
}

fn check_secret(headers: &HeaderMap, expected: &str) -> Result<(), EndpointError> {
	let header = headers
		.get(AUTHORIZATION)
		.ok_or(EndpointError::MissingAuthorization)?
		.to_str()
		.map_err(|_| EndpointError::InvalidFormat)?;
	let token = extract_bearer_token(header).ok_or(EndpointError::InvalidFormat)?;

	let expected = expected.as_bytes();
	let token = token.as_bytes();
	if expected.len() != token.len() || !bool::from(expected.ct_eq(token)) {
		warn!("authz request rejected: invalid shared secret");
		return Err(EndpointError::InvalidSecret);
	}
	Ok(())
}

/// Request headers as a JSON object, minus the Authorization header.
fn headers_context(headers: &HeaderMap) -> Map<String, Value> {
	let headers: Map<String, Value> = headers
		.iter()
		.filter_map(|(name, value)| {
			if *name == AUTHORIZATION {
				return None;
			}
			let value = value.to_str().ok()?;
			Some((name.as_str().to_string(), Value::String(value.to_string())))
		})
		.collect();

	let mut context = Map::new();
	context.insert(HEADERS_CONTEXT_KEY.to_string(), Value::Object(headers));
	context
}

#[instrument(skip_all, fields(items = tracing::field::Empty))]
async fn handle_batch<S: Subject>(
	State(state): State<AuthzState<S>>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Json<Vec<ResponseItem>>, EndpointError> {
	check_secret(&headers, &state.secret)?;

	let items: Vec<RequestItem> =
		serde_json::from_slice(&body).map_err(|e| EndpointError::MalformedBody(e.to_string()))?;
	tracing::Span::current().record("items", items.len());
	debug!(count = items.len(), "answering authz batch");

	let evaluator = &state.evaluator;
	let responses = evaluator
		.run_in_scope(headers_context(&headers), async {
			futures::future::join_all(items.into_iter().map(|item| answer(evaluator, item))).await
		})
		.await;

	Ok(Json(responses))
}

async fn answer<S: Subject>(evaluator: &Evaluator<S>, item: RequestItem) -> ResponseItem {
	let request_id = item.request_id().to_string();
	let result = match item {
		RequestItem::FetchSubject { .. } => evaluator.get_subject().await.and_then(|subject| {
			serde_json::to_value(subject).map_err(|e| AuthzError::SubjectUnavailable(e.to_string()))
		}),
		RequestItem::GetIsAuthorized { key, resource, .. } => {
			evaluator.is_authorized(&key, resource).await.map(Value::Bool)
		}
	};

	match result {
		Ok(data) => ResponseItem::ok(request_id, data),
		Err(e) => {
			error!(request_id = %request_id, error = %e, "failed to answer authz request item");
			ResponseItem::err(request_id, e.to_string())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::policies::{reference_evaluator, HeaderUser, ROLES_HEADER, USER_HEADER};
	use axum::body::Body;
	use axum::http::{Request, StatusCode};
	use loom_authz_core::EvaluatorConfig;
	use serde_json::json;
	use tower::ServiceExt;

	const SECRET: &str = "s3cret";

	fn app() -> Router {
		let evaluator = reference_evaluator(':', EvaluatorConfig::default()).unwrap();
		create_router(evaluator, SECRET, "/api/authz")
	}

	fn request(auth: Option<&str>, user: Option<&str>, body: impl Into<Body>) -> Request<Body> {
		let mut builder = Request::post("/api/authz").header("content-type", "application/json");
		if let Some(auth) = auth {
			builder = builder.header(AUTHORIZATION, auth);
		}
		if let Some(user) = user {
			builder = builder.header(USER_HEADER, user);
		}
		builder.body(body.into()).unwrap()
	}

	async fn json_body(response: axum::response::Response) -> Value {
		let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
			.await
			.unwrap();
		serde_json::from_slice(&bytes).unwrap()
	}

	fn by_id(items: Vec<ResponseItem>, id: &str) -> ResponseItem {
		items.into_iter().find(|item| item.request_id == id).unwrap()
	}

	#[test]
	fn bearer_token_is_extracted() {
		assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
		assert_eq!(extract_bearer_token("Basic abc"), None);
	}

	#[test]
	fn authorization_header_is_not_exposed_to_policies() {
		let mut headers = HeaderMap::new();
		headers.insert(AUTHORIZATION, "Bearer x".parse().unwrap());
		headers.insert(USER_HEADER, "alice".parse().unwrap());

		let context = headers_context(&headers);
		assert_eq!(context[HEADERS_CONTEXT_KEY], json!({ USER_HEADER: "alice" }));
	}

	#[tokio::test]
	async fn missing_secret_is_unauthorized() {
		let response = app().oneshot(request(None, None, "[]")).await.unwrap();
		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
		assert_eq!(json_body(response).await["error"], "missing_authorization");
	}

	#[tokio::test]
	async fn wrong_secret_is_unauthorized() {
		let response = app()
			.oneshot(request(Some("Bearer nope"), None, "[]"))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
		assert_eq!(json_body(response).await["error"], "invalid_secret");
	}

	#[tokio::test]
	async fn malformed_body_is_bad_request() {
		let response = app()
			.oneshot(request(Some("Bearer s3cret"), None, "{not json"))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);

		let response = app()
			.oneshot(request(
				Some("Bearer s3cret"),
				None,
				r#"[{"type": "unknown", "requestId": "1"}]"#,
			))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn answers_every_item_by_request_id() {
		let body = json!([
			{"type": "fetchSubject", "requestId": "s"},
			{"type": "getIsAuthorized", "requestId": "r", "key": "docs:read"},
			{"type": "getIsAuthorized", "requestId": "e", "key": "docs:edit", "resource": {"owner": "bob"}},
			{"type": "fetchPermissions", "requestId": "o", "key": "docs:edit", "resource": {"owner": "alice"}},
			{"type": "getIsAuthorized", "requestId": "x", "key": "docs:missing"}
		]);
		let response = app()
			.oneshot(request(Some("Bearer s3cret"), Some("alice"), body.to_string()))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);

		let items: Vec<ResponseItem> = serde_json::from_value(json_body(response).await).unwrap();
		assert_eq!(items.len(), 5);

		let subject: Option<HeaderUser> = serde_json::from_value(by_id(items.clone(), "s").data).unwrap();
		assert_eq!(subject.unwrap().id, "alice");
		assert_eq!(by_id(items.clone(), "r").data, json!(true));
		assert_eq!(by_id(items.clone(), "e").data, json!(false));
		assert_eq!(by_id(items.clone(), "o").data, json!(true));

		let missing = by_id(items, "x");
		assert!(missing.error.unwrap().contains("docs:missing"));
	}

	#[tokio::test]
	async fn anonymous_callers_get_null_subject() {
		let body = json!([
			{"type": "fetchSubject", "requestId": "s"},
			{"type": "getIsAuthorized", "requestId": "r", "key": "docs:read"}
		]);
		let response = app()
			.oneshot(request(Some("Bearer s3cret"), None, body.to_string()))
			.await
			.unwrap();

		let items: Vec<ResponseItem> = serde_json::from_value(json_body(response).await).unwrap();
		assert_eq!(by_id(items.clone(), "s").data, Value::Null);
		assert_eq!(by_id(items, "r").data, json!(false));
	}

	#[tokio::test]
	async fn roles_header_reaches_policies() {
		let body = json!([{"type": "getIsAuthorized", "requestId": "a", "key": "admin:access"}]);
		let request = Request::post("/api/authz")
			.header(AUTHORIZATION, "Bearer s3cret")
			.header(USER_HEADER, "root")
			.header(ROLES_HEADER, "editor, admin")
			.body(Body::from(body.to_string()))
			.unwrap();

		let response = app().oneshot(request).await.unwrap();
		let items: Vec<ResponseItem> = serde_json::from_value(json_body(response).await).unwrap();
		assert_eq!(by_id(items, "a").data, json!(true));
	}
}
