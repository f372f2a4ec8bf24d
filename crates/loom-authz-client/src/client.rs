// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP client for the batched authz endpoint.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_authz_config::ClientConfig;
use loom_authz_core::{RequestItem, ResponseItem, DEFAULT_KEY_SEPARATOR};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{BatchConfig, BatchJob, Batcher, JobRunner};
use crate::cache::{ClientCache, Invalidation};
use crate::error::{ClientError, Result};

/// Path of the authz endpoint when none is configured.
pub const DEFAULT_ENDPOINT_PATH: &str = "/api/authz";

/// Cache key under which the subject is stored.
pub const SUBJECT_CACHE_KEY: &str = "$subject";

/// Builder for constructing an [`AuthzClient`].
pub struct AuthzClientBuilder<S> {
	base_url: Option<String>,
	secret: Option<String>,
	endpoint_path: String,
	key_separator: char,
	batch: BatchConfig,
	request_timeout: Duration,
	_subject: PhantomData<fn() -> S>,
}

impl<S> AuthzClientBuilder<S>
where
	S: DeserializeOwned + Send + Sync + 'static,
{
	pub fn new() -> Self {
		Self {
			base_url: None,
			secret: None,
			endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
			key_separator: DEFAULT_KEY_SEPARATOR,
			batch: BatchConfig::default(),
			request_timeout: Duration::from_secs(30),
			_subject: PhantomData,
		}
	}

	/// Sets the base URL of the server, e.g. `https://loom.example.com`.
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());
		self
	}

	/// Sets the shared secret sent as a bearer token.
	pub fn secret(mut self, secret: impl Into<String>) -> Self {
		self.secret = Some(secret.into());
		self
	}

	pub fn endpoint_path(mut self, path: impl Into<String>) -> Self {
		self.endpoint_path = path.into();
		self
	}

	/// Separator used to split policy keys into cache path segments.
	pub fn key_separator(mut self, separator: char) -> Self {
		self.key_separator = separator;
		self
	}

	pub fn batch_delay(mut self, delay: Duration) -> Self {
		self.batch.batch_delay = delay;
		self
	}

	pub fn job_timeout(mut self, timeout: Duration) -> Self {
		self.batch.job_timeout = timeout;
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}

	/// Applies the timing settings and key separator of a loaded
	/// [`ClientConfig`].
	pub fn config(self, config: &ClientConfig) -> Self {
		self
			.batch_delay(config.batch_delay())
			.job_timeout(config.job_timeout())
			.request_timeout(config.request_timeout())
			.key_separator(config.key_separator)
	}

	pub fn build(self) -> Result<AuthzClient<S>> {
		let base_url = self
			.base_url
			.ok_or_else(|| ClientError::InvalidConfig("base_url is required".to_string()))?;
		let secret = self
			.secret
			.filter(|s| !s.is_empty())
			.ok_or_else(|| ClientError::InvalidConfig("secret is required".to_string()))?;

		let endpoint = format!(
			"{}/{}",
			base_url.trim_end_matches('/'),
			self.endpoint_path.trim_start_matches('/')
		);

		let http = Client::builder()
			.timeout(self.request_timeout)
			.build()
			.map_err(|e| ClientError::InvalidConfig(e.to_string()))?;

		let runner = Arc::new(HttpRunner {
			http,
			endpoint: endpoint.clone(),
			secret,
		});
		let batcher = Batcher::with_dedupe(self.batch, runner, RequestItem::same_question);

		info!(endpoint = %endpoint, "authz client initialized");

		Ok(AuthzClient {
			inner: Arc::new(ClientInner {
				batcher,
				cache: ClientCache::new(),
				key_separator: self.key_separator,
			}),
			_subject: PhantomData,
		})
	}
}

impl<S> Default for AuthzClientBuilder<S>
where
	S: DeserializeOwned + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

/// Sends a flushed batch as one POST and settles each job from the response.
struct HttpRunner {
	http: Client,
	endpoint: String,
	secret: String,
}

impl HttpRunner {
	async fn send(&self, items: &[&RequestItem]) -> Result<Vec<ResponseItem>> {
		let response = self
			.http
			.post(&self.endpoint)
			.bearer_auth(&self.secret)
			.json(items)
			.send()
			.await?;

		let status = response.status();
		if status == StatusCode::UNAUTHORIZED {
			return Err(ClientError::BadSecret);
		}
		if !status.is_success() {
			let message = response.text().await.unwrap_or_default();
			return Err(ClientError::ServerError {
				status: status.as_u16(),
				message,
			});
		}

		let body = response.bytes().await?;
		serde_json::from_slice(&body).map_err(|e| ClientError::MalformedResponse(e.to_string()))
	}
}

#[async_trait]
impl JobRunner<RequestItem, Value> for HttpRunner {
	async fn run_jobs(&self, jobs: Vec<BatchJob<RequestItem, Value>>) {
		let items: Vec<&RequestItem> = jobs.iter().map(|job| job.payload()).collect();
		let all_cancelled =
			futures::future::join_all(jobs.iter().map(|job| job.signal().cancelled()));

		let responses = tokio::select! {
			result = self.send(&items) => result,
			_ = all_cancelled => {
				debug!(count = jobs.len(), "every job in the batch was cancelled; dropping request");
				return;
			}
		};

		let responses = match responses {
			Ok(responses) => responses,
			Err(e) => {
				warn!(error = %e, count = jobs.len(), "authz batch request failed");
				for job in &jobs {
					job.reject(e.clone());
				}
				return;
			}
		};

		let mut by_id: HashMap<String, ResponseItem> = responses
			.into_iter()
			.map(|item| (item.request_id.clone(), item))
			.collect();

		for job in &jobs {
			match by_id.remove(job.payload().request_id()) {
				Some(ResponseItem {
					error: Some(error), ..
				}) => {
					job.reject(ClientError::ItemFailed(error));
				}
				Some(item) => {
					job.resolve(item.data);
				}
				None => {
					warn!(request_id = job.payload().request_id(), "response is missing a request id");
					job.reject(ClientError::MalformedResponse(format!(
						"no response for request {}",
						job.payload().request_id()
					)));
				}
			}
		}
	}
}

struct ClientInner {
	batcher: Batcher<RequestItem, Value>,
	cache: ClientCache<Value>,
	key_separator: char,
}

/// Client for the batched authz endpoint.
///
/// Requests issued within one batch window travel in a single POST. Equal
/// questions share one request item, and answers are cached until
/// [`AuthzClient::invalidate`] removes them.
///
/// ```ignore
/// let client: AuthzClient<Option<User>> = AuthzClient::builder()
///     .base_url("https://loom.example.com")
///     .secret(secret)
///     .build()?;
///
/// if client.is_authorized("docs:edit", Some(json!({"id": 7}))).await? {
///     // ...
/// }
/// client.invalidate(&[json!("docs")]);
/// ```
pub struct AuthzClient<S> {
	inner: Arc<ClientInner>,
	_subject: PhantomData<fn() -> S>,
}

impl<S> Clone for AuthzClient<S> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
			_subject: PhantomData,
		}
	}
}

impl<S> AuthzClient<S>
where
	S: DeserializeOwned + Send + Sync + 'static,
{
	pub fn builder() -> AuthzClientBuilder<S> {
		AuthzClientBuilder::new()
	}

	/// Cache path of a decision: the key's segments followed by the resource.
	pub fn cache_key(&self, key: &str, resource: Option<&Value>) -> Vec<Value> {
		let mut path: Vec<Value> = key
			.split(self.inner.key_separator)
			.map(|segment| Value::String(segment.to_string()))
			.collect();
		if let Some(resource) = resource {
			path.push(resource.clone());
		}
		path
	}

	fn queue(&self, item: RequestItem, signal: Option<CancellationToken>) -> crate::batch::JobHandle<Value> {
		self.inner.batcher.queue_job(item, signal)
	}

	/// Fetches the current subject, cached under `["$subject"]`.
	pub async fn subject(&self) -> Result<S> {
		let client = self.clone();
		let data = self
			.inner
			.cache
			.run_cached(&[Value::String(SUBJECT_CACHE_KEY.to_string())], move || {
				let handle = client.queue(
					RequestItem::FetchSubject {
						request_id: new_request_id(),
					},
					None,
				);
				handle.wait()
			})
			.await?;
		serde_json::from_value(data).map_err(|e| ClientError::MalformedResponse(e.to_string()))
	}

	/// Asks whether the current subject may use policy `key`, cached under
	/// [`AuthzClient::cache_key`].
	pub async fn is_authorized(&self, key: &str, resource: Option<Value>) -> Result<bool> {
		let path = self.cache_key(key, resource.as_ref());
		let client = self.clone();
		let item = RequestItem::GetIsAuthorized {
			request_id: new_request_id(),
			key: key.to_string(),
			resource,
		};
		let data = self
			.inner
			.cache
			.run_cached(&path, move || client.queue(item, None).wait())
			.await?;
		decode_bool(data)
	}

	/// Like [`AuthzClient::is_authorized`], but abandoned when `signal` fires.
	///
	/// Bypasses the cache so that one caller's cancellation is never replayed
	/// to others; deduplication within the batch still applies.
	pub async fn is_authorized_with_signal(
		&self,
		key: &str,
		resource: Option<Value>,
		signal: CancellationToken,
	) -> Result<bool> {
		let item = RequestItem::GetIsAuthorized {
			request_id: new_request_id(),
			key: key.to_string(),
			resource,
		};
		let data = self.queue(item, Some(signal)).wait().await?;
		decode_bool(data)
	}

	/// Drops cached answers under `path`; an empty path drops everything.
	pub fn invalidate(&self, path: &[Value]) -> usize {
		self.inner.cache.invalidate(path)
	}

	/// Subscribes to cache invalidations.
	pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
		self.inner.cache.subscribe()
	}

	/// Sends the open batch now instead of waiting for the batch delay.
	pub async fn flush(&self) {
		self.inner.batcher.flush_batch().await;
	}

	/// Sends the open batch and rejects later requests.
	pub async fn shutdown(&self) {
		info!("shutting down authz client");
		self.inner.batcher.shutdown().await;
	}
}

fn new_request_id() -> String {
	uuid::Uuid::new_v4().to_string()
}

fn decode_bool(data: Value) -> Result<bool> {
	data.as_bool().ok_or_else(|| {
		ClientError::MalformedResponse(format!("expected a boolean decision, got {data}"))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;
	use serde_json::json;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use wiremock::matchers::{header, method, path};
	use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

	#[derive(Debug, Clone, PartialEq, Deserialize)]
	struct User {
		id: String,
	}

	/// Answers every item: the subject is `u1`, keys ending in `read` are
	/// granted, keys ending in `boom` fail. Responses come back reversed.
	#[derive(Clone, Default)]
	struct EchoResponder {
		requests: Arc<AtomicUsize>,
		items: Arc<AtomicUsize>,
	}

	impl Respond for EchoResponder {
		fn respond(&self, request: &Request) -> ResponseTemplate {
			self.requests.fetch_add(1, Ordering::SeqCst);
			let items: Vec<RequestItem> = serde_json::from_slice(&request.body).unwrap();
			self.items.fetch_add(items.len(), Ordering::SeqCst);

			let mut responses: Vec<ResponseItem> = items
				.iter()
				.map(|item| match item {
					RequestItem::FetchSubject { request_id } => {
						ResponseItem::ok(request_id.clone(), json!({"id": "u1"}))
					}
					RequestItem::GetIsAuthorized { request_id, key, .. } if key.ends_with("boom") => {
						ResponseItem::err(request_id.clone(), "policy failed")
					}
					RequestItem::GetIsAuthorized { request_id, key, .. } => {
						ResponseItem::ok(request_id.clone(), json!(key.ends_with("read")))
					}
				})
				.collect();
			responses.reverse();
			ResponseTemplate::new(200).set_body_json(responses)
		}
	}

	async fn setup(responder: EchoResponder) -> (MockServer, AuthzClient<User>) {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/authz"))
			.and(header("authorization", "Bearer s3cret"))
			.respond_with(responder)
			.mount(&server)
			.await;

		let client = AuthzClient::builder()
			.base_url(server.uri())
			.secret("s3cret")
			.batch_delay(Duration::from_millis(5))
			.build()
			.unwrap();
		(server, client)
	}

	#[test]
	fn build_requires_base_url_and_secret() {
		let missing_url = AuthzClient::<User>::builder().secret("x").build();
		assert!(matches!(missing_url, Err(ClientError::InvalidConfig(_))));

		let missing_secret = AuthzClient::<User>::builder()
			.base_url("http://localhost")
			.build();
		assert!(matches!(missing_secret, Err(ClientError::InvalidConfig(_))));
	}

	#[test]
	fn cache_key_splits_policy_key() {
		let client = AuthzClient::<User>::builder()
			.base_url("http://localhost")
			.secret("x")
			.build()
			.unwrap();
		assert_eq!(
			client.cache_key("docs:read", Some(&json!({"id": 1}))),
			vec![json!("docs"), json!("read"), json!({"id": 1})]
		);
		assert_eq!(client.cache_key("docs", None), vec![json!("docs")]);
	}

	#[tokio::test]
	async fn loaded_config_sets_timings_and_separator() {
		let config = ClientConfig {
			batch_delay_ms: 5,
			job_timeout_ms: 2_000,
			request_timeout_ms: 3_000,
			key_separator: '.',
		};
		let builder = AuthzClient::<User>::builder().config(&config);
		assert_eq!(builder.batch.batch_delay, Duration::from_millis(5));
		assert_eq!(builder.batch.job_timeout, Duration::from_secs(2));
		assert_eq!(builder.request_timeout, Duration::from_secs(3));
		assert_eq!(builder.key_separator, '.');

		let responder = EchoResponder::default();
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/authz"))
			.respond_with(responder.clone())
			.mount(&server)
			.await;
		let client = builder.base_url(server.uri()).secret("s3cret").build().unwrap();
		assert_eq!(client.inner.batcher.config().job_timeout, Duration::from_secs(2));

		assert!(client.is_authorized("docs.read", Some(json!({"id": 1}))).await.unwrap());
		assert_eq!(
			client.cache_key("docs.read", None),
			vec![json!("docs"), json!("read")]
		);
		assert_eq!(client.invalidate(&[json!("docs")]), 1);
		assert_eq!(responder.requests.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn concurrent_requests_share_one_round_trip() {
		let responder = EchoResponder::default();
		let (_server, client) = setup(responder.clone()).await;

		let (subject, read, edit, read_again) = tokio::join!(
			client.subject(),
			client.is_authorized("docs:read", Some(json!({"id": 1}))),
			client.is_authorized("docs:edit", Some(json!({"id": 1}))),
			client.is_authorized_with_signal("docs:read", Some(json!({"id": 1})), CancellationToken::new()),
		);

		assert_eq!(subject.unwrap(), User { id: "u1".into() });
		assert!(read.unwrap());
		assert!(!edit.unwrap());
		assert!(read_again.unwrap());
		assert_eq!(responder.requests.load(Ordering::SeqCst), 1);
		// The signalled read is deduplicated into the cached one.
		assert_eq!(responder.items.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn answers_are_cached_until_invalidated() {
		let responder = EchoResponder::default();
		let (_server, client) = setup(responder.clone()).await;

		assert!(client.is_authorized("docs:read", None).await.unwrap());
		assert!(client.is_authorized("docs:read", None).await.unwrap());
		assert_eq!(responder.requests.load(Ordering::SeqCst), 1);

		let mut invalidations = client.subscribe();
		assert_eq!(client.invalidate(&[json!("docs")]), 1);
		assert_eq!(invalidations.recv().await.unwrap().removed, 1);

		assert!(client.is_authorized("docs:read", None).await.unwrap());
		assert_eq!(responder.requests.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn item_error_rejects_only_that_item() {
		let (_server, client) = setup(EchoResponder::default()).await;

		let (ok, failed) = tokio::join!(
			client.is_authorized("docs:read", None),
			client.is_authorized("docs:boom", None),
		);
		assert!(ok.unwrap());
		assert_eq!(failed, Err(ClientError::ItemFailed("policy failed".into())));
	}

	#[tokio::test]
	async fn missing_response_rejects_only_that_job() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(|request: &Request| {
				let items: Vec<RequestItem> = serde_json::from_slice(&request.body).unwrap();
				let answered: Vec<ResponseItem> = items
					.iter()
					.filter(|item| matches!(item, RequestItem::FetchSubject { .. }))
					.map(|item| ResponseItem::ok(item.request_id(), json!({"id": "u2"})))
					.collect();
				ResponseTemplate::new(200).set_body_json(answered)
			})
			.mount(&server)
			.await;

		let client: AuthzClient<User> = AuthzClient::builder()
			.base_url(server.uri())
			.secret("s3cret")
			.build()
			.unwrap();

		let (subject, decision) = tokio::join!(client.subject(), client.is_authorized("docs:read", None));
		assert_eq!(subject.unwrap().id, "u2");
		assert!(matches!(decision, Err(ClientError::MalformedResponse(_))));
	}

	#[tokio::test]
	async fn bad_secret_is_reported() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(401))
			.mount(&server)
			.await;

		let client: AuthzClient<User> = AuthzClient::builder()
			.base_url(server.uri())
			.secret("wrong")
			.build()
			.unwrap();
		assert_eq!(
			client.is_authorized("docs:read", None).await,
			Err(ClientError::BadSecret)
		);
	}

	#[tokio::test]
	async fn server_errors_are_not_cached() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(500).set_body_string("boom"))
			.up_to_n_times(1)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.respond_with(EchoResponder::default())
			.mount(&server)
			.await;

		let client: AuthzClient<User> = AuthzClient::builder()
			.base_url(server.uri())
			.secret("s3cret")
			.build()
			.unwrap();

		let first = client.is_authorized("docs:read", None).await;
		assert_eq!(
			first,
			Err(ClientError::ServerError {
				status: 500,
				message: "boom".into()
			})
		);
		assert!(client.is_authorized("docs:read", None).await.unwrap());
	}

	#[tokio::test]
	async fn malformed_body_is_reported() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200).set_body_string("not json"))
			.mount(&server)
			.await;

		let client: AuthzClient<User> = AuthzClient::builder()
			.base_url(server.uri())
			.secret("s3cret")
			.build()
			.unwrap();
		assert!(matches!(
			client.is_authorized("docs:read", None).await,
			Err(ClientError::MalformedResponse(_))
		));
	}

	#[tokio::test]
	async fn cancelled_call_leaves_others_untouched() {
		let responder = EchoResponder::default();
		let (_server, client) = setup(responder.clone()).await;
		let signal = CancellationToken::new();

		let cancelled = client.is_authorized_with_signal("docs:read", None, signal.clone());
		signal.cancel();
		assert_eq!(cancelled.await, Err(ClientError::Cancelled));

		assert!(client.is_authorized("docs:read", None).await.unwrap());
	}

	#[tokio::test]
	async fn shutdown_rejects_new_requests() {
		let (_server, client) = setup(EchoResponder::default()).await;
		client.shutdown().await;
		assert_eq!(
			client.is_authorized("docs:read", None).await,
			Err(ClientError::Shutdown)
		);
	}
}
