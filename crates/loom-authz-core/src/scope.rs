// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-request authorization scopes.
//!
//! A [`Scope`] caches the subject, an optional unauthorized handler override,
//! and free-form request context for one logical request. The active scope is
//! stored in task-local storage for the duration of
//! [`ScopeManager::run_in_scope`], so overlapping requests never observe each
//! other's scope. Evaluations resolve the scope once and then pass it
//! explicitly through [`EvalContext`](crate::EvalContext).
//!
//! Task-local storage does not follow `tokio::spawn`; work spawned from inside
//! a scope must be wrapped in [`ScopeManager::run_with_scope`] again.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::decision::Denial;
use crate::error::Result;
use crate::Subject;

tokio::task_local! {
	static ACTIVE_SCOPE: Arc<dyn Any + Send + Sync>;
}

/// Handler invoked when `authorize` encounters a denied decision.
///
/// Returning `Ok(())` passes control to the next handler in line; returning an
/// error replaces the default [`AuthzError::Denied`](crate::AuthzError::Denied).
pub type UnauthorizedHandler = Arc<dyn Fn(&str, &Denial) -> Result<()> + Send + Sync>;

/// Supplies a scope when none is active in task-local storage.
///
/// Framework adapters implement this to expose a request boundary they
/// manage themselves.
pub trait ScopeProvider<S: Subject>: Send + Sync {
	fn current_scope(&self) -> Option<Arc<Scope<S>>>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State isolated to one logical request.
pub struct Scope<S> {
	id: Uuid,
	/// Empty until fetched; a fetched anonymous subject is a value.
	subject: OnceCell<S>,
	on_unauthorized: Mutex<Option<UnauthorizedHandler>>,
	context: Mutex<Map<String, Value>>,
}

impl<S: Subject> Scope<S> {
	pub fn new(context: Map<String, Value>) -> Self {
		Self {
			id: Uuid::new_v4(),
			subject: OnceCell::new(),
			on_unauthorized: Mutex::new(None),
			context: Mutex::new(context),
		}
	}

	pub fn id(&self) -> Uuid {
		self.id
	}

	/// Returns the cached subject, or `None` if it has not been fetched.
	pub fn cached_subject(&self) -> Option<S> {
		self.subject.get().cloned()
	}

	pub fn on_unauthorized(&self) -> Option<UnauthorizedHandler> {
		lock(&self.on_unauthorized).clone()
	}

	pub fn set_on_unauthorized(&self, handler: UnauthorizedHandler) {
		*lock(&self.on_unauthorized) = Some(handler);
	}

	/// Returns a snapshot of the request context.
	pub fn context(&self) -> Map<String, Value> {
		lock(&self.context).clone()
	}

	pub fn context_value(&self, key: &str) -> Option<Value> {
		lock(&self.context).get(key).cloned()
	}

	pub fn set_context(&self, key: impl Into<String>, value: Value) {
		lock(&self.context).insert(key.into(), value);
	}
}

impl<S> std::fmt::Debug for Scope<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Scope").field("id", &self.id).finish_non_exhaustive()
	}
}

/// Resolves, enters, and caches into request scopes.
pub struct ScopeManager<S: Subject> {
	provider: Option<Arc<dyn ScopeProvider<S>>>,
}

impl<S: Subject> Default for ScopeManager<S> {
	fn default() -> Self {
		Self::new()
	}
}

impl<S: Subject> ScopeManager<S> {
	pub fn new() -> Self {
		Self { provider: None }
	}

	pub fn with_provider(provider: Arc<dyn ScopeProvider<S>>) -> Self {
		Self {
			provider: Some(provider),
		}
	}

	/// Returns the innermost active scope, then the provider's scope, else none.
	pub fn resolve_scope(&self) -> Option<Arc<Scope<S>>> {
		if let Ok(active) = ACTIVE_SCOPE.try_with(Arc::clone) {
			match active.downcast::<Scope<S>>() {
				Ok(scope) => return Some(scope),
				Err(_) => warn!("active authorization scope was created for a different subject type"),
			}
		}
		self.provider.as_ref().and_then(|p| p.current_scope())
	}

	/// Runs `fut` inside a fresh scope seeded with `context`.
	pub async fn run_in_scope<F>(&self, context: Map<String, Value>, fut: F) -> F::Output
	where
		F: Future,
	{
		self.run_with_scope(Arc::new(Scope::new(context)), fut).await
	}

	/// Runs `fut` with an existing scope active.
	pub async fn run_with_scope<F>(&self, scope: Arc<Scope<S>>, fut: F) -> F::Output
	where
		F: Future,
	{
		debug!(scope_id = %scope.id(), "entering authorization scope");
		let active: Arc<dyn Any + Send + Sync> = scope;
		ACTIVE_SCOPE.scope(active, fut).await
	}

	/// Returns the scope's cached subject, or fetches and caches it.
	///
	/// Concurrent lookups on one scope share a single fetch; a failed fetch
	/// is not cached. Without a scope the subject is fetched on every call.
	pub async fn get_subject<F>(&self, scope: Option<&Arc<Scope<S>>>, fetch: F) -> Result<S>
	where
		F: Future<Output = Result<S>>,
	{
		match scope {
			Some(scope) => scope.subject.get_or_try_init(|| fetch).await.cloned(),
			None => {
				warn!("no active authorization scope; the subject cannot be cached");
				fetch.await
			}
		}
	}

	/// Installs `handler` on the active scope.
	pub fn on_unauthorized(&self, handler: UnauthorizedHandler) {
		match self.resolve_scope() {
			Some(scope) => scope.set_on_unauthorized(handler),
			None => warn!("on_unauthorized called outside an authorization scope; ignoring"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::AuthzError;
	use serde_json::json;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	fn ctx(pairs: &[(&str, Value)]) -> Map<String, Value> {
		pairs
			.iter()
			.map(|(k, v)| ((*k).to_string(), v.clone()))
			.collect()
	}

	#[tokio::test]
	async fn no_scope_outside_block() {
		let manager = ScopeManager::<String>::new();
		assert!(manager.resolve_scope().is_none());
	}

	#[tokio::test]
	async fn scope_is_visible_inside_block() {
		let manager = ScopeManager::<String>::new();
		let seen = manager
			.run_in_scope(ctx(&[("tenant", json!("acme"))]), async {
				manager.resolve_scope().and_then(|s| s.context_value("tenant"))
			})
			.await;
		assert_eq!(seen, Some(json!("acme")));
		assert!(manager.resolve_scope().is_none());
	}

	#[tokio::test]
	async fn nested_scopes_use_innermost() {
		let manager = ScopeManager::<String>::new();
		manager
			.run_in_scope(ctx(&[("level", json!(1))]), async {
				let inner = manager
					.run_in_scope(ctx(&[("level", json!(2))]), async {
						manager.resolve_scope().unwrap().context_value("level")
					})
					.await;
				assert_eq!(inner, Some(json!(2)));
				assert_eq!(
					manager.resolve_scope().unwrap().context_value("level"),
					Some(json!(1))
				);
			})
			.await;
	}

	#[tokio::test]
	async fn subject_is_fetched_once_per_scope() {
		let manager = ScopeManager::<Option<String>>::new();
		let calls = AtomicUsize::new(0);
		let fetch = || async {
			calls.fetch_add(1, Ordering::SeqCst);
			Ok(None)
		};

		manager
			.run_in_scope(Map::new(), async {
				let scope = manager.resolve_scope();
				let first = manager.get_subject(scope.as_ref(), fetch()).await.unwrap();
				let second = manager.get_subject(scope.as_ref(), fetch()).await.unwrap();
				assert_eq!(first, None);
				assert_eq!(second, None);
			})
			.await;

		// An anonymous subject is a cached value, not a miss.
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn concurrent_lookups_share_one_fetch() {
		let manager = ScopeManager::<String>::new();
		let scope = Arc::new(Scope::new(Map::new()));
		let calls = AtomicUsize::new(0);

		let lookups = (0..5).map(|_| {
			manager.get_subject(Some(&scope), async {
				calls.fetch_add(1, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(20)).await;
				Ok("alice".to_string())
			})
		});
		let subjects = futures::future::join_all(lookups).await;

		assert!(subjects.into_iter().all(|s| s.unwrap() == "alice"));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn subject_is_refetched_without_scope() {
		let manager = ScopeManager::<String>::new();
		let calls = AtomicUsize::new(0);
		for _ in 0..3 {
			manager
				.get_subject(None, async {
					calls.fetch_add(1, Ordering::SeqCst);
					Ok("alice".to_string())
				})
				.await
				.unwrap();
		}
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn failed_fetch_is_not_cached() {
		let manager = ScopeManager::<String>::new();
		let scope = Arc::new(Scope::new(Map::new()));
		let err = manager
			.get_subject(Some(&scope), async {
				Err(AuthzError::SubjectUnavailable("db down".into()))
			})
			.await;
		assert!(err.is_err());
		assert!(scope.cached_subject().is_none());

		let subject = manager
			.get_subject(Some(&scope), async { Ok("alice".to_string()) })
			.await
			.unwrap();
		assert_eq!(subject, "alice");
	}

	#[tokio::test]
	async fn concurrent_scopes_are_isolated() {
		let manager = Arc::new(ScopeManager::<String>::new());

		let run = |name: &'static str, delay: u64| {
			let manager = Arc::clone(&manager);
			async move {
				manager
					.run_in_scope(Map::new(), async {
						let scope = manager.resolve_scope();
						manager
							.get_subject(scope.as_ref(), async { Ok(name.to_string()) })
							.await
							.unwrap();
						tokio::time::sleep(Duration::from_millis(delay)).await;
						manager.resolve_scope().unwrap().cached_subject()
					})
					.await
			}
		};

		let (a, b) = tokio::join!(run("alice", 20), run("bob", 5));
		assert_eq!(a.as_deref(), Some("alice"));
		assert_eq!(b.as_deref(), Some("bob"));
	}

	#[tokio::test]
	async fn on_unauthorized_sets_handler_on_active_scope() {
		let manager = ScopeManager::<String>::new();
		let handler: UnauthorizedHandler = Arc::new(|_: &str, _: &Denial| -> Result<()> { Ok(()) });

		manager.on_unauthorized(Arc::clone(&handler));

		manager
			.run_in_scope(Map::new(), async {
				assert!(manager.resolve_scope().unwrap().on_unauthorized().is_none());
				manager.on_unauthorized(handler);
				assert!(manager.resolve_scope().unwrap().on_unauthorized().is_some());
			})
			.await;
	}

	struct FixedProvider(Arc<Scope<String>>);

	impl ScopeProvider<String> for FixedProvider {
		fn current_scope(&self) -> Option<Arc<Scope<String>>> {
			Some(Arc::clone(&self.0))
		}
	}

	#[tokio::test]
	async fn provider_scope_is_used_as_fallback() {
		let provided = Arc::new(Scope::new(ctx(&[("from", json!("provider"))])));
		let manager = ScopeManager::with_provider(Arc::new(FixedProvider(provided)));

		assert_eq!(
			manager.resolve_scope().unwrap().context_value("from"),
			Some(json!("provider"))
		);

		let inner = manager
			.run_in_scope(ctx(&[("from", json!("block"))]), async {
				manager.resolve_scope().unwrap().context_value("from")
			})
			.await;
		assert_eq!(inner, Some(json!("block")));
	}
}
