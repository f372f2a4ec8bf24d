// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Decision evaluation.
//!
//! [`Evaluator`] ties together policy resolution, the request scope, and the
//! recursion guard:
//!
//! 1. Every top-level call starts a new evaluation chain with its own
//!    [`CallStackGuard`] and the scope active at the call site. Calls made
//!    while a policy or the subject getter runs join the running chain, even
//!    when they go through an [`Evaluator`] handle instead of the
//!    [`EvalContext`].
//! 2. The subject is read from the scope cache or fetched through the
//!    subject getter.
//! 3. The policy is resolved and invoked with an [`EvalContext`] for the
//!    chain, so nested evaluations share the chain's guard and scope.
//! 4. A decision event is handed to every registered [`DecisionListener`].

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::{try_join_all, BoxFuture};
use serde_json::{Map, Value};
use tracing::{debug, error, instrument, warn};

use crate::audit::{AuditEvent, DecisionListener};
use crate::decision::Decision;
use crate::error::{AuthzError, Result};
use crate::guard::{CallStackGuard, DEFAULT_MAX_CALL_DEPTH};
use crate::policy::PolicyMap;
use crate::scope::{Scope, ScopeManager, ScopeProvider, UnauthorizedHandler};
use crate::Subject;

tokio::task_local! {
	static ACTIVE_CHAIN: Chain;
}

/// Per-chain state, installed in task-local storage while a policy or the
/// subject getter runs.
#[derive(Clone)]
struct Chain {
	guard: Arc<CallStackGuard>,
	/// Set inside the subject getter; lookups there bypass the scope's
	/// single-flight cache, which the outer lookup is still filling.
	fetching_subject: bool,
}

/// Future returned by a subject getter.
pub type SubjectFuture<S> = BoxFuture<'static, Result<S>>;

/// Loads the subject for the current request.
///
/// Receives the chain's [`EvalContext`] so it can read request context from
/// the scope.
pub type SubjectGetter<S> = Arc<dyn Fn(EvalContext<S>) -> SubjectFuture<S> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
	/// Maximum nested evaluations on one chain.
	pub max_call_depth: usize,
}

impl Default for EvaluatorConfig {
	fn default() -> Self {
		Self {
			max_call_depth: DEFAULT_MAX_CALL_DEPTH,
		}
	}
}

/// Result of [`Evaluator::evaluate`].
#[derive(Debug, Clone)]
pub struct Evaluation<S> {
	pub decision: Decision<S>,
	/// Subject the policy was evaluated against.
	pub subject: S,
	pub policy_key: String,
}

impl<S> Evaluation<S> {
	pub fn is_granted(&self) -> bool {
		self.decision.is_granted()
	}
}

struct Shared<S: Subject> {
	policies: PolicyMap<S>,
	scopes: ScopeManager<S>,
	get_subject: SubjectGetter<S>,
	default_unauthorized: Option<UnauthorizedHandler>,
	listeners: RwLock<Vec<Arc<dyn DecisionListener>>>,
	config: EvaluatorConfig,
}

impl<S: Subject> Shared<S> {
	fn emit(&self, key: &str, subject: &S, resource: Option<&Value>, decision: &Decision<S>) {
		debug!(policy_key = %key, granted = decision.is_granted(), "authorization decision");

		let listeners = self
			.listeners
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone();
		if listeners.is_empty() {
			return;
		}

		let subject = serde_json::to_value(subject).unwrap_or_else(|e| {
			warn!(policy_key = %key, error = %e, "failed to serialize subject for audit event");
			Value::Null
		});
		let event = AuditEvent::new(key, subject, resource.cloned(), decision.summary());

		for listener in listeners {
			if let Err(e) = listener.on_decision(event.clone()) {
				warn!(policy_key = %key, error = %e, "decision listener failed");
			}
		}
	}
}

/// Builder for [`Evaluator`].
pub struct EvaluatorBuilder<S: Subject> {
	policies: PolicyMap<S>,
	get_subject: SubjectGetter<S>,
	default_unauthorized: Option<UnauthorizedHandler>,
	listeners: Vec<Arc<dyn DecisionListener>>,
	provider: Option<Arc<dyn ScopeProvider<S>>>,
	config: EvaluatorConfig,
}

impl<S: Subject> EvaluatorBuilder<S> {
	/// Sets the process-wide handler run after the scope's handler.
	pub fn on_unauthorized<F>(mut self, handler: F) -> Self
	where
		F: Fn(&str, &crate::Denial) -> Result<()> + Send + Sync + 'static,
	{
		self.default_unauthorized = Some(Arc::new(handler));
		self
	}

	pub fn listener(mut self, listener: Arc<dyn DecisionListener>) -> Self {
		self.listeners.push(listener);
		self
	}

	pub fn scope_provider(mut self, provider: Arc<dyn ScopeProvider<S>>) -> Self {
		self.provider = Some(provider);
		self
	}

	pub fn max_call_depth(mut self, depth: usize) -> Self {
		self.config.max_call_depth = depth;
		self
	}

	pub fn config(mut self, config: EvaluatorConfig) -> Self {
		self.config = config;
		self
	}

	pub fn build(self) -> Evaluator<S> {
		let scopes = match self.provider {
			Some(provider) => ScopeManager::with_provider(provider),
			None => ScopeManager::new(),
		};

		Evaluator {
			shared: Arc::new(Shared {
				policies: self.policies,
				scopes,
				get_subject: self.get_subject,
				default_unauthorized: self.default_unauthorized,
				listeners: RwLock::new(self.listeners),
				config: self.config,
			}),
		}
	}
}

/// Answers authorization questions against a [`PolicyMap`].
pub struct Evaluator<S: Subject> {
	shared: Arc<Shared<S>>,
}

impl<S: Subject> Clone for Evaluator<S> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<S: Subject> Evaluator<S> {
	/// Starts building an evaluator from its policies and subject getter.
	pub fn builder<F, Fut>(policies: PolicyMap<S>, get_subject: F) -> EvaluatorBuilder<S>
	where
		F: Fn(EvalContext<S>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<S>> + Send + 'static,
	{
		let get_subject: SubjectGetter<S> = Arc::new(move |cx| Box::pin(get_subject(cx)));
		EvaluatorBuilder {
			policies,
			get_subject,
			default_unauthorized: None,
			listeners: Vec::new(),
			provider: None,
			config: EvaluatorConfig::default(),
		}
	}

	pub fn policies(&self) -> &PolicyMap<S> {
		&self.shared.policies
	}

	pub fn scopes(&self) -> &ScopeManager<S> {
		&self.shared.scopes
	}

	pub fn config(&self) -> &EvaluatorConfig {
		&self.shared.config
	}

	/// Registers an additional decision listener.
	pub fn add_listener(&self, listener: Arc<dyn DecisionListener>) {
		self.shared
			.listeners
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.push(listener);
	}

	/// Runs `fut` inside a fresh request scope.
	pub async fn run_in_scope<F: Future>(&self, context: Map<String, Value>, fut: F) -> F::Output {
		self.shared.scopes.run_in_scope(context, fut).await
	}

	/// Overrides the unauthorized handler for the active scope.
	pub fn on_unauthorized<F>(&self, handler: F)
	where
		F: Fn(&str, &crate::Denial) -> Result<()> + Send + Sync + 'static,
	{
		self.shared.scopes.on_unauthorized(Arc::new(handler));
	}

	/// Returns a context bound to the scope active at the call site.
	///
	/// Joins the running chain when called from inside a policy or the
	/// subject getter, otherwise starts a new one.
	pub fn context(&self) -> EvalContext<S> {
		self.context_with_scope(self.shared.scopes.resolve_scope())
	}

	/// Like [`Evaluator::context`], bound to an explicit scope.
	pub fn context_with_scope(&self, scope: Option<Arc<Scope<S>>>) -> EvalContext<S> {
		let chain = ACTIVE_CHAIN.try_with(Chain::clone).unwrap_or_else(|_| Chain {
			guard: Arc::new(CallStackGuard::new(self.shared.config.max_call_depth)),
			fetching_subject: false,
		});
		EvalContext {
			shared: Arc::clone(&self.shared),
			scope,
			chain,
		}
	}

	/// Returns the (scope-cached) subject.
	pub async fn get_subject(&self) -> Result<S> {
		self.context().subject().await
	}

	#[instrument(level = "debug", skip(self, resource), fields(policy_key = %key))]
	pub async fn evaluate(&self, key: &str, resource: Option<Value>) -> Result<Evaluation<S>> {
		self.context().evaluate(key, resource).await
	}

	pub async fn is_authorized(&self, key: &str, resource: Option<Value>) -> Result<bool> {
		self.context().is_authorized(key, resource).await
	}

	/// Returns the narrowed subject, or runs the unauthorized handlers and fails.
	#[instrument(level = "debug", skip(self, resource), fields(policy_key = %key))]
	pub async fn authorize(&self, key: &str, resource: Option<Value>) -> Result<S> {
		self.context().authorize(key, resource).await
	}

	/// Returns the resources the policy grants, in input order.
	#[instrument(level = "debug", skip(self, resources), fields(policy_key = %key, count = resources.len()))]
	pub async fn filter(&self, key: &str, resources: Vec<Value>) -> Result<Vec<Value>> {
		self.context().filter(key, resources).await
	}
}

/// Handle to one evaluation chain.
///
/// Passed to policies and the subject getter. Evaluations made through it
/// share the chain's scope and recursion guard.
pub struct EvalContext<S: Subject> {
	shared: Arc<Shared<S>>,
	scope: Option<Arc<Scope<S>>>,
	chain: Chain,
}

impl<S: Subject> Clone for EvalContext<S> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
			scope: self.scope.clone(),
			chain: self.chain.clone(),
		}
	}
}

impl<S: Subject> EvalContext<S> {
	pub fn scope(&self) -> Option<&Arc<Scope<S>>> {
		self.scope.as_ref()
	}

	/// Current nesting depth on this chain.
	pub fn depth(&self) -> usize {
		self.chain.guard.depth()
	}

	/// Returns the scope-cached subject, fetching it on a miss.
	pub async fn subject(&self) -> Result<S> {
		let get_subject = Arc::clone(&self.shared.get_subject);
		let mut cx = self.clone();
		let chain = cx.chain.clone();
		if self.chain.fetching_subject {
			let _token = self.chain.guard.push()?;
			return ACTIVE_CHAIN.scope(chain, async move { get_subject(cx).await }).await;
		}

		cx.chain.fetching_subject = true;
		let fetch = ACTIVE_CHAIN.scope(cx.chain.clone(), async move { get_subject(cx).await });
		self.shared.scopes.get_subject(self.scope.as_ref(), fetch).await
	}

	pub fn evaluate(
		&self,
		key: &str,
		resource: Option<Value>,
	) -> BoxFuture<'static, Result<Evaluation<S>>> {
		let cx = self.clone();
		let key = key.to_string();
		Box::pin(async move {
			let _token = cx.chain.guard.push().inspect_err(|e| {
				error!(policy_key = %key, error = %e, "authorization recursion limit reached");
			})?;

			let subject = cx.subject().await?;
			let policy = cx.shared.policies.resolve(&key).inspect_err(|e| {
				error!(policy_key = %key, error = %e, "failed to resolve policy");
			})?;

			let decision = ACTIVE_CHAIN
				.scope(cx.chain.clone(), policy.check(&cx, subject.clone(), resource.clone()))
				.await?;
			cx.shared.emit(&key, &subject, resource.as_ref(), &decision);

			Ok(Evaluation {
				decision,
				subject,
				policy_key: key,
			})
		})
	}

	pub async fn is_authorized(&self, key: &str, resource: Option<Value>) -> Result<bool> {
		Ok(self.evaluate(key, resource).await?.is_granted())
	}

	pub async fn authorize(&self, key: &str, resource: Option<Value>) -> Result<S> {
		match self.evaluate(key, resource).await?.decision {
			Decision::Granted { subject } => Ok(subject),
			Decision::Denied(denial) => {
				if let Some(handler) = self.scope.as_ref().and_then(|s| s.on_unauthorized()) {
					handler(key, &denial)?;
				}
				if let Some(handler) = &self.shared.default_unauthorized {
					handler(key, &denial)?;
				}
				Err(AuthzError::Denied(denial))
			}
		}
	}

	pub async fn filter(&self, key: &str, resources: Vec<Value>) -> Result<Vec<Value>> {
		let _token = self.chain.guard.push()?;
		let subject = self.subject().await?;
		let policy = self.shared.policies.resolve(key)?;

		let checks = resources.iter().map(|resource| {
			let policy = Arc::clone(&policy);
			let subject = subject.clone();
			let resource = resource.clone();
			ACTIVE_CHAIN.scope(self.chain.clone(), async move {
				policy.check(self, subject, Some(resource)).await
			})
		});
		let decisions = try_join_all(checks).await?;

		let mut granted = Vec::new();
		for (resource, decision) in resources.into_iter().zip(decisions) {
			self.shared.emit(key, &subject, Some(&resource), &decision);
			if decision.is_granted() {
				granted.push(resource);
			}
		}
		Ok(granted)
	}
}
