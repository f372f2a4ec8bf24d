// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy definitions and key resolution.
//!
//! Policies are registered in a [`PolicyMap`], a tree whose leaves are
//! policies and whose inner nodes are named groups. A key such as
//! `docs:nested:read` is split on the map's separator and walked segment by
//! segment. Resolution failures are programmer errors and surface as
//! [`AuthzError::PolicyNotFound`] or [`AuthzError::NotAPolicy`], never as a
//! denied decision.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::decision::Decision;
use crate::error::{AuthzError, Result};
use crate::evaluator::EvalContext;
use crate::Subject;

/// Default separator between key segments.
pub const DEFAULT_KEY_SEPARATOR: char = ':';

/// A single authorization rule.
///
/// Policies may perform I/O and may evaluate other policies through `cx`.
/// Nested evaluations count against the chain's call depth.
#[async_trait]
pub trait Policy<S: Subject>: Send + Sync {
	async fn check(
		&self,
		cx: &EvalContext<S>,
		subject: S,
		resource: Option<Value>,
	) -> Result<Decision<S>>;
}

/// Adapts an async closure into a [`Policy`].
pub struct FnPolicy<F> {
	f: F,
}

#[async_trait]
impl<S, F, Fut> Policy<S> for FnPolicy<F>
where
	S: Subject,
	F: Fn(EvalContext<S>, S, Option<Value>) -> Fut + Send + Sync,
	Fut: Future<Output = Result<Decision<S>>> + Send + 'static,
{
	async fn check(
		&self,
		cx: &EvalContext<S>,
		subject: S,
		resource: Option<Value>,
	) -> Result<Decision<S>> {
		(self.f)(cx.clone(), subject, resource).await
	}
}

/// Builds a policy from an async closure.
pub fn policy_fn<S, F, Fut>(f: F) -> Arc<dyn Policy<S>>
where
	S: Subject,
	F: Fn(EvalContext<S>, S, Option<Value>) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Decision<S>>> + Send + 'static,
{
	Arc::new(FnPolicy { f })
}

/// Synchronous predicate policy: grants the unmodified subject when `f` holds.
pub struct PredicatePolicy<F> {
	f: F,
}

#[async_trait]
impl<S, F> Policy<S> for PredicatePolicy<F>
where
	S: Subject,
	F: Fn(&S, Option<&Value>) -> bool + Send + Sync,
{
	async fn check(
		&self,
		_cx: &EvalContext<S>,
		subject: S,
		resource: Option<Value>,
	) -> Result<Decision<S>> {
		let allowed = (self.f)(&subject, resource.as_ref());
		Ok(Decision::from_bool(allowed, subject))
	}
}

/// Builds a policy from a boolean predicate.
pub fn allow_if<S, F>(f: F) -> Arc<dyn Policy<S>>
where
	S: Subject,
	F: Fn(&S, Option<&Value>) -> bool + Send + Sync + 'static,
{
	Arc::new(PredicatePolicy { f })
}

enum Node<S> {
	Group(BTreeMap<String, Node<S>>),
	Leaf(Arc<dyn Policy<S>>),
}

/// Nested map of policies addressed by separator-delimited keys.
pub struct PolicyMap<S> {
	root: BTreeMap<String, Node<S>>,
	separator: char,
}

impl<S: Subject> Default for PolicyMap<S> {
	fn default() -> Self {
		Self::new()
	}
}

impl<S: Subject> PolicyMap<S> {
	pub fn new() -> Self {
		Self::with_separator(DEFAULT_KEY_SEPARATOR)
	}

	pub fn with_separator(separator: char) -> Self {
		Self {
			root: BTreeMap::new(),
			separator,
		}
	}

	pub fn separator(&self) -> char {
		self.separator
	}

	/// Registers `policy` at `key`, creating intermediate groups as needed.
	///
	/// Re-registering an existing key replaces the policy. Registering below
	/// an existing policy is a [`AuthzError::KeyConflict`].
	pub fn insert(&mut self, key: &str, policy: Arc<dyn Policy<S>>) -> Result<()> {
		let segments = self.split(key)?;
		let (last, parents) = segments
			.split_last()
			.ok_or_else(|| AuthzError::PolicyNotFound { key: key.to_string() })?;

		let mut level = &mut self.root;
		let mut walked = Vec::with_capacity(parents.len());
		for segment in parents {
			walked.push(*segment);
			let node = level
				.entry((*segment).to_string())
				.or_insert_with(|| Node::Group(BTreeMap::new()));
			level = match node {
				Node::Group(children) => children,
				Node::Leaf(_) => {
					return Err(AuthzError::KeyConflict {
						key: key.to_string(),
						conflict: walked.join(&self.separator.to_string()),
					})
				}
			};
		}

		if let Some(Node::Group(_)) = level.get(*last) {
			return Err(AuthzError::KeyConflict {
				key: key.to_string(),
				conflict: key.to_string(),
			});
		}
		level.insert((*last).to_string(), Node::Leaf(policy));
		Ok(())
	}

	/// Builder form of [`insert`](Self::insert).
	pub fn with(mut self, key: &str, policy: Arc<dyn Policy<S>>) -> Result<Self> {
		self.insert(key, policy)?;
		Ok(self)
	}

	/// Resolves `key` to the policy registered there.
	pub fn resolve(&self, key: &str) -> Result<Arc<dyn Policy<S>>> {
		let segments = self.split(key)?;
		let not_found = || AuthzError::PolicyNotFound { key: key.to_string() };

		let mut level = &self.root;
		let mut remaining = segments.iter().peekable();
		while let Some(segment) = remaining.next() {
			match level.get(*segment) {
				None => return Err(not_found()),
				Some(Node::Leaf(policy)) => {
					if remaining.peek().is_some() {
						return Err(not_found());
					}
					return Ok(Arc::clone(policy));
				}
				Some(Node::Group(children)) => {
					if remaining.peek().is_none() {
						return Err(AuthzError::NotAPolicy { key: key.to_string() });
					}
					level = children;
				}
			}
		}

		Err(not_found())
	}

	/// Returns true if `key` resolves to a policy.
	pub fn contains(&self, key: &str) -> bool {
		self.resolve(key).is_ok()
	}

	/// Lists every registered policy key in sorted order.
	pub fn keys(&self) -> Vec<String> {
		let mut keys = Vec::new();
		collect_keys(&self.root, &mut Vec::new(), self.separator, &mut keys);
		keys
	}

	fn split<'k>(&self, key: &'k str) -> Result<Vec<&'k str>> {
		let segments: Vec<&str> = key.split(self.separator).collect();
		if key.is_empty() || segments.iter().any(|s| s.is_empty()) {
			return Err(AuthzError::PolicyNotFound { key: key.to_string() });
		}
		Ok(segments)
	}
}

fn collect_keys<S>(
	level: &BTreeMap<String, Node<S>>,
	prefix: &mut Vec<String>,
	separator: char,
	out: &mut Vec<String>,
) {
	for (name, node) in level {
		prefix.push(name.clone());
		match node {
			Node::Leaf(_) => out.push(prefix.join(&separator.to_string())),
			Node::Group(children) => collect_keys(children, prefix, separator, out),
		}
		prefix.pop();
	}
}
