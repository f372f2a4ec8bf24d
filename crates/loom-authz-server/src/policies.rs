// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Header-identified subject and the policy set served by the standalone
//! binary.
//!
//! The caller is identified by headers set by a trusted upstream proxy:
//! `x-loom-user` carries the user id and `x-loom-roles` a comma separated
//! list of roles. Requests without a user header are anonymous.

use loom_authz_core::{
	allow_if, policy_fn, AuthzError, Decision, EvalContext, Evaluator, EvaluatorConfig, PolicyMap, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::HEADERS_CONTEXT_KEY;

pub const USER_HEADER: &str = "x-loom-user";
pub const ROLES_HEADER: &str = "x-loom-roles";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderUser {
	pub id: String,
	#[serde(default)]
	pub roles: Vec<String>,
}

impl HeaderUser {
	pub fn has_role(&self, role: &str) -> bool {
		self.roles.iter().any(|r| r == role)
	}
}

/// `None` for anonymous callers.
pub type HeaderSubject = Option<HeaderUser>;

/// Reads the caller from a scope context built by the endpoint.
pub fn user_from_context(context: &Map<String, Value>) -> HeaderSubject {
	let headers = context.get(HEADERS_CONTEXT_KEY)?.as_object()?;
	let id = headers
		.get(USER_HEADER)?
		.as_str()
		.map(str::trim)
		.filter(|id| !id.is_empty())?;

	let roles = headers
		.get(ROLES_HEADER)
		.and_then(Value::as_str)
		.map(|roles| {
			roles
				.split(',')
				.map(str::trim)
				.filter(|r| !r.is_empty())
				.map(str::to_string)
				.collect()
		})
		.unwrap_or_default();

	Some(HeaderUser {
		id: id.to_string(),
		roles,
	})
}

fn owner_of(resource: Option<&Value>) -> Option<&str> {
	resource?.get("owner")?.as_str()
}

/// The policy set served by the binary.
///
/// - `session:authenticated`, `docs:read`: any identified caller
/// - `docs:edit`: editors, or the resource's `owner`
/// - `docs:delete`: admins who may also edit the resource
/// - `admin:access`: admins
pub fn reference_policies(separator: char) -> Result<PolicyMap<HeaderSubject>> {
	let key = |group: &str, name: &str| format!("{group}{separator}{name}");
	let edit_key = key("docs", "edit");

	let delete_policy = {
		let edit_key = edit_key.clone();
		policy_fn(
			move |cx: EvalContext<HeaderSubject>, subject: HeaderSubject, resource: Option<Value>| {
				let edit_key = edit_key.clone();
				async move {
					if !cx.is_authorized(&edit_key, resource).await? {
						return Ok(Decision::deny_with("deleting requires edit access"));
					}
					let admin = subject.as_ref().is_some_and(|u| u.has_role("admin"));
					Ok::<_, AuthzError>(Decision::from_bool(admin, subject))
				}
			},
		)
	};

	PolicyMap::with_separator(separator)
		.with(
			&key("session", "authenticated"),
			allow_if(|user: &HeaderSubject, _| user.is_some()),
		)?
		.with(
			&key("docs", "read"),
			allow_if(|user: &HeaderSubject, _| user.is_some()),
		)?
		.with(
			&edit_key,
			allow_if(|user: &HeaderSubject, resource| match user {
				Some(user) => user.has_role("editor") || owner_of(resource) == Some(user.id.as_str()),
				None => false,
			}),
		)?
		.with(&key("docs", "delete"), delete_policy)?
		.with(
			&key("admin", "access"),
			allow_if(|user: &HeaderSubject, _| user.as_ref().is_some_and(|u| u.has_role("admin"))),
		)
}

/// Builds an evaluator over [`reference_policies`] whose subject comes from
/// the request headers.
pub fn reference_evaluator(
	separator: char,
	config: EvaluatorConfig,
) -> Result<Evaluator<HeaderSubject>> {
	let policies = reference_policies(separator)?;
	let evaluator = Evaluator::builder(policies, |cx: EvalContext<HeaderSubject>| {
		let subject = cx.scope().and_then(|scope| user_from_context(&scope.context()));
		async move { Ok::<_, AuthzError>(subject) }
	})
	.config(config)
	.build();
	Ok(evaluator)
}
