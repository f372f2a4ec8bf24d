// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core authorization engine for Loom.
//!
//! Applications register named [`Policy`] implementations in a [`PolicyMap`]
//! and ask an [`Evaluator`] whether the current subject may act on a
//! resource. The evaluator caches the subject per request [`Scope`], guards
//! against runaway recursion between policies, and reports every decision to
//! registered [`DecisionListener`]s.
//!
//! ```ignore
//! let policies = PolicyMap::new()
//!     .with("docs:read", allow_if(|user: &Option<User>, _| user.is_some()))?;
//! let evaluator = Evaluator::builder(policies, |_cx| async { Ok(load_user().await) }).build();
//!
//! evaluator
//!     .run_in_scope(Map::new(), async {
//!         let user = evaluator.authorize("docs:read", None).await?;
//!         Ok::<_, AuthzError>(user)
//!     })
//!     .await?;
//! ```

pub mod audit;
pub mod decision;
pub mod error;
pub mod evaluator;
pub mod guard;
pub mod policy;
pub mod scope;
pub mod wire;

use serde::Serialize;

pub use audit::{AuditEvent, DecisionListener, ListenerError};
pub use decision::{Decision, DecisionSummary, Denial};
pub use error::{AuthzError, Result};
pub use evaluator::{
	EvalContext, Evaluation, Evaluator, EvaluatorBuilder, EvaluatorConfig, SubjectGetter,
};
pub use guard::{CallStackGuard, GuardToken, DEFAULT_MAX_CALL_DEPTH};
pub use policy::{allow_if, policy_fn, Policy, PolicyMap, DEFAULT_KEY_SEPARATOR};
pub use scope::{Scope, ScopeManager, ScopeProvider, UnauthorizedHandler};
pub use wire::{RequestItem, ResponseItem};

/// The identity decisions are made about.
///
/// An anonymous subject is modelled inside the type, e.g. `Option<User>`;
/// `None` is then a legitimate, cacheable subject.
pub trait Subject: Clone + Serialize + Send + Sync + 'static {}

impl<T> Subject for T where T: Clone + Serialize + Send + Sync + 'static {}
