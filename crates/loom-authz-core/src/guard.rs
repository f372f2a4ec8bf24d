// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Recursion guard for nested decision evaluations.
//!
//! A policy (or the subject getter) that evaluates a decision leading back to
//! itself would otherwise recurse until the stack overflows. The guard counts
//! active evaluations on one evaluation chain and fails with
//! [`AuthzError::RecursionLimit`] once the configured depth is exceeded.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::error::{AuthzError, Result};

/// Default maximum number of nested evaluations on one chain.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 50;

/// Depth counter shared by every evaluation on one logical chain.
#[derive(Debug)]
pub struct CallStackGuard {
	depth: AtomicUsize,
	limit: usize,
}

impl Default for CallStackGuard {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_CALL_DEPTH)
	}
}

impl CallStackGuard {
	pub fn new(limit: usize) -> Self {
		Self {
			depth: AtomicUsize::new(0),
			limit,
		}
	}

	pub fn limit(&self) -> usize {
		self.limit
	}

	pub fn depth(&self) -> usize {
		self.depth.load(Ordering::SeqCst)
	}

	/// Enters one level. The returned token leaves the level when dropped,
	/// so the counter unwinds on every exit path including `?` and panics.
	pub fn push(self: &Arc<Self>) -> Result<GuardToken> {
		let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
		if depth > self.limit {
			self.pop();
			return Err(AuthzError::RecursionLimit {
				depth,
				limit: self.limit,
			});
		}
		Ok(GuardToken {
			guard: Arc::clone(self),
		})
	}

	/// Leaves one level. A pop without a matching push clamps at zero.
	pub fn pop(&self) {
		let popped = self
			.depth
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
		if popped.is_err() {
			warn!("call stack guard popped below zero; push/pop calls are mismatched");
		}
	}

	/// Runs `fut` one level deeper.
	pub async fn run<F, T>(self: &Arc<Self>, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let _token = self.push()?;
		fut.await
	}
}

/// Scoped level on a [`CallStackGuard`]; pops on drop.
#[derive(Debug)]
#[must_use = "dropping the token immediately leaves the guarded level"]
pub struct GuardToken {
	guard: Arc<CallStackGuard>,
}

impl Drop for GuardToken {
	fn drop(&mut self) {
		self.guard.pop();
	}
}
