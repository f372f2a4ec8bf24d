// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client-side result cache keyed by canonical JSON arrays.
//!
//! Entries hold shared futures, so concurrent lookups for the same key
//! attach to one in-flight request. A failed result is evicted once it
//! settles; successful results live until invalidated.

use std::collections::{hash_map, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::Result;
use crate::key::{path_prefix, stable_key};

const INVALIDATION_CHANNEL_CAPACITY: usize = 64;

/// Shared handle to a cached result.
pub type CachedFuture<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Notification published by [`ClientCache::invalidate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Invalidation {
	/// The invalidated path; empty means everything.
	pub path: Vec<Value>,
	/// Number of entries removed.
	pub removed: usize,
}

struct Entry<T: Clone> {
	id: u64,
	future: CachedFuture<T>,
}

struct CacheInner<T: Clone> {
	entries: Mutex<HashMap<String, Entry<T>>>,
	next_id: AtomicU64,
	invalidations: broadcast::Sender<Invalidation>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone> CacheInner<T> {
	/// Removes the entry stored under `key` if it is still entry `id`.
	fn evict(&self, key: &str, id: u64) {
		let mut entries = lock(&self.entries);
		if entries.get(key).is_some_and(|entry| entry.id == id) {
			entries.remove(key);
			trace!(key, "evicted failed cache entry");
		}
	}
}

pub struct ClientCache<T: Clone> {
	inner: Arc<CacheInner<T>>,
}

impl<T: Clone> Clone for ClientCache<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> Default for ClientCache<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<T> ClientCache<T>
where
	T: Clone + Send + Sync + 'static,
{
	pub fn new() -> Self {
		let (invalidations, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
		Self {
			inner: Arc::new(CacheInner {
				entries: Mutex::new(HashMap::new()),
				next_id: AtomicU64::new(0),
				invalidations,
			}),
		}
	}

	/// Returns the cached future for `key`, or stores and returns the
	/// future produced by `resolve`.
	///
	/// The entry is stored before the future settles, so callers arriving
	/// while it is in flight share it. `resolve` runs without the cache lock
	/// held and may use the cache itself; if another caller stores `key`
	/// meanwhile, that entry wins and the resolved future is dropped.
	pub fn run_cached<F, Fut>(&self, key: &[Value], resolve: F) -> CachedFuture<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		let cache_key = stable_key(key);
		if let Some(entry) = lock(&self.inner.entries).get(&cache_key) {
			trace!(key = %cache_key, "cache hit");
			return entry.future.clone();
		}

		trace!(key = %cache_key, "cache miss");
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		let weak: Weak<CacheInner<T>> = Arc::downgrade(&self.inner);
		let evict_key = cache_key.clone();
		let resolving = resolve();

		let future = async move {
			let result = resolving.await;
			if result.is_err() {
				if let Some(inner) = weak.upgrade() {
					inner.evict(&evict_key, id);
				}
			}
			result
		}
		.boxed()
		.shared();

		match lock(&self.inner.entries).entry(cache_key) {
			hash_map::Entry::Occupied(entry) => {
				trace!(key = %entry.key(), "entry stored while resolving; sharing it");
				entry.get().future.clone()
			}
			hash_map::Entry::Vacant(slot) => {
				slot.insert(Entry {
					id,
					future: future.clone(),
				});
				future
			}
		}
	}

	/// Removes every entry under `path`; an empty path clears the cache.
	/// Returns the number of removed entries.
	pub fn invalidate(&self, path: &[Value]) -> usize {
		let removed = {
			let mut entries = lock(&self.inner.entries);
			let before = entries.len();
			match path_prefix(path) {
				None => entries.clear(),
				Some(prefix) => entries.retain(|key, _| !key.starts_with(&prefix)),
			}
			before - entries.len()
		};

		debug!(path = %stable_key(path), removed, "invalidated cache entries");
		// No subscribers is fine.
		let _ = self.inner.invalidations.send(Invalidation {
			path: path.to_vec(),
			removed,
		});
		removed
	}

	/// Subscribes to invalidation notifications.
	pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
		self.inner.invalidations.subscribe()
	}

	pub fn contains(&self, key: &[Value]) -> bool {
		lock(&self.inner.entries).contains_key(&stable_key(key))
	}

	pub fn len(&self) -> usize {
		lock(&self.inner.entries).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
