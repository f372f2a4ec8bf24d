// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flush strategies deciding when buffered decision events reach the sink.
//!
//! | Strategy          | Flushes                                             |
//! |-------------------|-----------------------------------------------------|
//! | [`ImmediateFlush`] | every event on arrival, one event per batch        |
//! | [`ManualFlush`]    | only on [`FlushStrategy::trigger_flush`]           |
//! | [`PeriodicFlush`]  | on a recurring timer                               |
//! | [`WindowedFlush`]  | `batch_timeout` after the first event of a window  |
//!
//! Flushes started in the background are handed to the ensure-completion
//! hook (default: `tokio::spawn`) and tracked so that
//! [`FlushStrategy::shutdown`] can wait for them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use loom_authz_core::AuditEvent;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::{AuditError, AuditResult};
use crate::sink::AuditEventSink;

/// Predicate deciding whether an event is buffered at all.
pub type EventFilter = Arc<dyn Fn(&AuditEvent) -> bool + Send + Sync>;

/// Receives every background flush future and is responsible for driving it.
pub type CompletionHook = Arc<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>;

/// Common interface of the flush strategies.
#[async_trait]
pub trait FlushStrategy: Send + Sync {
	fn name(&self) -> &'static str;

	/// Accepts one event. Never blocks on the sink.
	fn on_event(&self, event: AuditEvent);

	/// Flushes everything currently buffered and waits for the sink.
	async fn trigger_flush(&self);

	/// Flushes remaining events, then waits for every in-flight flush.
	/// Events arriving afterwards are dropped.
	async fn shutdown(&self);
}

/// Options shared by every strategy.
#[derive(Clone, Default)]
pub struct FlushOptions {
	filter: Option<EventFilter>,
	ensure_completion: Option<CompletionHook>,
}

impl FlushOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Only events for which `filter` returns true are buffered.
	pub fn filter<F>(mut self, filter: F) -> Self
	where
		F: Fn(&AuditEvent) -> bool + Send + Sync + 'static,
	{
		self.filter = Some(Arc::new(filter));
		self
	}

	/// Replaces `tokio::spawn` as the driver of background flushes.
	pub fn ensure_completion<F>(mut self, hook: F) -> Self
	where
		F: Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
	{
		self.ensure_completion = Some(Arc::new(hook));
		self
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sink plumbing shared by the strategies.
struct Flusher {
	sink: Arc<dyn AuditEventSink>,
	options: FlushOptions,
	tracker: TaskTracker,
	closed: AtomicBool,
}

impl Flusher {
	fn new(sink: Arc<dyn AuditEventSink>, options: FlushOptions) -> Self {
		Self {
			sink,
			options,
			tracker: TaskTracker::new(),
			closed: AtomicBool::new(false),
		}
	}

	fn accepts(&self, event: &AuditEvent) -> bool {
		if self.closed.load(Ordering::SeqCst) {
			warn!(policy_key = %event.policy_key, "audit strategy is shut down; dropping event");
			return false;
		}
		self.options.filter.as_ref().map_or(true, |filter| filter(event))
	}

	fn publish_future(&self, events: Vec<AuditEvent>) -> impl Future<Output = ()> + Send + 'static {
		let sink = Arc::clone(&self.sink);
		let count = events.len();
		self.tracker.track_future(async move {
			match sink.publish(events).await {
				Ok(()) => debug!(sink = sink.name(), count, "published audit events"),
				Err(e) => warn!(
					sink = sink.name(),
					error = %e,
					count,
					"failed to publish audit events"
				),
			}
		})
	}

	/// Starts a flush without waiting for it.
	fn spawn_publish(&self, events: Vec<AuditEvent>) {
		if events.is_empty() {
			return;
		}
		let fut = self.publish_future(events);
		match &self.options.ensure_completion {
			Some(hook) => hook(Box::pin(fut)),
			None => {
				tokio::spawn(fut);
			}
		}
	}

	async fn publish(&self, events: Vec<AuditEvent>) {
		if events.is_empty() {
			return;
		}
		self.publish_future(events).await;
	}

	async fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
		self.tracker.close();
		self.tracker.wait().await;
	}
}

/// Publishes every event individually as it arrives.
pub struct ImmediateFlush {
	flusher: Flusher,
}

impl ImmediateFlush {
	pub fn new(sink: Arc<dyn AuditEventSink>, options: FlushOptions) -> Self {
		Self {
			flusher: Flusher::new(sink, options),
		}
	}
}

#[async_trait]
impl FlushStrategy for ImmediateFlush {
	fn name(&self) -> &'static str {
		"immediate"
	}

	fn on_event(&self, event: AuditEvent) {
		if self.flusher.accepts(&event) {
			self.flusher.spawn_publish(vec![event]);
		}
	}

	async fn trigger_flush(&self) {}

	async fn shutdown(&self) {
		self.flusher.close().await;
	}
}

/// Buffers events until [`FlushStrategy::trigger_flush`] is called.
pub struct ManualFlush {
	flusher: Flusher,
	buffer: Mutex<Vec<AuditEvent>>,
}

impl ManualFlush {
	pub fn new(sink: Arc<dyn AuditEventSink>, options: FlushOptions) -> Self {
		Self {
			flusher: Flusher::new(sink, options),
			buffer: Mutex::new(Vec::new()),
		}
	}

	/// Number of events waiting for the next flush.
	pub fn pending(&self) -> usize {
		lock(&self.buffer).len()
	}
}

#[async_trait]
impl FlushStrategy for ManualFlush {
	fn name(&self) -> &'static str {
		"manual"
	}

	fn on_event(&self, event: AuditEvent) {
		if self.flusher.accepts(&event) {
			lock(&self.buffer).push(event);
		}
	}

	async fn trigger_flush(&self) {
		let events = std::mem::take(&mut *lock(&self.buffer));
		self.flusher.publish(events).await;
	}

	async fn shutdown(&self) {
		self.trigger_flush().await;
		self.flusher.close().await;
	}
}

struct Buffered {
	flusher: Flusher,
	buffer: Mutex<Vec<AuditEvent>>,
}

impl Buffered {
	fn take(&self) -> Vec<AuditEvent> {
		std::mem::take(&mut *lock(&self.buffer))
	}
}

/// Drains the buffer on a recurring timer.
pub struct PeriodicFlush {
	inner: Arc<Buffered>,
	cancel: CancellationToken,
	ticker: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicFlush {
	/// Starts the flush timer. Must be called within a Tokio runtime.
	pub fn new(
		sink: Arc<dyn AuditEventSink>,
		period: Duration,
		options: FlushOptions,
	) -> AuditResult<Self> {
		if period.is_zero() {
			return Err(AuditError::ConfigError(
				"periodic flush period must be positive".to_string(),
			));
		}

		let inner = Arc::new(Buffered {
			flusher: Flusher::new(sink, options),
			buffer: Mutex::new(Vec::new()),
		});
		let cancel = CancellationToken::new();
		let ticker = tokio::spawn(Self::run(Arc::clone(&inner), period, cancel.clone()));

		Ok(Self {
			inner,
			cancel,
			ticker: Mutex::new(Some(ticker)),
		})
	}

	async fn run(inner: Arc<Buffered>, period: Duration, cancel: CancellationToken) {
		let mut interval = tokio::time::interval(period);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		// The first tick completes immediately.
		interval.tick().await;

		loop {
			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = interval.tick() => {
					let events = inner.take();
					if !events.is_empty() {
						debug!(count = events.len(), "periodic audit flush");
					}
					inner.flusher.spawn_publish(events);
				}
			}
		}
	}
}

#[async_trait]
impl FlushStrategy for PeriodicFlush {
	fn name(&self) -> &'static str {
		"periodic"
	}

	fn on_event(&self, event: AuditEvent) {
		if self.inner.flusher.accepts(&event) {
			lock(&self.inner.buffer).push(event);
		}
	}

	async fn trigger_flush(&self) {
		let events = self.inner.take();
		self.inner.flusher.publish(events).await;
	}

	async fn shutdown(&self) {
		self.cancel.cancel();
		let ticker = lock(&self.ticker).take();
		if let Some(ticker) = ticker {
			if let Err(e) = ticker.await {
				warn!(error = %e, "periodic audit flush task failed");
			}
		}
		self.trigger_flush().await;
		self.inner.flusher.close().await;
	}
}

struct Window {
	events: Vec<AuditEvent>,
	/// Incremented whenever a window closes; stale timers compare against it.
	generation: u64,
	timer: Option<JoinHandle<()>>,
}

struct WindowedInner {
	flusher: Flusher,
	batch_timeout: Duration,
	window: Mutex<Window>,
}

impl WindowedInner {
	/// Closes the window opened at `generation`, if it is still open.
	fn close_window(&self, generation: u64) {
		let events = {
			let mut window = lock(&self.window);
			if window.generation != generation {
				return;
			}
			window.generation += 1;
			window.timer = None;
			std::mem::take(&mut window.events)
		};
		debug!(count = events.len(), "audit window closed");
		self.flusher.spawn_publish(events);
	}
}

/// Collects events into fixed windows of `batch_timeout`.
///
/// The first event after an idle period opens a window; events arriving
/// while it is open join it without extending it.
pub struct WindowedFlush {
	inner: Arc<WindowedInner>,
}

impl WindowedFlush {
	pub fn new(
		sink: Arc<dyn AuditEventSink>,
		batch_timeout: Duration,
		options: FlushOptions,
	) -> AuditResult<Self> {
		if batch_timeout.is_zero() {
			return Err(AuditError::ConfigError(
				"windowed flush batch timeout must be positive".to_string(),
			));
		}

		Ok(Self {
			inner: Arc::new(WindowedInner {
				flusher: Flusher::new(sink, options),
				batch_timeout,
				window: Mutex::new(Window {
					events: Vec::new(),
					generation: 0,
					timer: None,
				}),
			}),
		})
	}
}

#[async_trait]
impl FlushStrategy for WindowedFlush {
	fn name(&self) -> &'static str {
		"windowed"
	}

	fn on_event(&self, event: AuditEvent) {
		if !self.inner.flusher.accepts(&event) {
			return;
		}

		let mut window = lock(&self.inner.window);
		window.events.push(event);
		if window.timer.is_none() {
			let inner = Arc::clone(&self.inner);
			let generation = window.generation;
			window.timer = Some(tokio::spawn(async move {
				tokio::time::sleep(inner.batch_timeout).await;
				inner.close_window(generation);
			}));
		}
	}

	async fn trigger_flush(&self) {
		let events = {
			let mut window = lock(&self.inner.window);
			window.generation += 1;
			if let Some(timer) = window.timer.take() {
				timer.abort();
			}
			std::mem::take(&mut window.events)
		};
		self.inner.flusher.publish(events).await;
	}

	async fn shutdown(&self) {
		self.trigger_flush().await;
		self.inner.flusher.close().await;
	}
}
