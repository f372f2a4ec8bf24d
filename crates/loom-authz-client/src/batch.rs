// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request batching with deduplication, per-caller cancellation and job
//! timeouts.
//!
//! The first job queued while idle opens a batch and arms a flush timer
//! (`batch_delay`). Jobs queued until the timer fires (or
//! [`Batcher::flush_batch`] is called) join the same batch, which is then
//! handed to a [`JobRunner`] as a whole.
//!
//! Every job has its own cancellation signal. It fires when every caller
//! attached to the job has cancelled (a caller without a signal keeps the job
//! alive), or when the job times out, whichever comes first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{ClientError, Result};

/// Configuration for the batcher.
#[derive(Debug, Clone)]
pub struct BatchConfig {
	/// Time a batch stays open after its first job.
	pub batch_delay: Duration,
	/// Time after which a job is rejected, flushed or not.
	pub job_timeout: Duration,
}

impl Default for BatchConfig {
	fn default() -> Self {
		Self {
			batch_delay: Duration::from_millis(50),
			job_timeout: Duration::from_secs(10),
		}
	}
}

/// Executes a flushed batch.
///
/// Must settle every job through [`BatchJob::resolve`] or
/// [`BatchJob::reject`]; jobs left unsettled are rejected with
/// [`ClientError::Internal`] once `run_jobs` returns.
#[async_trait]
pub trait JobRunner<P, T>: Send + Sync {
	async fn run_jobs(&self, jobs: Vec<BatchJob<P, T>>);
}

/// Returns true when two payloads ask the same question.
pub type DedupeFn<P> = Arc<dyn Fn(&P, &P) -> bool + Send + Sync>;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Callers {
	/// Callers whose signal has not fired yet.
	outstanding: usize,
	/// Set once a caller without a signal attaches.
	pinned: bool,
	/// Set when the last caller cancelled; the job accepts no new callers.
	abandoned: bool,
}

struct JobState<T> {
	id: u64,
	sender: Mutex<Option<oneshot::Sender<Result<T>>>>,
	/// Cancelled when the job settles; stops watcher tasks.
	settled: CancellationToken,
	signal: CancellationToken,
	callers: Mutex<Callers>,
}

impl<T> JobState<T> {
	fn settle(&self, result: Result<T>) -> bool {
		let sender = lock(&self.sender).take();
		match sender {
			Some(sender) => {
				// The receiver lives inside the shared result and is only
				// dropped when no caller is waiting any more.
				let _ = sender.send(result);
				self.settled.cancel();
				true
			}
			None => false,
		}
	}

	fn is_settled(&self) -> bool {
		self.settled.is_cancelled()
	}
}

/// A queued unit of work as seen by a [`JobRunner`].
pub struct BatchJob<P, T> {
	payload: P,
	state: Arc<JobState<T>>,
}

impl<P, T> BatchJob<P, T> {
	pub fn id(&self) -> u64 {
		self.state.id
	}

	pub fn payload(&self) -> &P {
		&self.payload
	}

	/// Fires when every caller cancelled or the job timed out.
	pub fn signal(&self) -> &CancellationToken {
		&self.state.signal
	}

	/// Settles the job successfully. Returns false if it was already settled.
	pub fn resolve(&self, value: T) -> bool {
		self.state.settle(Ok(value))
	}

	/// Settles the job with an error. Returns false if it was already settled.
	pub fn reject(&self, error: ClientError) -> bool {
		self.state.settle(Err(error))
	}

	pub fn is_settled(&self) -> bool {
		self.state.is_settled()
	}
}

impl<P: std::fmt::Debug, T> std::fmt::Debug for BatchJob<P, T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BatchJob")
			.field("id", &self.state.id)
			.field("payload", &self.payload)
			.field("settled", &self.is_settled())
			.finish()
	}
}

/// A caller's view of a queued job.
pub struct JobHandle<T> {
	result: SharedResult<T>,
	signal: Option<CancellationToken>,
}

impl<T> JobHandle<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn ready(result: Result<T>) -> Self {
		Self {
			result: futures::future::ready(result).boxed().shared(),
			signal: None,
		}
	}

	/// Waits for the job's result, or for this caller's own signal.
	pub async fn wait(self) -> Result<T> {
		match self.signal {
			Some(signal) => {
				tokio::select! {
					biased;
					_ = signal.cancelled() => Err(ClientError::Cancelled),
					result = self.result => result,
				}
			}
			None => self.result.await,
		}
	}
}

struct PendingJob<P, T> {
	job: BatchJob<P, T>,
	result: SharedResult<T>,
}

struct BatchState<P, T> {
	jobs: Vec<PendingJob<P, T>>,
	/// Incremented whenever a batch is detached; stale timers compare against it.
	generation: u64,
	timer: Option<JoinHandle<()>>,
	closed: bool,
}

struct BatcherInner<P, T> {
	config: BatchConfig,
	runner: Arc<dyn JobRunner<P, T>>,
	dedupe: Option<DedupeFn<P>>,
	state: Mutex<BatchState<P, T>>,
	next_id: AtomicU64,
}

/// Collects jobs into batches and hands them to a [`JobRunner`].
pub struct Batcher<P, T> {
	inner: Arc<BatcherInner<P, T>>,
}

impl<P, T> Clone for Batcher<P, T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<P, T> Batcher<P, T>
where
	P: Send + Sync + 'static,
	T: Clone + Send + Sync + 'static,
{
	pub fn new(config: BatchConfig, runner: Arc<dyn JobRunner<P, T>>) -> Self {
		Self::build(config, runner, None)
	}

	/// Enables deduplication: a job whose payload matches a job already in
	/// the open batch attaches to it instead of being queued again.
	pub fn with_dedupe<F>(config: BatchConfig, runner: Arc<dyn JobRunner<P, T>>, dedupe: F) -> Self
	where
		F: Fn(&P, &P) -> bool + Send + Sync + 'static,
	{
		Self::build(config, runner, Some(Arc::new(dedupe)))
	}

	fn build(config: BatchConfig, runner: Arc<dyn JobRunner<P, T>>, dedupe: Option<DedupeFn<P>>) -> Self {
		Self {
			inner: Arc::new(BatcherInner {
				config,
				runner,
				dedupe,
				state: Mutex::new(BatchState {
					jobs: Vec::new(),
					generation: 0,
					timer: None,
					closed: false,
				}),
				next_id: AtomicU64::new(0),
			}),
		}
	}

	pub fn config(&self) -> &BatchConfig {
		&self.inner.config
	}

	/// Number of jobs in the open batch.
	pub fn pending(&self) -> usize {
		lock(&self.inner.state).jobs.len()
	}

	/// Queues `payload`, attaching to an equal job in the open batch if any.
	///
	/// `signal` cancels this caller's interest; the returned handle rejects
	/// with [`ClientError::Cancelled`] as soon as it fires.
	pub fn queue_job(&self, payload: P, signal: Option<CancellationToken>) -> JobHandle<T> {
		if signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
			return JobHandle::ready(Err(ClientError::Cancelled));
		}

		let mut state = lock(&self.inner.state);
		if state.closed {
			return JobHandle::ready(Err(ClientError::Shutdown));
		}

		if let Some(dedupe) = &self.inner.dedupe {
			let existing = state
				.jobs
				.iter()
				.find(|pending| !pending.job.is_settled() && dedupe(pending.job.payload(), &payload));
			if let Some(pending) = existing {
				if attach_caller(&pending.job.state, signal.clone()) {
					trace!(job_id = pending.job.id(), "attaching to queued job");
					return JobHandle {
						result: pending.result.clone(),
						signal,
					};
				}
				trace!(job_id = pending.job.id(), "matching job was abandoned; queueing a new one");
			}
		}

		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		let (sender, receiver) = oneshot::channel();
		let job_state = Arc::new(JobState {
			id,
			sender: Mutex::new(Some(sender)),
			settled: CancellationToken::new(),
			signal: CancellationToken::new(),
			callers: Mutex::new(Callers::default()),
		});
		let result = receiver
			.map(|received| {
				received.unwrap_or_else(|_| {
					Err(ClientError::Internal("job was dropped before settling".to_string()))
				})
			})
			.boxed()
			.shared();

		attach_caller(&job_state, signal.clone());
		spawn_job_timeout(Arc::clone(&job_state), self.inner.config.job_timeout);

		state.jobs.push(PendingJob {
			job: BatchJob {
				payload,
				state: job_state,
			},
			result: result.clone(),
		});
		trace!(job_id = id, queued = state.jobs.len(), "queued job");

		if state.timer.is_none() {
			let inner = Arc::clone(&self.inner);
			let generation = state.generation;
			state.timer = Some(tokio::spawn(async move {
				tokio::time::sleep(inner.config.batch_delay).await;
				BatcherInner::flush_generation(&inner, generation).await;
			}));
		}

		JobHandle { result, signal }
	}

	/// Flushes the open batch now.
	pub async fn flush_batch(&self) {
		let jobs = {
			let mut state = lock(&self.inner.state);
			if let Some(timer) = state.timer.take() {
				timer.abort();
			}
			BatcherInner::detach(&mut state)
		};
		BatcherInner::run(&self.inner, jobs).await;
	}

	/// Flushes the open batch and rejects all later jobs with
	/// [`ClientError::Shutdown`].
	pub async fn shutdown(&self) {
		lock(&self.inner.state).closed = true;
		self.flush_batch().await;
	}
}

impl<P, T> BatcherInner<P, T>
where
	P: Send + Sync + 'static,
	T: Clone + Send + Sync + 'static,
{
	fn detach(state: &mut BatchState<P, T>) -> Vec<PendingJob<P, T>> {
		state.generation += 1;
		std::mem::take(&mut state.jobs)
	}

	/// Timer entry point; a no-op if the batch it was armed for is gone.
	async fn flush_generation(inner: &Arc<Self>, generation: u64) {
		let jobs = {
			let mut state = lock(&inner.state);
			if state.generation != generation {
				return;
			}
			state.timer = None;
			Self::detach(&mut state)
		};
		Self::run(inner, jobs).await;
	}

	async fn run(inner: &Arc<Self>, pending: Vec<PendingJob<P, T>>) {
		let jobs: Vec<BatchJob<P, T>> = pending
			.into_iter()
			.map(|p| p.job)
			.filter(|job| !job.is_settled())
			.collect();
		if jobs.is_empty() {
			return;
		}

		let states: Vec<Arc<JobState<T>>> = jobs.iter().map(|j| Arc::clone(&j.state)).collect();
		debug!(count = jobs.len(), "flushing batch");
		inner.runner.run_jobs(jobs).await;

		for state in states {
			if state.settle(Err(ClientError::Internal(
				"job runner returned without settling the job".to_string(),
			))) {
				warn!(job_id = state.id, "job runner left a job unsettled");
			}
		}
	}
}

/// Registers one more caller on a job.
///
/// Returns false if the job was abandoned or has settled; the caller must
/// queue a new job instead.
fn attach_caller<T: Send + Sync + 'static>(state: &Arc<JobState<T>>, signal: Option<CancellationToken>) -> bool {
	{
		let mut callers = lock(&state.callers);
		if callers.abandoned || state.is_settled() {
			return false;
		}
		match signal {
			Some(_) => callers.outstanding += 1,
			None => callers.pinned = true,
		}
	}

	let Some(signal) = signal else {
		return true;
	};
	let state = Arc::clone(state);
	tokio::spawn(async move {
		tokio::select! {
			_ = state.settled.cancelled() => {}
			_ = signal.cancelled() => {
				// Abandoning under the callers lock keeps a late caller from
				// attaching to a job that is about to be cancelled.
				let mut callers = lock(&state.callers);
				callers.outstanding = callers.outstanding.saturating_sub(1);
				if callers.outstanding == 0 && !callers.pinned {
					callers.abandoned = true;
					debug!(job_id = state.id, "every caller cancelled; cancelling job");
					state.signal.cancel();
					state.settle(Err(ClientError::Cancelled));
				}
			}
		}
	});
	true
}

fn spawn_job_timeout<T: Send + Sync + 'static>(state: Arc<JobState<T>>, timeout: Duration) {
	tokio::spawn(async move {
		tokio::select! {
			_ = state.settled.cancelled() => {}
			_ = tokio::time::sleep(timeout) => {
				if state.settle(Err(ClientError::Timeout)) {
					debug!(job_id = state.id, "job timed out");
				}
				state.signal.cancel();
			}
		}
	});
}
