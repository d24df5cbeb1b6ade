//! Cancellable background task with an explicit lifecycle
//!
//! ```text
//! Pending ──execute()──▶ Running ──body returns──▶ Finished
//!    │                      │
//!    └──cancel()──▶ Finished └──cancel()──▶ grace period ──▶ Finished (Cancelled)
//! ```
//!
//! The cancelled flag is orthogonal to the status: it can be raised while
//! Pending or Running and forces a [`TaskOutcome::Cancelled`] at completion,
//! even when cancellation races a body that was about to succeed. The post-hook
//! ([`TaskBody::on_finish`]) runs exactly once in every case.
//!
//! Errors and panics of the body never escape: they are classified into a
//! [`TaskFailure`], stored for [`AsyncTask::last_failure`] and handed to the
//! post-hook.

mod failure;

pub use failure::{FailureKind, TaskFailure};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;

/// Lifecycle status of an [`AsyncTask`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not executed yet
    Pending,
    /// Body executing
    Running,
    /// Post-hook ran (or is running)
    Finished,
}

impl TaskStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            PENDING => TaskStatus::Pending,
            RUNNING => TaskStatus::Running,
            _ => TaskStatus::Finished,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => f.write_str("pending"),
            TaskStatus::Running => f.write_str("running"),
            TaskStatus::Finished => f.write_str("finished"),
        }
    }
}

/// What the post-hook receives
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// Body returned normally and the task was not cancelled
    Success(T),
    /// Body returned an error or panicked
    Failure(TaskFailure),
    /// Task was cancelled before or while running
    Cancelled,
}

impl<T> TaskOutcome<T> {
    /// True for [`TaskOutcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }

    /// True for [`TaskOutcome::Cancelled`]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }
}

/// Time limits enforced on a task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskLimits {
    /// A task running longer than this is no longer "really working"
    pub max_execution_time: Duration,
    /// A task cancelled longer ago than this is no longer "really working"
    pub stale_threshold: Duration,
    /// How long a cancelled body may keep running before it is aborted
    pub cancel_grace: Duration,
}

impl TaskLimits {
    /// Limits taken from the scheduler configuration
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_execution_time: config.max_execution_time,
            stale_threshold: config.stale_progress_threshold,
            cancel_grace: config.cancel_grace,
        }
    }
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// The work an [`AsyncTask`] performs, split into lifecycle hooks
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    /// Input handed to [`run`](Self::run)
    type Params: Send + 'static;
    /// Progress values published by the body
    type Progress: Send + 'static;
    /// Value produced on success
    type Output: Send + 'static;

    /// Runs in the context that called [`AsyncTask::execute`], before the body starts
    async fn on_pre_execute(&self) {}

    /// The background body, spawned on the runtime
    ///
    /// Should check [`TaskContext::is_cancelled`] or select on
    /// [`TaskContext::cancelled`] at its suspension points.
    async fn run(
        &self,
        params: Self::Params,
        context: TaskContext<Self::Progress>,
    ) -> Result<Self::Output>;

    /// Called on the driver for every published progress value, unless cancelled
    async fn on_progress(&self, _progress: Self::Progress) {}

    /// Post-hook, called exactly once
    async fn on_finish(&self, _outcome: TaskOutcome<Self::Output>) {}

    /// Whether the body still has work to do
    fn needs_background_work(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct TaskClock {
    started_at: OnceLock<Instant>,
    cancelled_at: OnceLock<Instant>,
    last_progress: Mutex<Option<Instant>>,
}

impl TaskClock {
    fn touch(&self) {
        *lock(&self.last_progress) = Some(Instant::now());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle given to a running body
pub struct TaskContext<P> {
    token: CancellationToken,
    progress_tx: mpsc::UnboundedSender<P>,
    clock: Arc<TaskClock>,
}

impl<P> Clone for TaskContext<P> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            progress_tx: self.progress_tx.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<P: Send + 'static> TaskContext<P> {
    /// Publish a progress value
    ///
    /// Returns false if the task is cancelled and the value was dropped.
    pub fn publish_progress(&self, progress: P) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.clock.touch();
        self.progress_tx.send(progress).is_ok()
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Token to hand to code that takes one
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

struct Inner<B: TaskBody> {
    name: String,
    body: Arc<B>,
    limits: TaskLimits,
    status: AtomicU8,
    token: CancellationToken,
    finished: CancellationToken,
    /// Set once the outcome is settled; cancellation after that point is refused
    post_hook_claimed: Mutex<bool>,
    clock: Arc<TaskClock>,
    failure: Mutex<Option<TaskFailure>>,
}

/// A cancellable unit of background work
///
/// Cheap to clone; clones share the same task.
pub struct AsyncTask<B: TaskBody> {
    inner: Arc<Inner<B>>,
}

impl<B: TaskBody> Clone for AsyncTask<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: TaskBody> AsyncTask<B> {
    /// Create a pending task
    pub fn new(name: impl Into<String>, body: B, limits: TaskLimits) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                body: Arc::new(body),
                limits,
                status: AtomicU8::new(PENDING),
                token: CancellationToken::new(),
                finished: CancellationToken::new(),
                post_hook_claimed: Mutex::new(false),
                clock: Arc::new(TaskClock::default()),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Start the task: Pending → Running
    ///
    /// Runs the pre-hook in the caller's context, then spawns the body. Fails
    /// with [`Error::InvalidTaskState`] unless the task is Pending.
    pub async fn execute(&self, params: B::Params) -> Result<()> {
        if let Err(current) =
            self.inner
                .status
                .compare_exchange(PENDING, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
        {
            return Err(Error::InvalidTaskState {
                operation: "execute".to_string(),
                status: TaskStatus::from_u8(current).to_string(),
            });
        }
        let _ = self.inner.clock.started_at.set(Instant::now());
        self.inner.body.on_pre_execute().await;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.drive(params).await;
        });
        Ok(())
    }

    /// Request cancellation
    ///
    /// Idempotent. A pending task finishes right away; a running body is
    /// asked to stop and aborted after the grace period. Returns true if this
    /// call raised the flag.
    pub async fn cancel(&self) -> bool {
        let first = {
            let claimed = lock(&self.inner.post_hook_claimed);
            if *claimed || self.status() == TaskStatus::Finished {
                return false;
            }
            let _ = self.inner.clock.cancelled_at.set(Instant::now());
            let first = !self.inner.token.is_cancelled();
            self.inner.token.cancel();
            first
        };

        if self
            .inner
            .status
            .compare_exchange(PENDING, FINISHED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.inner.finish(TaskOutcome::Cancelled).await;
        }
        first
    }

    /// Wait until the post-hook has completed
    pub async fn wait(&self) {
        self.inner.finished.cancelled().await
    }

    /// Wait for completion at most `timeout`; returns false on timeout
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    /// Current status
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.inner.status.load(Ordering::SeqCst))
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Whether the post-hook has completed
    pub fn is_finished(&self) -> bool {
        self.inner.finished.is_cancelled()
    }

    /// Task name used in logs
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The body, for supervisors that need to inspect its state
    pub fn body(&self) -> &Arc<B> {
        &self.inner.body
    }

    /// Failure caught from the body, if any
    pub fn last_failure(&self) -> Option<TaskFailure> {
        lock(&self.inner.failure).clone()
    }

    /// Time since the body started
    pub fn running_for(&self) -> Option<Duration> {
        self.inner.clock.started_at.get().map(Instant::elapsed)
    }

    /// Time since the last progress report, or since start if there was none
    pub fn since_last_progress(&self) -> Option<Duration> {
        let last = *lock(&self.inner.clock.last_progress);
        last.or_else(|| self.inner.clock.started_at.get().copied())
            .map(|at| at.elapsed())
    }

    /// Whether the task can be trusted to still make progress
    ///
    /// False once the task finished, has no background work, ran past its
    /// maximum execution time, or was cancelled longer ago than the stale
    /// threshold.
    pub fn is_really_working(&self) -> bool {
        if self.status() == TaskStatus::Finished || !self.inner.body.needs_background_work() {
            return false;
        }
        if self
            .running_for()
            .is_some_and(|elapsed| elapsed > self.inner.limits.max_execution_time)
        {
            return false;
        }
        if self
            .inner
            .clock
            .cancelled_at
            .get()
            .is_some_and(|at| at.elapsed() > self.inner.limits.stale_threshold)
        {
            return false;
        }
        true
    }
}

impl<B: TaskBody> Inner<B> {
    async fn drive(self: Arc<Self>, params: B::Params) {
        if self.token.is_cancelled() {
            self.finish(TaskOutcome::Cancelled).await;
            return;
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let context = TaskContext {
            token: self.token.clone(),
            progress_tx,
            clock: Arc::clone(&self.clock),
        };
        let body = Arc::clone(&self.body);
        let mut handle = tokio::spawn(async move { body.run(params, context).await });

        let outcome = loop {
            tokio::select! {
                biased;

                Some(progress) = progress_rx.recv() => {
                    if !self.token.is_cancelled() {
                        self.body.on_progress(progress).await;
                    }
                }
                joined = &mut handle => break self.outcome_of(joined),
                _ = self.token.cancelled() => {
                    if tokio::time::timeout(self.limits.cancel_grace, &mut handle).await.is_err() {
                        handle.abort();
                        tracing::warn!(
                            task = %self.name,
                            grace = ?self.limits.cancel_grace,
                            "Task ignored cancellation, aborted"
                        );
                    }
                    break TaskOutcome::Cancelled;
                }
            }
        };

        self.finish(outcome).await;
    }

    fn outcome_of(
        &self,
        joined: std::result::Result<Result<B::Output>, JoinError>,
    ) -> TaskOutcome<B::Output> {
        if self.token.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        match joined {
            Ok(Ok(output)) => TaskOutcome::Success(output),
            Ok(Err(error)) => self.record_failure(TaskFailure::from_error(&error)),
            Err(join_error) if join_error.is_panic() => {
                self.record_failure(TaskFailure::from_panic(join_error.into_panic()))
            }
            Err(_) => TaskOutcome::Cancelled,
        }
    }

    fn record_failure(&self, failure: TaskFailure) -> TaskOutcome<B::Output> {
        tracing::error!(
            task = %self.name,
            kind = ?failure.kind,
            error = %failure.message,
            "Task body failed"
        );
        *lock(&self.failure) = Some(failure.clone());
        TaskOutcome::Failure(failure)
    }

    async fn finish(&self, outcome: TaskOutcome<B::Output>) {
        let outcome = {
            let mut claimed = lock(&self.post_hook_claimed);
            if *claimed {
                return;
            }
            *claimed = true;
            self.status.store(FINISHED, Ordering::SeqCst);
            // A cancel that won the race against settling still wins
            if self.token.is_cancelled() {
                TaskOutcome::Cancelled
            } else {
                outcome
            }
        };
        self.body.on_finish(outcome).await;
        self.finished.cancel();
    }
}
