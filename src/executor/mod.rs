//! Bounded worker pools, one per accessor
//!
//! [`QueueExecutors`] is the supervisor of one pool. On every
//! [`ensure_executors_started`](QueueExecutors::ensure_executors_started) it:
//! 1. Reaps workers that finished or have no more background work
//! 2. Cancels and evicts stalled workers (over the time limit, cancelled long
//!    ago, or silent for longer than the stale threshold)
//! 3. Starts new workers up to the accessor's cap, but never more than there
//!    are runnable commands
//!
//! Each worker is an [`AsyncTask`] running a [`QueueExecutor`] body.

mod worker;

pub use worker::{QueueExecutor, StopReason};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};

use crate::command::TimelineResolver;
use crate::config::Config;
use crate::device::DeviceState;
use crate::queue::QueueAccessor;
use crate::strategy::StrategyRegistry;
use crate::task::{AsyncTask, TaskBody, TaskLimits, TaskStatus};
use crate::types::{AccessorType, CommandId, Event};

/// Process-wide worker id counter
static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// What every worker needs besides its accessor
pub struct WorkerEnv {
    /// Command type → strategy
    pub registry: Arc<StrategyRegistry>,
    /// Timeline lookup
    pub resolver: Arc<dyn TimelineResolver>,
    /// Connectivity and preferences
    pub device: Arc<dyn DeviceState>,
    /// Configuration
    pub config: Arc<Config>,
    /// Event broadcast sender
    pub event_tx: broadcast::Sender<Event>,
}

impl WorkerEnv {
    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Snapshot of one worker for diagnostics
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct WorkerInfo {
    /// Worker id
    pub worker_id: u64,
    /// Task status
    pub status: TaskStatus,
    /// Commands executed so far
    pub executed: usize,
    /// Command being executed, if any
    pub current: Option<String>,
    /// How long the current command has been running, in ms
    pub current_for_ms: Option<u64>,
}

/// Supervisor of one accessor's worker pool
pub struct QueueExecutors {
    accessor: Arc<QueueAccessor>,
    env: Arc<WorkerEnv>,
    cap: usize,
    workers: Mutex<Vec<AsyncTask<QueueExecutor>>>,
    stopped: AtomicBool,
}

impl QueueExecutors {
    /// Pool of at most `cap` workers draining `accessor`
    pub fn new(accessor: Arc<QueueAccessor>, env: Arc<WorkerEnv>, cap: usize) -> Self {
        Self {
            accessor,
            env,
            cap,
            workers: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Which accessor this pool serves
    pub fn accessor_type(&self) -> AccessorType {
        self.accessor.accessor_type()
    }

    /// Maximum number of concurrent workers
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Whether [`stop`](Self::stop) was called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Reap, evict stalled workers and start new ones as needed
    ///
    /// Returns the number of workers started. Does nothing once stopped.
    pub async fn ensure_executors_started(&self) -> usize {
        if self.is_stopped() {
            return 0;
        }
        let mut workers = self.workers.lock().await;

        workers.retain(|task| {
            task.status() != TaskStatus::Finished && task.body().needs_background_work()
        });

        let stale_threshold = self.env.config.scheduler.stale_progress_threshold;
        let mut stalled = Vec::new();
        workers.retain(|task| {
            let silent = task
                .since_last_progress()
                .is_some_and(|elapsed| elapsed > stale_threshold);
            if task.is_really_working() && !silent {
                return true;
            }
            stalled.push(task.clone());
            false
        });
        for task in stalled {
            tracing::warn!(
                accessor = %self.accessor_type(),
                worker = task.body().worker_id(),
                running_for = ?task.running_for(),
                since_last_progress = ?task.since_last_progress(),
                "Worker stalled, cancelling"
            );
            task.body().mark_replaced();
            task.cancel().await;
        }

        if self.is_stopped() {
            return 0;
        }
        let free = self.cap.saturating_sub(workers.len());
        if free == 0 {
            return 0;
        }
        let wanted = free.min(self.accessor.count_to_execute().await);

        let mut started = 0;
        for _ in 0..wanted {
            let worker_id = NEXT_WORKER_ID.fetch_add(1, Ordering::SeqCst);
            let task = AsyncTask::new(
                format!("{}-worker-{}", self.accessor_type(), worker_id),
                QueueExecutor::new(worker_id, self.accessor.clone(), self.env.clone()),
                TaskLimits::from_config(&self.env.config.scheduler),
            );
            match task.execute(()).await {
                Ok(()) => {
                    workers.push(task);
                    started += 1;
                }
                Err(e) => {
                    tracing::error!(
                        accessor = %self.accessor_type(),
                        worker = worker_id,
                        error = %e,
                        "Failed to start worker"
                    );
                }
            }
        }

        if started > 0 {
            tracing::debug!(
                accessor = %self.accessor_type(),
                started,
                running = workers.len(),
                "Workers started"
            );
        }
        started
    }

    /// Stop the pool
    ///
    /// Graceful (`force == false`): workers finish their current command and
    /// exit. Forced: in-flight workers are cancelled; their commands are filed
    /// as stale. Returns the number of workers still finishing.
    pub async fn stop(&self, force: bool) -> usize {
        self.stopped.store(true, Ordering::SeqCst);
        let workers = self.workers.lock().await;
        for task in workers.iter() {
            task.body().request_stop();
            if force {
                task.cancel().await;
            }
        }
        let still_running = workers.iter().filter(|t| !t.is_finished()).count();

        tracing::info!(
            accessor = %self.accessor_type(),
            forced = force,
            still_running,
            "Worker pool stopped"
        );
        self.env.emit(Event::PoolStopped {
            accessor: self.accessor_type(),
            forced: force,
            still_running,
        });
        still_running
    }

    /// Wait until every worker finished; returns false on timeout
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let tasks: Vec<_> = self.workers.lock().await.clone();
        let all = futures::future::join_all(tasks.iter().map(|t| t.wait()));
        tokio::time::timeout(timeout, all).await.is_ok()
    }

    /// Workers not finished yet
    pub async fn running(&self) -> usize {
        self.workers
            .lock()
            .await
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }

    /// Cancel the in-flight command `id` if a worker of this pool runs it
    pub async fn cancel_command(&self, id: CommandId) -> bool {
        self.workers
            .lock()
            .await
            .iter()
            .any(|t| t.body().cancel_command(id))
    }

    /// Snapshot of every live worker
    pub async fn workers(&self) -> Vec<WorkerInfo> {
        self.workers
            .lock()
            .await
            .iter()
            .filter(|t| !t.is_finished())
            .map(|t| {
                let current = t.body().current();
                WorkerInfo {
                    worker_id: t.body().worker_id(),
                    status: t.status(),
                    executed: t.body().executed(),
                    current: current.as_ref().map(|(_, description, _)| description.clone()),
                    current_for_ms: current
                        .map(|(_, _, elapsed)| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
                }
            })
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
