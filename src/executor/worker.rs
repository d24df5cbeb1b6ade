//! One worker: an [`AsyncTask`](crate::task::AsyncTask) body draining its accessor's queue

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::command::{Command, TimelineKind, now_ms};
use crate::error::{ExecutionError, Result};
use crate::queue::{QueueAccessor, Routing};
use crate::strategy::{ProgressReport, StrategyContext};
use crate::task::{TaskBody, TaskContext, TaskOutcome};
use crate::types::{CommandId, Event};

use super::WorkerEnv;

/// Why a worker loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The pool asked the worker to stop
    StopRequested,
    /// The task was cancelled
    Cancelled,
    /// The worker ran past the maximum execution time
    TimeLimit,
    /// A replacement worker took over the slot
    Replaced,
    /// Nothing eligible left to run
    NoMoreWork,
}

/// The command a worker is executing right now
#[derive(Clone, Debug)]
struct InFlight {
    command: Command,
    since: Instant,
    cancel: CancellationToken,
}

/// Worker body: pops commands from one accessor and runs their strategies
///
/// The loop ends on the first of: stop requested, task cancelled, time limit
/// reached, slot taken over, nothing left to run. Nothing a strategy does
/// escapes the loop; every outcome is filed through
/// [`QueueAccessor::on_post_execute`].
pub struct QueueExecutor {
    worker_id: u64,
    accessor: Arc<QueueAccessor>,
    env: Arc<WorkerEnv>,
    stop_requested: AtomicBool,
    replaced: AtomicBool,
    done: AtomicBool,
    executed: AtomicUsize,
    current: Mutex<Option<InFlight>>,
}

impl QueueExecutor {
    pub(crate) fn new(worker_id: u64, accessor: Arc<QueueAccessor>, env: Arc<WorkerEnv>) -> Self {
        Self {
            worker_id,
            accessor,
            env,
            stop_requested: AtomicBool::new(false),
            replaced: AtomicBool::new(false),
            done: AtomicBool::new(false),
            executed: AtomicUsize::new(0),
            current: Mutex::new(None),
        }
    }

    /// Worker id, unique within the process
    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// Ask the loop to stop after the current command
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_replaced(&self) {
        self.replaced.store(true, Ordering::SeqCst);
    }

    /// Commands executed so far
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    /// Description of the command being executed and for how long
    pub fn current(&self) -> Option<(CommandId, String, Duration)> {
        self.lock_current()
            .as_ref()
            .map(|f| (f.command.id, f.command.description(), f.since.elapsed()))
    }

    /// Cancel the command with `id` if this worker is executing it
    pub fn cancel_command(&self, id: CommandId) -> bool {
        match self.lock_current().as_ref() {
            Some(in_flight) if in_flight.command.id == id => {
                in_flight.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stop_reason(&self, context: &TaskContext<ProgressReport>, started: Instant) -> Option<StopReason> {
        if self.stop_requested.load(Ordering::SeqCst) {
            Some(StopReason::StopRequested)
        } else if context.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if started.elapsed() > self.env.config.scheduler.max_execution_time {
            Some(StopReason::TimeLimit)
        } else if self.replaced.load(Ordering::SeqCst) {
            Some(StopReason::Replaced)
        } else {
            None
        }
    }

    async fn execute_one(&self, mut command: Command, context: &TaskContext<ProgressReport>) {
        self.env.emit(Event::BeforeExecute {
            command: command.summary(),
            result: command.result.clone(),
        });
        command.result.prepare_for_launch(now_ms());

        let since = Instant::now();
        let cancel = context.cancellation_token().child_token();
        *self.lock_current() = Some(InFlight {
            command: command.clone(),
            since,
            cancel: cancel.clone(),
        });
        context.publish_progress(ProgressReport {
            command: command.summary(),
            progress: format!("executing {}", command.description()),
        });

        let strategy = self.env.registry.get(command.command_type);
        tracing::debug!(
            worker = self.worker_id,
            command_id = command.id.get(),
            strategy = strategy.name(),
            "Executing command"
        );

        let timeline = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            timeline = command.timeline.resolve(self.env.resolver.as_ref(), &command.account) => Some(timeline),
        };

        let (mut command, outcome) = match timeline {
            None => (command, Err(stale(since))),
            Some(timeline) => {
                let mut strategy_context =
                    StrategyContext::for_worker(command, timeline, context.clone(), cancel.clone());
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(stale(since)),
                    outcome = strategy.execute(&mut strategy_context) => outcome,
                };
                (strategy_context.into_command(), outcome)
            }
        };

        if let Err(error) = &outcome {
            if cancel.is_cancelled() && !context.is_cancelled() {
                // Only this command was cancelled, by the user
                command.result.set_cancelled();
            } else {
                command.result.apply_error(error, now_ms());
            }
            tracing::warn!(
                worker = self.worker_id,
                command_id = command.id.get(),
                command = %command.description(),
                class = ?error.class(),
                error = %error,
                "Command failed"
            );
        }

        self.file(command).await;
    }

    /// Route an executed command, broadcast the outcome and persist
    async fn file(&self, command: Command) {
        let routing = self.accessor.on_post_execute(command.clone()).await;
        *self.lock_current() = None;
        self.executed.fetch_add(1, Ordering::SeqCst);

        self.env.emit(Event::AfterExecute {
            command: command.summary(),
            result: command.result.clone(),
            routed_to: routing.queue(),
        });
        tracing::info!(
            worker = self.worker_id,
            command_id = command.id.get(),
            command = %command.description(),
            ?routing,
            status = %command.result.status_line(),
            "Command executed"
        );

        if routing == Routing::Done {
            self.enqueue_follow_up(&command).await;
        }

        if let Err(e) = self.accessor.queues().flush_if_changed().await {
            tracing::error!(worker = self.worker_id, error = %e, "Failed to persist queues");
        }
    }

    /// Refresh the home timeline after a note was posted
    async fn enqueue_follow_up(&self, command: &Command) {
        if !command.command_type.is_posting()
            || command.account.is_empty()
            || !self.env.device.preferences().sync_after_note_sent
        {
            return;
        }
        let follow_up = Command::get_timeline(command.account.clone(), TimelineKind::Home)
            .in_foreground(command.in_foreground);
        if follow_up.accessor() != self.accessor.accessor_type() {
            return;
        }
        let admission = self.accessor.admit(follow_up).await;
        tracing::debug!(
            command_id = command.id.get(),
            ?admission,
            "Follow-up sync after posting"
        );
    }
}

fn stale(since: Instant) -> ExecutionError {
    ExecutionError::Stale {
        elapsed: since.elapsed(),
    }
}

#[async_trait]
impl TaskBody for QueueExecutor {
    type Params = ();
    type Progress = ProgressReport;
    type Output = usize;

    async fn run(&self, _params: (), context: TaskContext<ProgressReport>) -> Result<usize> {
        let started = Instant::now();
        let mut executed = 0;

        let reason = loop {
            if let Some(reason) = self.stop_reason(&context, started) {
                break reason;
            }
            let Some(command) = self.accessor.next_to_execute().await else {
                break StopReason::NoMoreWork;
            };
            self.execute_one(command, &context).await;
            executed += 1;
        };

        self.done.store(true, Ordering::SeqCst);
        tracing::debug!(
            worker = self.worker_id,
            accessor = %self.accessor.accessor_type(),
            ?reason,
            executed,
            "Worker loop ended"
        );
        Ok(executed)
    }

    async fn on_progress(&self, report: ProgressReport) {
        self.env.emit(Event::Progress {
            command: report.command,
            progress: report.progress,
        });
    }

    async fn on_finish(&self, outcome: TaskOutcome<usize>) {
        self.done.store(true, Ordering::SeqCst);

        // A body aborted mid-command never filed it; do it here so it leaves Executing
        let orphan = self.lock_current().take();
        if let Some(in_flight) = orphan {
            let mut command = in_flight.command;
            command
                .result
                .apply_error(&stale(in_flight.since), now_ms());
            tracing::warn!(
                worker = self.worker_id,
                command_id = command.id.get(),
                "Worker stopped mid-command, filing it as stale"
            );
            self.file(command).await;
        }

        match outcome {
            TaskOutcome::Success(executed) => {
                tracing::debug!(worker = self.worker_id, executed, "Worker finished");
            }
            TaskOutcome::Cancelled => {
                tracing::info!(worker = self.worker_id, "Worker cancelled");
            }
            TaskOutcome::Failure(failure) => {
                tracing::error!(
                    worker = self.worker_id,
                    kind = ?failure.kind,
                    error = %failure.message,
                    "Worker failed"
                );
            }
        }
    }

    fn needs_background_work(&self) -> bool {
        !self.done.load(Ordering::SeqCst)
    }
}
