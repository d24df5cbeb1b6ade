//! The execution contract between the scheduler and protocol clients

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::command::{Command, NotificationEvent, Timeline};
use crate::error::ExecutionError;
use crate::task::TaskContext;
use crate::types::CommandSummary;

/// Progress published by a running command
#[derive(Clone, Debug)]
pub struct ProgressReport {
    /// The command that reported it
    pub command: CommandSummary,
    /// Free-text progress
    pub progress: String,
}

/// Performs the effect of one command type
///
/// Implementations do the network call and the local persistence for a
/// command and record what happened on `context.command.result` (counters,
/// notifications, a message). A returned [`ExecutionError`] decides where the
/// command is filed: soft errors are retried, hard ones are not.
///
/// Strategies should await cancellable I/O only. The worker races every call
/// against cancellation and files a cancelled run as a soft
/// [`ExecutionError::Stale`].
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use command_scheduler::error::ExecutionError;
/// use command_scheduler::strategy::{CommandStrategy, StrategyContext};
///
/// struct Noop;
///
/// #[async_trait]
/// impl CommandStrategy for Noop {
///     async fn execute(&self, context: &mut StrategyContext) -> Result<(), ExecutionError> {
///         context.command.result.message = "nothing to do".into();
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "noop"
///     }
/// }
/// ```
#[async_trait]
pub trait CommandStrategy: Send + Sync {
    /// Execute the command in `context`
    async fn execute(&self, context: &mut StrategyContext) -> Result<(), ExecutionError>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// Everything a strategy gets to work with for one execution
pub struct StrategyContext {
    /// The command being executed; its result is written back to the queues
    pub command: Command,
    /// The resolved timeline target
    pub timeline: Timeline,
    task: Option<TaskContext<ProgressReport>>,
    cancel: CancellationToken,
}

impl StrategyContext {
    /// Context detached from any worker, for direct invocation
    pub fn new(command: Command, timeline: Timeline) -> Self {
        Self {
            command,
            timeline,
            task: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Context wired to a running worker: progress and cancellation flow through it
    pub(crate) fn for_worker(
        command: Command,
        timeline: Timeline,
        task: TaskContext<ProgressReport>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            command,
            timeline,
            task: Some(task),
            cancel,
        }
    }

    /// Report free-text progress
    ///
    /// Stored on the result and broadcast as a progress event. Also counts as a
    /// sign of life for stall detection.
    pub fn publish_progress(&mut self, progress: impl Into<String>) {
        let progress = progress.into();
        self.command.result.progress = progress.clone();
        if let Some(task) = &self.task {
            task.publish_progress(ProgressReport {
                command: self.command.summary(),
                progress,
            });
        }
    }

    /// Count a notification-worthy event found during this run
    pub fn on_notification(&mut self, event: NotificationEvent, count: u32) {
        self.command.result.on_notification(event, count);
    }

    /// Whether the run was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token to pass to cancellable I/O
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Take the command back after the run
    pub fn into_command(self) -> Command {
        self.command
    }
}
