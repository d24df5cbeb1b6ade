//! Submitting, cancelling, relaunching and deleting commands.

use std::sync::atomic::Ordering;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::queue::Admission;
use crate::types::{CommandId, Event, QueueType};

use super::CommandScheduler;

impl CommandScheduler {
    /// Submit a command for execution
    ///
    /// Returns `Ok(true)` when the command was queued (possibly parked in
    /// Skipped until it becomes eligible) and `Ok(false)` when an equal
    /// command is already scheduled and this one was discarded. Submitting
    /// before [`start`](Self::start) holds the command in pre-admission.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) began.
    pub async fn submit(&self, command: Command) -> Result<bool> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let accessor_type = command.accessor();
        let command_id = command.id;
        let admission = self.accessor(accessor_type).admit(command).await;
        tracing::debug!(command_id = command_id.get(), ?admission, "Command submitted");

        if !admission.is_accepted() {
            return Ok(false);
        }
        self.persist().await;
        if matches!(admission, Admission::Queued(queue) if queue != QueueType::PreAdmission)
            && self.started.load(Ordering::SeqCst)
        {
            self.executors(accessor_type).ensure_executors_started().await;
        }
        Ok(true)
    }

    /// Cancel a command
    ///
    /// A waiting command is removed right away. An executing one has its
    /// run cancelled; the worker then drops it instead of filing it. Either
    /// way a [`Event::Cancelled`] is broadcast.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no partition holds the id.
    pub async fn cancel(&self, id: CommandId) -> Result<bool> {
        let executing = {
            let mut partitions = self.queues.lock().await;
            match partitions.find(id) {
                None => return Err(Error::NotFound(format!("command {}", id))),
                Some((QueueType::Executing, command)) => {
                    let accessor_type = command.accessor();
                    partitions.request_cancel(id);
                    Some(accessor_type)
                }
                Some((queue, _)) => {
                    if let Some(command) = partitions.get_mut(queue).remove(id) {
                        self.queues.mark_changed();
                        tracing::info!(
                            command_id = id.get(),
                            queue = %queue,
                            command = %command.description(),
                            "Command cancelled"
                        );
                    }
                    None
                }
            }
        };

        match executing {
            Some(accessor_type) => {
                let signalled = self.executors(accessor_type).cancel_command(id).await;
                tracing::info!(command_id = id.get(), signalled, "Cancelling executing command");
            }
            None => self.persist().await,
        }

        self.emit_event(Event::Cancelled { id });
        Ok(true)
    }

    /// Refill a command's retry budget
    ///
    /// A command sitting in Retry or Error is relaunched immediately: it goes
    /// back to its main queue without back-off, keeping its history. Returns
    /// false for an executing command.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no partition holds the id.
    pub async fn reset_retries(&self, id: CommandId) -> Result<bool> {
        let Some((_, command)) = self.queues.find(id).await else {
            return Err(Error::NotFound(format!("command {}", id)));
        };
        let accessor_type = command.accessor();
        let reset = self.accessor(accessor_type).reset_retries(id).await;
        if reset {
            tracing::info!(
                command_id = id.get(),
                command = %command.description(),
                "Retries reset"
            );
            self.persist().await;
            if self.started.load(Ordering::SeqCst) {
                self.executors(accessor_type).ensure_executors_started().await;
            }
        }
        Ok(reset)
    }

    /// Remove a command that is not executing
    ///
    /// Returns false when the command is executing right now; use
    /// [`cancel`](Self::cancel) for that.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no partition holds the id.
    pub async fn delete_command(&self, id: CommandId) -> Result<bool> {
        match self.queues.remove(id).await {
            Some((queue, command)) => {
                tracing::info!(
                    command_id = id.get(),
                    queue = %queue,
                    command = %command.description(),
                    "Command deleted"
                );
                self.emit_event(Event::Deleted { id });
                self.persist().await;
                Ok(true)
            }
            None if self.queues.find(id).await.is_some() => Ok(false),
            None => Err(Error::NotFound(format!("command {}", id))),
        }
    }

    /// Submit a [`DeleteCommand`](crate::command::CommandType::DeleteCommand)
    /// command targeting `id`
    ///
    /// The deletion happens on a worker, after commands queued ahead of it.
    pub async fn enqueue_delete(&self, id: CommandId) -> Result<bool> {
        self.submit(Command::delete_command(id)).await
    }

    /// Flush queue changes, logging failures
    ///
    /// Admission never fails because of storage: the in-memory queues are
    /// authoritative and the next flush retries.
    pub(crate) async fn persist(&self) {
        if let Err(e) = self.queues.flush_if_changed().await {
            tracing::error!(error = %e, "Failed to persist queues");
        }
    }
}
