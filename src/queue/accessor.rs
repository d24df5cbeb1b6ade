//! Admission control and scheduling policy for one accessor

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::command::{Command, now_ms};
use crate::config::Config;
use crate::device::{ConnectionState, DeviceState, Preferences};
use crate::types::{AccessorType, CommandId, Event, QueueType};

use super::{Partitions, QueueSet, admission_scope};

/// Where [`QueueAccessor::admit`] put a command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Queued in this partition (main queue, or pre-admission before load)
    Queued(QueueType),
    /// Parked in Skipped because it is not eligible right now
    Skipped,
    /// An equal command is already scheduled; this one was discarded
    Duplicate,
}

impl Admission {
    /// False only for [`Admission::Duplicate`]
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Admission::Duplicate)
    }
}

/// Where [`QueueAccessor::on_post_execute`] filed a command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Routing {
    /// Soft error with budget left; cooling down in Retry
    Retry,
    /// Hard error or out of retries
    Error,
    /// Completed; dropped from the queues
    Done,
    /// Cancelled by the user while executing; dropped
    Cancelled,
}

impl Routing {
    /// Partition the command went to, if any
    pub fn queue(&self) -> Option<QueueType> {
        match self {
            Routing::Retry => Some(QueueType::Retry),
            Routing::Error => Some(QueueType::Error),
            Routing::Done | Routing::Cancelled => None,
        }
    }
}

/// Device state sampled once per pass over a partition
struct Eligibility {
    connection: ConnectionState,
    app_in_foreground: bool,
    preferences: Preferences,
}

impl Eligibility {
    fn allows(&self, command: &Command) -> bool {
        if !command.in_foreground && self.app_in_foreground && !self.preferences.sync_while_using_app
        {
            return false;
        }
        command
            .connection_required()
            .is_satisfied_by(self.connection, &self.preferences)
    }
}

/// Decides what may run now for one accessor and moves commands between partitions
pub struct QueueAccessor {
    accessor_type: AccessorType,
    queues: Arc<QueueSet>,
    device: Arc<dyn DeviceState>,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
}

impl QueueAccessor {
    /// Create the accessor of `accessor_type` over `queues`
    pub fn new(
        accessor_type: AccessorType,
        queues: Arc<QueueSet>,
        device: Arc<dyn DeviceState>,
        config: Arc<Config>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            accessor_type,
            queues,
            device,
            config,
            event_tx,
        }
    }

    /// Which accessor this is
    pub fn accessor_type(&self) -> AccessorType {
        self.accessor_type
    }

    /// The queue set this accessor works on
    pub fn queues(&self) -> &Arc<QueueSet> {
        &self.queues
    }

    fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    fn eligibility(&self) -> Eligibility {
        Eligibility {
            connection: self.device.connection_state(),
            app_in_foreground: self.device.is_app_in_foreground(),
            preferences: self.device.preferences(),
        }
    }

    fn min_retry_period_ms(&self) -> i64 {
        duration_ms(self.config.scheduler.min_retry_period)
    }

    /// Whether `command` may run right now
    ///
    /// False when the command is background, the app is in the foreground and
    /// syncing while using the app is off, or when current connectivity does
    /// not satisfy the command's connection class. Read live on every call.
    pub fn is_eligible_now(&self, command: &Command) -> bool {
        self.eligibility().allows(command)
    }

    /// Admit a newly created command
    pub async fn admit(&self, command: Command) -> Admission {
        let mut partitions = self.queues.lock().await;
        self.admit_locked(&mut partitions, command)
    }

    /// Re-admit commands submitted before the queues were loaded
    pub async fn admit_pre_admitted(&self) -> usize {
        let mut partitions = self.queues.lock().await;
        let pending = partitions
            .get_mut(QueueType::PreAdmission)
            .take_where(|c| c.accessor() == self.accessor_type);
        if !pending.is_empty() {
            self.queues.mark_changed();
        }
        pending
            .into_iter()
            .filter(|command| {
                self.admit_locked(&mut partitions, command.clone())
                    .is_accepted()
            })
            .count()
    }

    fn admit_locked(&self, partitions: &mut Partitions, mut command: Command) -> Admission {
        if partitions.contains_equal_in(&admission_scope(self.accessor_type), &command) {
            tracing::debug!(
                command_id = command.id.get(),
                command = %command.description(),
                "Equal command already scheduled, discarding duplicate"
            );
            return Admission::Duplicate;
        }

        if !self.queues.is_loaded() {
            let summary = command.summary();
            partitions.get_mut(QueueType::PreAdmission).insert(command);
            self.queues.mark_changed();
            self.emit_event(Event::Admitted {
                command: summary,
                queue: QueueType::PreAdmission,
            });
            return Admission::Queued(QueueType::PreAdmission);
        }

        if command.manually_launched {
            command = self.take_failed_for_relaunch(partitions, command);
        }

        let main = self.accessor_type.main_queue();
        let target = if self.is_eligible_now(&command) {
            main
        } else {
            QueueType::Skipped
        };
        let summary = command.summary();
        if !partitions.get_mut(target).insert(command) {
            return Admission::Duplicate;
        }
        self.queues.mark_changed();

        tracing::debug!(
            command_id = summary.id.get(),
            command = %summary.description,
            queue = %target,
            "Command admitted"
        );
        if target == QueueType::Skipped {
            self.emit_event(Event::Skipped { command: summary });
            Admission::Skipped
        } else {
            self.emit_event(Event::Admitted {
                command: summary,
                queue: target,
            });
            Admission::Queued(target)
        }
    }

    /// A manual relaunch of a command sitting in Retry or Error revives that entry
    ///
    /// The surviving entry keeps its execution count and error history but gets a
    /// fresh retry budget and no back-off. The relaunching duplicate is dropped.
    fn take_failed_for_relaunch(&self, partitions: &mut Partitions, fresh: Command) -> Command {
        for queue in [QueueType::Retry, QueueType::Error] {
            if let Some(mut surviving) = partitions.get_mut(queue).remove_equal(&fresh) {
                surviving
                    .result
                    .reset_retries(surviving.command_type.initial_retries());
                surviving.manually_launched = true;
                surviving.in_foreground |= fresh.in_foreground;
                tracing::info!(
                    command_id = surviving.id.get(),
                    duplicate_id = fresh.id.get(),
                    from = %queue,
                    "Manual relaunch revives failed command"
                );
                return surviving;
            }
        }
        fresh
    }

    /// Pop the next command to run and move it to Executing
    ///
    /// Ineligible commands met on the way are parked in Skipped; delayed ones
    /// stay where they are. When nothing is runnable and the retry cool-down
    /// has elapsed, Retry entries are promoted first and the pop is retried.
    /// A popped command with an equal entry in Retry or Error hands over to
    /// that entry (with its history) if the entry may run again, and is
    /// discarded otherwise. A popped command equal to one already executing
    /// is discarded.
    pub async fn next_to_execute(&self) -> Option<Command> {
        let mut partitions = self.queues.lock().await;
        let now = now_ms();
        let mut promoted = false;

        loop {
            match self.pop_eligible(&mut partitions, now) {
                Some(popped) => {
                    self.queues.mark_changed();
                    if partitions.get(QueueType::Executing).contains(&popped) {
                        tracing::debug!(
                            command_id = popped.id.get(),
                            command = %popped.description(),
                            "Equal command already executing, discarding duplicate"
                        );
                        continue;
                    }
                    let Some(command) = self.merge_with_failed(&mut partitions, popped, now) else {
                        continue;
                    };
                    if !partitions.get_mut(QueueType::Executing).insert(command.clone()) {
                        continue;
                    }
                    tracing::debug!(
                        command_id = command.id.get(),
                        accessor = %self.accessor_type,
                        command = %command.description(),
                        "Command moved to executing"
                    );
                    return Some(command);
                }
                None => {
                    let period = self.config.scheduler.retry_queue_processing_period;
                    if !promoted && partitions.retry_promotion_due(self.accessor_type, period) {
                        promoted = true;
                        if self.promote_retries_locked(&mut partitions, now) > 0 {
                            continue;
                        }
                    }
                    return None;
                }
            }
        }
    }

    fn pop_eligible(&self, partitions: &mut Partitions, now: i64) -> Option<Command> {
        let main = self.accessor_type.main_queue();
        let check = self.eligibility();
        let mut parked = Vec::new();
        let mut chosen = None;

        for command in partitions.get(main).iter() {
            if !check.allows(command) {
                parked.push(command.id);
                continue;
            }
            if command.result.is_delayed(now) {
                continue;
            }
            chosen = Some(command.id);
            break;
        }

        if !parked.is_empty() {
            self.queues.mark_changed();
        }
        for id in parked {
            self.move_between(partitions, id, main, QueueType::Skipped);
        }

        chosen.and_then(|id| partitions.get_mut(main).remove(id))
    }

    fn merge_with_failed(
        &self,
        partitions: &mut Partitions,
        fresh: Command,
        now: i64,
    ) -> Option<Command> {
        for queue in [QueueType::Retry, QueueType::Error] {
            let Some(existing) = partitions.get(queue).get_equal(&fresh) else {
                continue;
            };
            let cooled_down = now.saturating_sub(existing.result.last_executed_at)
                >= self.min_retry_period_ms()
                && !existing.result.is_delayed(now);

            if !fresh.manually_launched && !cooled_down {
                tracing::debug!(
                    command_id = fresh.id.get(),
                    existing_id = existing.id.get(),
                    queue = %queue,
                    "Duplicate of a recently failed command discarded"
                );
                return None;
            }

            let mut surviving = partitions.get_mut(queue).remove_equal(&fresh)?;
            if fresh.manually_launched {
                surviving
                    .result
                    .reset_retries(surviving.command_type.initial_retries());
                surviving.manually_launched = true;
            }
            surviving.in_foreground |= fresh.in_foreground;
            tracing::info!(
                command_id = surviving.id.get(),
                duplicate_id = fresh.id.get(),
                from = %queue,
                "Running previously failed command in place of its duplicate"
            );
            return Some(surviving);
        }
        Some(fresh)
    }

    fn move_between(
        &self,
        partitions: &mut Partitions,
        id: CommandId,
        from: QueueType,
        to: QueueType,
    ) -> bool {
        let Some(command) = partitions.get_mut(from).remove(id) else {
            return false;
        };
        // An equal command already waits or runs; keep this one where it was
        if partitions.contains_equal_in(&admission_scope(self.accessor_type), &command)
            || !partitions.get_mut(to).insert(command.clone())
        {
            tracing::debug!(command_id = id.get(), %from, %to, "Equal command scheduled, move skipped");
            partitions.get_mut(from).insert(command);
            return false;
        }
        tracing::debug!(command_id = id.get(), %from, %to, "Command moved");
        true
    }

    /// Move Skipped commands of this accessor that became eligible back to the main queue
    pub async fn rehabilitate_skipped(&self) -> usize {
        let mut partitions = self.queues.lock().await;
        let check = self.eligibility();
        let ready: Vec<CommandId> = partitions
            .get(QueueType::Skipped)
            .iter()
            .filter(|c| c.accessor() == self.accessor_type && check.allows(c))
            .map(|c| c.id)
            .collect();

        let main = self.accessor_type.main_queue();
        let moved = ready
            .into_iter()
            .filter(|id| self.move_between(&mut partitions, *id, QueueType::Skipped, main))
            .count();
        if moved > 0 {
            self.queues.mark_changed();
            tracing::info!(accessor = %self.accessor_type, moved, "Skipped commands rehabilitated");
        }
        moved
    }

    /// Promote eligible, no longer delayed Retry entries of this accessor to the main queue
    pub async fn promote_retries(&self) -> usize {
        let mut partitions = self.queues.lock().await;
        self.promote_retries_locked(&mut partitions, now_ms())
    }

    /// [`promote_retries`](Self::promote_retries), but only once per retry cool-down
    pub async fn promote_retries_if_due(&self) -> usize {
        let mut partitions = self.queues.lock().await;
        let period = self.config.scheduler.retry_queue_processing_period;
        if !partitions.retry_promotion_due(self.accessor_type, period) {
            return 0;
        }
        self.promote_retries_locked(&mut partitions, now_ms())
    }

    fn promote_retries_locked(&self, partitions: &mut Partitions, now: i64) -> usize {
        partitions.mark_retry_promotion(self.accessor_type);
        let check = self.eligibility();
        let ready: Vec<CommandId> = partitions
            .get(QueueType::Retry)
            .iter()
            .filter(|c| {
                c.accessor() == self.accessor_type && check.allows(c) && !c.result.is_delayed(now)
            })
            .map(|c| c.id)
            .collect();

        let main = self.accessor_type.main_queue();
        let promoted = ready
            .into_iter()
            .filter(|id| self.move_between(partitions, *id, QueueType::Retry, main))
            .count();
        if promoted > 0 {
            self.queues.mark_changed();
            tracing::info!(accessor = %self.accessor_type, promoted, "Retry queue promoted");
        }
        promoted
    }

    /// Number of commands that could start right now
    ///
    /// Used to avoid starting more workers than there is work.
    pub async fn count_to_execute(&self) -> usize {
        let partitions = self.queues.lock().await;
        let check = self.eligibility();
        let now = now_ms();
        let runnable = |c: &&Command| check.allows(c) && !c.result.is_delayed(now);

        let main = partitions
            .get(self.accessor_type.main_queue())
            .iter()
            .filter(runnable)
            .count();
        let period = self.config.scheduler.retry_queue_processing_period;
        let retry = if partitions.retry_promotion_due(self.accessor_type, period) {
            let scope = admission_scope(self.accessor_type);
            partitions
                .get(QueueType::Retry)
                .iter()
                .filter(|c| c.accessor() == self.accessor_type)
                .filter(|c| !partitions.contains_equal_in(&scope, c))
                .filter(runnable)
                .count()
        } else {
            0
        };
        main + retry
    }

    /// File an executed command according to its result
    ///
    /// Soft errors with budget left go to Retry with a back-off, hard errors and
    /// exhausted budgets go to Error, successes are dropped. A command whose
    /// cancellation was requested while it ran is dropped as well.
    pub async fn on_post_execute(&self, mut command: Command) -> Routing {
        let mut partitions = self.queues.lock().await;
        partitions.get_mut(QueueType::Executing).remove(command.id);
        let cancel_requested = partitions.take_cancel_request(command.id);

        let routing = if cancel_requested || command.result.cancelled {
            Routing::Cancelled
        } else if command.result.should_retry() {
            let delay = crate::retry::backoff_delay(
                &self.config.retry,
                command.result.execution_count,
            );
            command
                .result
                .delay_till(now_ms().saturating_add(duration_ms(delay)));
            partitions.get_mut(QueueType::Retry).replace(command.clone());
            Routing::Retry
        } else if command.result.has_error() {
            partitions.get_mut(QueueType::Error).replace(command.clone());
            Routing::Error
        } else {
            Routing::Done
        };
        self.queues.mark_changed();

        tracing::debug!(
            command_id = command.id.get(),
            ?routing,
            retries_left = command.result.retries_left,
            "Command filed after execution"
        );
        routing
    }

    /// Refill the retry budget of a queued command of this accessor
    ///
    /// A command in Retry or Error is relaunched: it goes back to the main
    /// queue (or Skipped) without back-off, taking the place of an equal
    /// command still waiting there. While an equal command executes it stays
    /// put with its refilled budget. Returns false if the command is unknown,
    /// belongs to the other accessor, or is executing.
    pub async fn reset_retries(&self, id: CommandId) -> bool {
        let mut partitions = self.queues.lock().await;
        let Some((queue, command)) = partitions.find(id) else {
            return false;
        };
        if command.accessor() != self.accessor_type {
            return false;
        }
        let budget = command.command_type.initial_retries();

        match queue {
            QueueType::Executing => return false,
            QueueType::Retry | QueueType::Error => {
                let Some(mut command) = partitions.get_mut(queue).remove(id) else {
                    return false;
                };
                command.result.reset_retries(budget);
                command.manually_launched = true;
                if partitions.get(QueueType::Executing).contains(&command) {
                    partitions.get_mut(queue).insert(command);
                } else {
                    self.relaunch_locked(&mut partitions, command);
                }
            }
            _ => {
                partitions
                    .get_mut(queue)
                    .update_result(id, |result| result.reset_retries(budget));
            }
        }
        self.queues.mark_changed();
        tracing::info!(command_id = id.get(), from = %queue, "Retries reset");
        true
    }

    /// Put a revived command back in line, absorbing an equal command still waiting
    fn relaunch_locked(&self, partitions: &mut Partitions, mut command: Command) {
        let main = self.accessor_type.main_queue();
        for queue in [main, QueueType::Skipped] {
            if let Some(waiting) = partitions.get_mut(queue).remove_equal(&command) {
                command.in_foreground |= waiting.in_foreground;
                tracing::debug!(
                    command_id = command.id.get(),
                    duplicate_id = waiting.id.get(),
                    from = %queue,
                    "Relaunched command replaces waiting duplicate"
                );
            }
        }
        let target = if self.is_eligible_now(&command) {
            main
        } else {
            QueueType::Skipped
        };
        partitions.get_mut(target).insert(command);
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
