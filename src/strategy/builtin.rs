//! Strategies the scheduler ships with

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::traits::{CommandStrategy, StrategyContext};
use crate::error::ExecutionError;
use crate::queue::QueueSet;
use crate::types::{CommandId, Event};

/// Fallback for command types nothing was registered for
///
/// Fails with a hard parse error so the command lands in the Error queue
/// instead of being retried forever.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedStrategy;

#[async_trait]
impl CommandStrategy for UnsupportedStrategy {
    async fn execute(&self, context: &mut StrategyContext) -> Result<(), ExecutionError> {
        Err(ExecutionError::Parse(format!(
            "no strategy registered for {}",
            context.command.command_type
        )))
    }

    fn name(&self) -> &'static str {
        "unsupported"
    }
}

/// Removes the command whose id is the executing command's item id
///
/// A target that is no longer queued (it already ran, was a discarded
/// duplicate, or is executing right now) is reported as a parse error.
pub struct DeleteCommandStrategy {
    queues: Arc<QueueSet>,
    event_tx: broadcast::Sender<Event>,
}

impl DeleteCommandStrategy {
    /// Strategy deleting from `queues`
    pub fn new(queues: Arc<QueueSet>, event_tx: broadcast::Sender<Event>) -> Self {
        Self { queues, event_tx }
    }
}

#[async_trait]
impl CommandStrategy for DeleteCommandStrategy {
    async fn execute(&self, context: &mut StrategyContext) -> Result<(), ExecutionError> {
        let target = CommandId(context.command.item_id);
        match self.queues.remove(target).await {
            Some((queue, removed)) => {
                tracing::info!(
                    command_id = target.get(),
                    queue = %queue,
                    command = %removed.description(),
                    "Command deleted"
                );
                self.event_tx.send(Event::Deleted { id: target }).ok();
                context.command.result.message = format!("deleted {}", removed);
                Ok(())
            }
            None => Err(ExecutionError::Parse(format!(
                "command {} not found",
                target
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "delete-command"
    }
}
