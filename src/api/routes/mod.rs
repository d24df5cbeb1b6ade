//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`commands`] - Submitting, listing, cancelling and relaunching commands
//! - [`queue`] - Partition statistics and dumps
//! - [`system`] - Health, events, shutdown

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandType, TimelineDescriptor};
use crate::types::{AccountName, QueueType};

mod commands;
mod queue;
mod system;

pub use commands::*;
pub use queue::*;
pub use system::*;

/// Request body for POST /commands
#[derive(Debug, Deserialize, Serialize)]
pub struct NewCommandRequest {
    /// Command type, e.g. `"get_timeline"`
    pub command_type: CommandType,
    /// Account to act for; required for everything but `delete_command`
    #[serde(default)]
    pub account: Option<String>,
    /// Timeline target; omitted means none
    #[serde(default)]
    pub timeline: Option<TimelineDescriptor>,
    /// Target note, download row or (for `delete_command`) command id
    #[serde(default)]
    pub item_id: i64,
    /// Launched while the user was looking
    #[serde(default)]
    pub in_foreground: bool,
    /// Launched explicitly by the user
    #[serde(default)]
    pub manually_launched: bool,
}

impl NewCommandRequest {
    /// Build the command, or explain why the request does not describe one
    pub fn into_command(self) -> Result<Command, String> {
        let account = self.account.unwrap_or_default();
        match self.command_type {
            CommandType::DeleteCommand if self.item_id == 0 => {
                return Err("delete_command needs the target command id in item_id".into());
            }
            CommandType::DeleteCommand => {}
            other if account.trim().is_empty() => {
                return Err(format!("{} needs an account", other.code()));
            }
            _ => {}
        }

        Ok(Command::new(
            self.command_type,
            AccountName::new(account),
            self.timeline.unwrap_or_else(TimelineDescriptor::none),
        )
        .with_item(self.item_id)
        .in_foreground(self.in_foreground)
        .manually_launched(self.manually_launched))
    }
}

/// Query parameters for GET /commands
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ListCommandsQuery {
    /// Only commands in this partition
    pub queue: Option<QueueType>,
}

/// One entry of GET /commands
#[derive(Debug, Serialize)]
pub struct CommandEntry {
    /// Partition holding the command
    pub queue: QueueType,
    /// Human-readable description
    pub description: String,
    /// One-line outcome summary
    pub status: String,
    /// The command itself
    #[serde(flatten)]
    pub command: Command,
}

impl CommandEntry {
    fn new(queue: QueueType, command: Command) -> Self {
        Self {
            queue,
            description: command.description(),
            status: command.result.status_line(),
            command,
        }
    }
}

/// Response body of POST /commands
#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitResponse {
    /// Id assigned to the submitted command
    pub id: i64,
    /// False when an equal command was already scheduled
    pub accepted: bool,
}
