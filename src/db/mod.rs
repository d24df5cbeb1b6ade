//! Database layer for command-scheduler
//!
//! Handles SQLite persistence of the queue set and of runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`commands`] - Queue set load and replace-all flush
//! - [`state`] - Runtime state (shutdown tracking)

use sqlx::{FromRow, sqlite::SqlitePool};
use std::collections::BTreeMap;

use crate::command::{
    Command, CommandResult, CommandTimeline, CommandType, NotificationEvent, TimelineDescriptor,
    TimelineKind,
};
use crate::error::DatabaseError;
use crate::types::{AccountName, CommandId, QueueType};
use crate::{Error, Result};

mod commands;
mod migrations;
mod state;

/// One persisted command, as stored in the `commands` table
///
/// Rows are keyed by the command id, which is stable across restarts.
#[derive(Debug, Clone, FromRow)]
pub struct CommandRow {
    /// Command ID
    pub command_id: i64,
    /// Partition code (see [`QueueType::to_i32`])
    pub queue_type: i32,
    /// Command type code (see [`CommandType::code`])
    pub command_type: String,
    /// Account name
    pub account: String,
    /// Timeline kind code
    pub timeline_kind: String,
    /// Actor of the timeline
    pub actor_id: i64,
    /// Origin of the timeline
    pub origin: Option<String>,
    /// Query of a search timeline
    pub search_query: Option<String>,
    /// Target item
    pub item_id: i64,
    /// Creation time (ms)
    pub created_at: i64,
    /// Launched from the foreground
    pub in_foreground: bool,
    /// Launched manually
    pub manually_launched: bool,
    /// Launched at least once
    pub executed: bool,
    /// Launches so far
    pub execution_count: i64,
    /// Remaining launches
    pub retries_left: i64,
    /// Last launch (ms, 0 = never)
    pub last_executed_at: i64,
    /// Back-off deadline (ms)
    pub delayed_till: Option<i64>,
    /// Auth failures of the last run
    pub auth_errors: i64,
    /// I/O failures of the last run
    pub io_errors: i64,
    /// Parse failures of the last run
    pub parse_errors: i64,
    /// Items downloaded by the last run
    pub downloaded_count: i64,
    /// New items of the last run
    pub new_count: i64,
    /// Last message
    pub message: String,
    /// Notification counters as a JSON object
    pub notifications_json: String,
    /// Cancelled by the user
    pub cancelled: bool,
}

impl CommandRow {
    /// Flatten a command for storage
    pub fn from_command(queue: QueueType, command: &Command) -> Result<Self> {
        let timeline = command.timeline.descriptor();
        let result = &command.result;
        Ok(Self {
            command_id: command.id.get(),
            queue_type: queue.to_i32(),
            command_type: command.command_type.code().to_string(),
            account: command.account.as_str().to_string(),
            timeline_kind: timeline.kind.code().to_string(),
            actor_id: timeline.actor_id,
            origin: timeline.origin.clone(),
            search_query: timeline.search_query.clone(),
            item_id: command.item_id,
            created_at: command.created_at,
            in_foreground: command.in_foreground,
            manually_launched: command.manually_launched,
            executed: result.executed,
            execution_count: i64::from(result.execution_count),
            retries_left: i64::from(result.retries_left),
            last_executed_at: result.last_executed_at,
            delayed_till: result.delayed_till,
            auth_errors: i64::from(result.auth_errors),
            io_errors: i64::from(result.io_errors),
            parse_errors: i64::from(result.parse_errors),
            downloaded_count: i64::from(result.downloaded_count),
            new_count: i64::from(result.new_count),
            message: result.message.clone(),
            notifications_json: serde_json::to_string(&result.notifications)?,
            cancelled: result.cancelled,
        })
    }

    /// Rebuild the command and the partition it was stored in
    pub fn into_command(self) -> Result<(QueueType, Command)> {
        let corrupt = |what: &str| {
            Error::Database(DatabaseError::CorruptRow(format!(
                "command {}: {}",
                self.command_id, what
            )))
        };

        let queue = QueueType::from_i32(self.queue_type)
            .ok_or_else(|| corrupt(&format!("unknown queue type {}", self.queue_type)))?;
        let command_type = CommandType::from_code(&self.command_type)
            .ok_or_else(|| corrupt(&format!("unknown command type {:?}", self.command_type)))?;
        let kind = TimelineKind::from_code(&self.timeline_kind)
            .ok_or_else(|| corrupt(&format!("unknown timeline kind {:?}", self.timeline_kind)))?;
        let notifications: BTreeMap<NotificationEvent, u32> =
            serde_json::from_str(&self.notifications_json)
                .map_err(|e| corrupt(&format!("bad notifications: {e}")))?;

        let result = CommandResult {
            executed: self.executed,
            execution_count: to_u32(self.execution_count),
            retries_left: to_u32(self.retries_left),
            last_executed_at: self.last_executed_at,
            delayed_till: self.delayed_till,
            auth_errors: to_u32(self.auth_errors),
            io_errors: to_u32(self.io_errors),
            parse_errors: to_u32(self.parse_errors),
            downloaded_count: to_u32(self.downloaded_count),
            new_count: to_u32(self.new_count),
            message: self.message,
            progress: String::new(),
            notifications,
            cancelled: self.cancelled,
        };

        let command = Command {
            id: CommandId(self.command_id),
            command_type,
            account: AccountName(self.account),
            timeline: CommandTimeline::new(TimelineDescriptor {
                kind,
                actor_id: self.actor_id,
                origin: self.origin,
                search_query: self.search_query,
            }),
            item_id: self.item_id,
            created_at: self.created_at,
            in_foreground: self.in_foreground,
            manually_launched: self.manually_launched,
            result,
        };
        Ok((queue, command))
    }
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Database handle for command-scheduler
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
