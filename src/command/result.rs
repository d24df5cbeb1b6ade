//! Mutable outcome and retry bookkeeping of a command

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ErrorClass, ExecutionError};

/// Notification events a strategy can count while executing
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    /// Someone mentioned the account
    Mention,
    /// Someone announced one of the account's notes
    Announce,
    /// Someone liked one of the account's notes
    Like,
    /// Someone started following the account
    Follower,
    /// A private note arrived
    PrivateNote,
    /// Something is still waiting in the outbox
    Outbox,
}

/// Outcome of the executions of one command
///
/// Only the worker that owns the command (while it sits in Executing) and the
/// admission logic (on manual relaunch) mutate this.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Whether the command was launched at least once
    pub executed: bool,
    /// Number of launches so far
    pub execution_count: u32,
    /// Launches the command may still spend
    pub retries_left: u32,
    /// Time of the last launch in ms since the epoch (0 = never)
    pub last_executed_at: i64,
    /// The command must not run before this time (ms since the epoch)
    pub delayed_till: Option<i64>,
    /// Auth failures of the last run
    pub auth_errors: u32,
    /// I/O failures of the last run
    pub io_errors: u32,
    /// Parse failures of the last run
    pub parse_errors: u32,
    /// Items downloaded by the last run
    pub downloaded_count: u32,
    /// New items found by the last run
    pub new_count: u32,
    /// Error or status message of the last run
    pub message: String,
    /// Free-text progress of the current run
    pub progress: String,
    /// Notification counters collected by the last run
    pub notifications: BTreeMap<NotificationEvent, u32>,
    /// Set when the command was cancelled by the user
    pub cancelled: bool,
}

impl CommandResult {
    /// Fresh result with the given retry budget
    pub fn new(retries_left: u32) -> Self {
        Self {
            retries_left,
            ..Default::default()
        }
    }

    /// Reset per-run state before a launch and spend one retry
    pub fn prepare_for_launch(&mut self, now_ms: i64) {
        self.executed = true;
        self.execution_count += 1;
        if self.retries_left > 0 {
            self.retries_left -= 1;
        }
        self.auth_errors = 0;
        self.io_errors = 0;
        self.parse_errors = 0;
        self.downloaded_count = 0;
        self.new_count = 0;
        self.message.clear();
        self.progress.clear();
        self.notifications.clear();
        self.delayed_till = None;
        self.last_executed_at = now_ms;
    }

    /// Record a failed execution
    pub fn apply_error(&mut self, error: &ExecutionError, now_ms: i64) {
        match error {
            ExecutionError::Auth(_) => self.auth_errors += 1,
            ExecutionError::Parse(_) => self.parse_errors += 1,
            ExecutionError::Io(_) | ExecutionError::Stale { .. } => self.io_errors += 1,
            ExecutionError::Throttled { retry_after, .. } => {
                self.io_errors += 1;
                let retry_after_ms = i64::try_from(retry_after.as_millis()).unwrap_or(i64::MAX);
                let till = now_ms.saturating_add(retry_after_ms);
                self.delay_till(till);
            }
        }
        self.message = error.to_string();
    }

    /// Push `delayed_till` to at least `till`
    pub fn delay_till(&mut self, till: i64) {
        self.delayed_till = Some(self.delayed_till.map_or(till, |current| current.max(till)));
    }

    /// True while a back-off forbids running at `now_ms`
    pub fn is_delayed(&self, now_ms: i64) -> bool {
        self.delayed_till.is_some_and(|till| till > now_ms)
    }

    /// Any error recorded by the last run
    pub fn has_error(&self) -> bool {
        self.has_hard_error() || self.has_soft_error()
    }

    /// Auth or parse failure: never retried automatically
    pub fn has_hard_error(&self) -> bool {
        self.auth_errors > 0 || self.parse_errors > 0
    }

    /// I/O failure: retryable
    pub fn has_soft_error(&self) -> bool {
        self.io_errors > 0
    }

    /// Class of the last run's error, hard winning over soft
    pub fn error_class(&self) -> Option<ErrorClass> {
        if self.has_hard_error() {
            Some(ErrorClass::Hard)
        } else if self.has_soft_error() {
            Some(ErrorClass::Soft)
        } else {
            None
        }
    }

    /// Executed with a soft error and budget remaining
    pub fn should_retry(&self) -> bool {
        self.executed && self.has_error() && !self.has_hard_error() && self.retries_left > 0
    }

    /// Refill the budget and lift any back-off (manual relaunch)
    ///
    /// Execution count and error counters are kept so the history stays visible.
    pub fn reset_retries(&mut self, budget: u32) {
        self.retries_left = budget;
        self.delayed_till = None;
        self.cancelled = false;
    }

    /// Bump a notification counter
    pub fn on_notification(&mut self, event: NotificationEvent, count: u32) {
        *self.notifications.entry(event).or_insert(0) += count;
    }

    /// Mark as cancelled by the user
    pub fn set_cancelled(&mut self) {
        self.cancelled = true;
        self.message = "cancelled".to_string();
    }

    /// One-line status for dumps and logs
    pub fn status_line(&self) -> String {
        let mut parts = Vec::new();
        if self.executed {
            parts.push(format!("runs:{}", self.execution_count));
        }
        parts.push(format!("left:{}", self.retries_left));
        if self.auth_errors > 0 {
            parts.push(format!("auth:{}", self.auth_errors));
        }
        if self.io_errors > 0 {
            parts.push(format!("io:{}", self.io_errors));
        }
        if self.parse_errors > 0 {
            parts.push(format!("parse:{}", self.parse_errors));
        }
        if self.new_count > 0 {
            parts.push(format!("new:{}", self.new_count));
        }
        if self.downloaded_count > 0 {
            parts.push(format!("downloaded:{}", self.downloaded_count));
        }
        if self.cancelled {
            parts.push("cancelled".to_string());
        }
        if !self.message.is_empty() {
            parts.push(format!("\"{}\"", self.message));
        }
        parts.join(" ")
    }
}
