//! Classification of task body failures

use serde::{Deserialize, Serialize};

use crate::error::{DatabaseError, Error};

/// Coarse class of a failure caught at the task boundary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The storage layer could not read or write the disk
    StorageDiskIo,
    /// The database was locked or busy
    StorageLocked,
    /// An assertion in the body failed
    Assertion,
    /// Anything else
    Generic,
}

/// A failure caught at the task boundary, kept for later surfacing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Classification
    pub kind: FailureKind,
    /// Error or panic message
    pub message: String,
}

impl TaskFailure {
    /// Classify an error returned by a task body
    pub fn from_error(error: &Error) -> Self {
        let message = error.to_string();
        let kind = match error {
            Error::Sqlx(_) | Error::Database(DatabaseError::QueryFailed(_)) => {
                if is_locked_message(&message) {
                    FailureKind::StorageLocked
                } else {
                    FailureKind::StorageDiskIo
                }
            }
            Error::Database(_) | Error::Io(_) => FailureKind::StorageDiskIo,
            _ => FailureKind::Generic,
        };
        Self { kind, message }
    }

    /// Classify the payload of a panicked body
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "task panicked".to_string()
        };
        let kind = if message.contains("assert") {
            FailureKind::Assertion
        } else {
            FailureKind::Generic
        };
        Self { kind, message }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

pub(crate) fn is_locked_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("database is locked") || lower.contains("busy")
}
