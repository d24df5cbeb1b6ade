//! Core types for command-scheduler

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::command::{CommandResult, CommandType};

/// Highest id handed out (or observed on reload) in this process
static LAST_COMMAND_ID: AtomicI64 = AtomicI64::new(0);

/// Unique identifier for a command
///
/// Ids are derived from the creation time in milliseconds and are strictly
/// increasing within a process, so a lower id always means an older command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub i64);

impl CommandId {
    /// Allocate the next id
    pub fn next() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = LAST_COMMAND_ID
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(last.saturating_add(1).max(now))
            })
            .unwrap_or_else(|last| last);
        Self(previous.saturating_add(1).max(now))
    }

    /// Make sure ids allocated from now on are greater than `id`
    ///
    /// Called for every command reloaded from storage.
    pub(crate) fn observe(id: CommandId) {
        LAST_COMMAND_ID.fetch_max(id.0, Ordering::SeqCst);
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for CommandId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CommandId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for CommandId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for CommandId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for CommandId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Account a command acts on behalf of, e.g. `alice@mastodon.social`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountName(pub String);

impl AccountName {
    /// Create an account name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name used for commands that are not tied to any account
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// True for [`AccountName::empty`]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for AccountName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named queue partition. A command sits in exactly one of these at any time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    /// Submitted before the persisted queues were loaded
    PreAdmission,
    /// Main queue of the general accessor
    Current,
    /// Main queue of the downloads accessor
    Downloads,
    /// Temporarily ineligible (connectivity, foreground)
    Skipped,
    /// Soft-failed, cooling down
    Retry,
    /// Hard-failed or out of retries
    Error,
    /// Currently owned by a worker
    Executing,
}

impl QueueType {
    /// All partitions, in dump order
    pub const ALL: [QueueType; 7] = [
        QueueType::PreAdmission,
        QueueType::Current,
        QueueType::Downloads,
        QueueType::Skipped,
        QueueType::Retry,
        QueueType::Error,
        QueueType::Executing,
    ];

    /// Position in [`QueueType::ALL`]
    pub fn index(&self) -> usize {
        match self {
            QueueType::PreAdmission => 0,
            QueueType::Current => 1,
            QueueType::Downloads => 2,
            QueueType::Skipped => 3,
            QueueType::Retry => 4,
            QueueType::Error => 5,
            QueueType::Executing => 6,
        }
    }

    /// Convert integer code from the database to QueueType
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(QueueType::PreAdmission),
            1 => Some(QueueType::Current),
            2 => Some(QueueType::Downloads),
            3 => Some(QueueType::Skipped),
            4 => Some(QueueType::Retry),
            5 => Some(QueueType::Error),
            6 => Some(QueueType::Executing),
            _ => None,
        }
    }

    /// Convert QueueType to its integer database code
    pub fn to_i32(&self) -> i32 {
        self.index() as i32
    }

    /// Short lowercase name used in logs and dumps
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::PreAdmission => "pre",
            QueueType::Current => "current",
            QueueType::Downloads => "downloads",
            QueueType::Skipped => "skipped",
            QueueType::Retry => "retry",
            QueueType::Error => "error",
            QueueType::Executing => "executing",
        }
    }
}

impl std::fmt::Display for QueueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Independent partitioning of the queue system with its own worker budget
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessorType {
    /// Sync, posting and everything that is not a media fetch
    General,
    /// Avatar and attachment downloads
    Downloads,
}

impl AccessorType {
    /// Both accessors
    pub const ALL: [AccessorType; 2] = [AccessorType::General, AccessorType::Downloads];

    /// The partition this accessor drains
    pub fn main_queue(&self) -> QueueType {
        match self {
            AccessorType::General => QueueType::Current,
            AccessorType::Downloads => QueueType::Downloads,
        }
    }
}

impl std::fmt::Display for AccessorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessorType::General => f.write_str("general"),
            AccessorType::Downloads => f.write_str("downloads"),
        }
    }
}

/// Short, serializable description of a command carried by events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSummary {
    /// Command ID
    pub id: CommandId,
    /// Command type
    pub command_type: CommandType,
    /// Account the command acts for
    pub account: AccountName,
    /// Human-readable target description
    pub description: String,
    /// Whether the command was launched from the foreground
    pub in_foreground: bool,
    /// Whether the command was launched manually by the user
    pub manually_launched: bool,
}

/// Event emitted on every state transition of a command or a worker pool
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Command admitted into a main queue (or pre-admission)
    Admitted {
        /// Command
        command: CommandSummary,
        /// Partition it landed in
        queue: QueueType,
    },

    /// Command admitted but parked because it is not eligible right now
    Skipped {
        /// Command
        command: CommandSummary,
    },

    /// A worker is about to execute the command
    BeforeExecute {
        /// Command
        command: CommandSummary,
        /// Result snapshot before the run
        result: CommandResult,
    },

    /// Progress reported by a strategy
    Progress {
        /// Command
        command: CommandSummary,
        /// Free-text progress
        progress: String,
    },

    /// A worker finished executing the command
    AfterExecute {
        /// Command
        command: CommandSummary,
        /// Result snapshot after the run
        result: CommandResult,
        /// Partition the command was filed into (None when it completed)
        routed_to: Option<QueueType>,
    },

    /// Command cancelled by the user
    Cancelled {
        /// Command ID
        id: CommandId,
    },

    /// Command deleted from the queues
    Deleted {
        /// Command ID
        id: CommandId,
    },

    /// A worker pool was stopped
    PoolStopped {
        /// Which accessor's pool
        accessor: AccessorType,
        /// Whether in-flight workers were cancelled
        forced: bool,
        /// Workers still finishing their current command
        still_running: usize,
    },

    /// Scheduler shutting down
    Shutdown,
}

/// Point-in-time sizes of all partitions and pools
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Commands submitted before load
    pub pre_admission: usize,
    /// General main queue
    pub current: usize,
    /// Downloads main queue
    pub downloads: usize,
    /// Temporarily ineligible
    pub skipped: usize,
    /// Cooling down after a soft error
    pub retry: usize,
    /// Hard-failed or out of retries
    pub error: usize,
    /// Owned by a worker right now
    pub executing: usize,
    /// Live workers in the general pool
    pub general_workers: usize,
    /// Live workers in the downloads pool
    pub download_workers: usize,
}

impl QueueStats {
    /// Size of one partition
    pub fn count(&self, queue: QueueType) -> usize {
        match queue {
            QueueType::PreAdmission => self.pre_admission,
            QueueType::Current => self.current,
            QueueType::Downloads => self.downloads,
            QueueType::Skipped => self.skipped,
            QueueType::Retry => self.retry,
            QueueType::Error => self.error,
            QueueType::Executing => self.executing,
        }
    }

    pub(crate) fn set_count(&mut self, queue: QueueType, count: usize) {
        match queue {
            QueueType::PreAdmission => self.pre_admission = count,
            QueueType::Current => self.current = count,
            QueueType::Downloads => self.downloads = count,
            QueueType::Skipped => self.skipped = count,
            QueueType::Retry => self.retry = count,
            QueueType::Error => self.error = count,
            QueueType::Executing => self.executing = count,
        }
    }

    /// Commands in any partition
    pub fn total(&self) -> usize {
        QueueType::ALL.iter().map(|q| self.count(*q)).sum()
    }
}
