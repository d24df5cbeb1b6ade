//! Commands: what to run, against which target, and how it went
//!
//! A [`Command`] is created by a caller, admitted into exactly one queue
//! partition at a time, and carries its [`CommandResult`] through every retry.
//! Two commands are equal when their [`CommandKey`]s match; that is the
//! de-duplication key used throughout the queues.

mod kind;
mod result;
mod timeline;

pub use kind::CommandType;
pub use result::{CommandResult, NotificationEvent};
pub use timeline::{
    CommandTimeline, DescriptorResolver, Timeline, TimelineDescriptor, TimelineKind,
    TimelineResolver,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::device::ConnectionRequired;
use crate::types::{AccessorType, AccountName, CommandId, CommandSummary};

/// Current wall-clock time in milliseconds since the epoch
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A request to perform one operation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Command {
    /// Unique, creation-time derived id
    pub id: CommandId,
    /// What to do
    pub command_type: CommandType,
    /// Account to act for
    pub account: AccountName,
    /// Timeline target
    pub timeline: CommandTimeline,
    /// Target note, activity or download row (0 if none)
    #[serde(default)]
    pub item_id: i64,
    /// Creation time in ms since the epoch
    pub created_at: i64,
    /// Launched while the user was looking
    #[serde(default)]
    pub in_foreground: bool,
    /// Launched explicitly by the user
    #[serde(default)]
    pub manually_launched: bool,
    /// Outcome bookkeeping
    pub result: CommandResult,
}

/// De-duplication identity of a command
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandKey {
    /// Command type
    pub command_type: CommandType,
    /// Account
    pub account: AccountName,
    /// Timeline identity
    pub timeline: TimelineDescriptor,
    /// Target item
    pub item_id: i64,
}

/// Position of a command in a partition
///
/// Field order is the scheduling order: foreground before background, then
/// lower priority number, then lower (older) id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey {
    /// False for foreground commands, so they sort first
    pub background: bool,
    /// Priority of the command type
    pub priority: i32,
    /// Command id
    pub id: CommandId,
}

impl Command {
    /// New background command with a fresh id and the type's retry budget
    pub fn new(
        command_type: CommandType,
        account: AccountName,
        timeline: TimelineDescriptor,
    ) -> Self {
        Self {
            id: CommandId::next(),
            command_type,
            account,
            timeline: CommandTimeline::new(timeline),
            item_id: 0,
            created_at: now_ms(),
            in_foreground: false,
            manually_launched: false,
            result: CommandResult::new(command_type.initial_retries()),
        }
    }

    /// Sync an account-wide timeline
    pub fn get_timeline(account: AccountName, kind: TimelineKind) -> Self {
        Self::new(
            CommandType::GetTimeline,
            account,
            TimelineDescriptor::of_kind(kind),
        )
    }

    /// Download an actor's avatar
    pub fn get_avatar(account: AccountName, actor_id: i64) -> Self {
        Self::new(
            CommandType::GetAvatar,
            account,
            TimelineDescriptor::for_actor(TimelineKind::Actor, actor_id),
        )
    }

    /// Download an attachment row
    pub fn get_attachment(account: AccountName, download_id: i64) -> Self {
        Self::new(CommandType::GetAttachment, account, TimelineDescriptor::none())
            .with_item(download_id)
    }

    /// Remove the command with id `target` from the queues
    pub fn delete_command(target: CommandId) -> Self {
        Self::new(
            CommandType::DeleteCommand,
            AccountName::empty(),
            TimelineDescriptor::none(),
        )
        .with_item(target.get())
        .in_foreground(true)
        .manually_launched(true)
    }

    /// Set the target item
    pub fn with_item(mut self, item_id: i64) -> Self {
        self.item_id = item_id;
        self
    }

    /// Set the foreground flag
    pub fn in_foreground(mut self, in_foreground: bool) -> Self {
        self.in_foreground = in_foreground;
        self
    }

    /// Set the manually-launched flag
    pub fn manually_launched(mut self, manually_launched: bool) -> Self {
        self.manually_launched = manually_launched;
        self
    }

    /// De-duplication identity
    pub fn key(&self) -> CommandKey {
        CommandKey {
            command_type: self.command_type,
            account: self.account.clone(),
            timeline: self.timeline.descriptor().clone(),
            item_id: self.item_id,
        }
    }

    /// Position in a partition
    pub fn order_key(&self) -> OrderKey {
        OrderKey {
            background: !self.in_foreground,
            priority: self.command_type.priority(),
            id: self.id,
        }
    }

    /// Accessor whose pool runs this command
    pub fn accessor(&self) -> AccessorType {
        self.command_type.accessor()
    }

    /// Connectivity this command needs
    pub fn connection_required(&self) -> ConnectionRequired {
        self.command_type.connection_required()
    }

    /// Human-readable description
    pub fn description(&self) -> String {
        let mut text = self.command_type.title().to_string();
        let timeline = self.timeline.descriptor();
        if timeline.kind != TimelineKind::Unknown {
            text.push_str(&format!(" [{}]", timeline.describe()));
        }
        if self.item_id != 0 {
            text.push_str(&format!(" item:{}", self.item_id));
        }
        if !self.account.is_empty() {
            text.push_str(&format!(" ({})", self.account));
        }
        text
    }

    /// Serializable summary for events
    pub fn summary(&self) -> CommandSummary {
        CommandSummary {
            id: self.id,
            command_type: self.command_type,
            account: self.account.clone(),
            description: self.description(),
            in_foreground: self.in_foreground,
            manually_launched: self.manually_launched,
        }
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.command_type == other.command_type
            && self.item_id == other.item_id
            && self.account == other.account
            && self.timeline == other.timeline
    }
}

impl Eq for Command {}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {}", self.id, self.description())
    }
}

impl Serialize for CommandTimeline {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.descriptor().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CommandTimeline {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TimelineDescriptor::deserialize(deserializer).map(CommandTimeline::new)
    }
}
