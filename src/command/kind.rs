//! Command types and the per-type constants they fix

use serde::{Deserialize, Serialize};

use crate::device::ConnectionRequired;
use crate::types::AccessorType;

/// What a command does
///
/// The type selects the strategy that runs the command and fixes its
/// priority, retry budget, connectivity class and accessor for the command's
/// whole lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Remove another command from the queues
    DeleteCommand,
    /// Download an actor's avatar
    GetAvatar,
    /// Post or edit a note
    UpdateNote,
    /// Delete one of our notes
    DeleteNote,
    /// Download a note attachment
    GetAttachment,
    /// Like a note
    Like,
    /// Remove a like
    UndoLike,
    /// Announce (boost) a note
    Announce,
    /// Remove an announce
    UndoAnnounce,
    /// Follow an actor
    Follow,
    /// Stop following an actor
    UndoFollow,
    /// Refresh an actor's profile
    GetActor,
    /// Fetch a single note
    GetNote,
    /// Search for actors
    SearchActors,
    /// Fetch the conversation a note belongs to
    GetConversation,
    /// Sync the newest part of a timeline
    GetTimeline,
    /// Page further back in a timeline
    GetOlderTimeline,
    /// Fetch who follows an actor
    GetFollowers,
    /// Fetch whom an actor follows
    GetFriends,
    /// Query the server's rate limit state
    RateLimitStatus,
}

impl CommandType {
    /// Every command type
    pub const ALL: [CommandType; 20] = [
        CommandType::DeleteCommand,
        CommandType::GetAvatar,
        CommandType::UpdateNote,
        CommandType::DeleteNote,
        CommandType::GetAttachment,
        CommandType::Like,
        CommandType::UndoLike,
        CommandType::Announce,
        CommandType::UndoAnnounce,
        CommandType::Follow,
        CommandType::UndoFollow,
        CommandType::GetActor,
        CommandType::GetNote,
        CommandType::SearchActors,
        CommandType::GetConversation,
        CommandType::GetTimeline,
        CommandType::GetOlderTimeline,
        CommandType::GetFollowers,
        CommandType::GetFriends,
        CommandType::RateLimitStatus,
    ];

    /// Scheduling priority; lower runs first
    pub fn priority(&self) -> i32 {
        match self {
            CommandType::DeleteCommand => 1,
            CommandType::GetAvatar => 9,
            CommandType::UpdateNote => 10,
            CommandType::DeleteNote | CommandType::GetAttachment => 11,
            CommandType::Like
            | CommandType::UndoLike
            | CommandType::Announce
            | CommandType::UndoAnnounce => 12,
            CommandType::Follow | CommandType::UndoFollow => 13,
            CommandType::GetActor => 15,
            CommandType::GetNote => 16,
            CommandType::SearchActors => 17,
            CommandType::GetConversation => 18,
            CommandType::GetTimeline => 20,
            CommandType::GetOlderTimeline => 22,
            CommandType::GetFollowers | CommandType::GetFriends => 24,
            CommandType::RateLimitStatus => 30,
        }
    }

    /// Number of executions a fresh command of this type may spend
    pub fn initial_retries(&self) -> u32 {
        match self {
            CommandType::DeleteCommand | CommandType::RateLimitStatus => 0,
            CommandType::GetAvatar | CommandType::GetAttachment | CommandType::SearchActors => 3,
            CommandType::GetActor
            | CommandType::GetNote
            | CommandType::GetConversation
            | CommandType::GetOlderTimeline
            | CommandType::GetFollowers
            | CommandType::GetFriends => 5,
            CommandType::UpdateNote
            | CommandType::DeleteNote
            | CommandType::Like
            | CommandType::UndoLike
            | CommandType::Announce
            | CommandType::UndoAnnounce
            | CommandType::Follow
            | CommandType::UndoFollow
            | CommandType::GetTimeline => 10,
        }
    }

    /// Connectivity the command needs before it may run
    pub fn connection_required(&self) -> ConnectionRequired {
        match self {
            CommandType::DeleteCommand => ConnectionRequired::Any,
            CommandType::GetAvatar | CommandType::GetAttachment => {
                ConnectionRequired::DownloadAttachment
            }
            _ => ConnectionRequired::Sync,
        }
    }

    /// Accessor whose pool runs this type
    pub fn accessor(&self) -> AccessorType {
        match self {
            CommandType::GetAvatar | CommandType::GetAttachment => AccessorType::Downloads,
            _ => AccessorType::General,
        }
    }

    /// True for commands that publish something on the user's behalf
    pub fn is_posting(&self) -> bool {
        matches!(
            self,
            CommandType::UpdateNote
                | CommandType::DeleteNote
                | CommandType::Like
                | CommandType::UndoLike
                | CommandType::Announce
                | CommandType::UndoAnnounce
                | CommandType::Follow
                | CommandType::UndoFollow
        )
    }

    /// Stable code stored in the database
    pub fn code(&self) -> &'static str {
        match self {
            CommandType::DeleteCommand => "delete-command",
            CommandType::GetAvatar => "get-avatar",
            CommandType::UpdateNote => "update-note",
            CommandType::DeleteNote => "delete-note",
            CommandType::GetAttachment => "get-attachment",
            CommandType::Like => "like",
            CommandType::UndoLike => "undo-like",
            CommandType::Announce => "announce",
            CommandType::UndoAnnounce => "undo-announce",
            CommandType::Follow => "follow",
            CommandType::UndoFollow => "undo-follow",
            CommandType::GetActor => "get-actor",
            CommandType::GetNote => "get-note",
            CommandType::SearchActors => "search-actors",
            CommandType::GetConversation => "get-conversation",
            CommandType::GetTimeline => "get-timeline",
            CommandType::GetOlderTimeline => "get-older-timeline",
            CommandType::GetFollowers => "get-followers",
            CommandType::GetFriends => "get-friends",
            CommandType::RateLimitStatus => "rate-limit-status",
        }
    }

    /// Parse a code written by [`CommandType::code`]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }

    /// Human-readable name used in command descriptions
    pub fn title(&self) -> &'static str {
        match self {
            CommandType::DeleteCommand => "Delete command",
            CommandType::GetAvatar => "Get avatar",
            CommandType::UpdateNote => "Send note",
            CommandType::DeleteNote => "Delete note",
            CommandType::GetAttachment => "Get attachment",
            CommandType::Like => "Like",
            CommandType::UndoLike => "Undo like",
            CommandType::Announce => "Announce",
            CommandType::UndoAnnounce => "Undo announce",
            CommandType::Follow => "Follow",
            CommandType::UndoFollow => "Stop following",
            CommandType::GetActor => "Get actor",
            CommandType::GetNote => "Get note",
            CommandType::SearchActors => "Search actors",
            CommandType::GetConversation => "Get conversation",
            CommandType::GetTimeline => "Sync timeline",
            CommandType::GetOlderTimeline => "Sync older notes",
            CommandType::GetFollowers => "Get followers",
            CommandType::GetFriends => "Get friends",
            CommandType::RateLimitStatus => "Rate limit status",
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}
