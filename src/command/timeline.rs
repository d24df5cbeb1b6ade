//! Lazily resolved timeline a command targets

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

use crate::types::AccountName;

/// Kind of timeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    /// No timeline (e.g. a single download)
    Unknown,
    /// The account's home feed
    Home,
    /// Mentions and replies to the account
    Notifications,
    /// Private notes
    Private,
    /// Notes of one actor
    Actor,
    /// Public notes of the origin
    Public,
    /// Search results
    Search,
    /// Notes the account liked
    Favorites,
    /// Notes of one conversation
    Conversation,
    /// Followers of an actor
    Followers,
    /// Actors an actor follows
    Friends,
}

impl TimelineKind {
    /// Every kind
    pub const ALL: [TimelineKind; 11] = [
        TimelineKind::Unknown,
        TimelineKind::Home,
        TimelineKind::Notifications,
        TimelineKind::Private,
        TimelineKind::Actor,
        TimelineKind::Public,
        TimelineKind::Search,
        TimelineKind::Favorites,
        TimelineKind::Conversation,
        TimelineKind::Followers,
        TimelineKind::Friends,
    ];

    /// Stable code stored in the database
    pub fn code(&self) -> &'static str {
        match self {
            TimelineKind::Unknown => "unknown",
            TimelineKind::Home => "home",
            TimelineKind::Notifications => "notifications",
            TimelineKind::Private => "private",
            TimelineKind::Actor => "actor",
            TimelineKind::Public => "public",
            TimelineKind::Search => "search",
            TimelineKind::Favorites => "favorites",
            TimelineKind::Conversation => "conversation",
            TimelineKind::Followers => "followers",
            TimelineKind::Friends => "friends",
        }
    }

    /// Parse a code written by [`TimelineKind::code`]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.code() == code)
    }
}

/// Identity of a timeline: the part of a [`CommandTimeline`] that is compared and persisted
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimelineDescriptor {
    /// Timeline kind
    pub kind: TimelineKind,
    /// Actor the timeline belongs to (0 if none)
    #[serde(default)]
    pub actor_id: i64,
    /// Origin (server) name, for origin-wide timelines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Query of a search timeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
}

impl TimelineDescriptor {
    /// Descriptor of "no timeline"
    pub fn none() -> Self {
        Self::of_kind(TimelineKind::Unknown)
    }

    /// Descriptor of an account-wide timeline such as Home
    pub fn of_kind(kind: TimelineKind) -> Self {
        Self {
            kind,
            actor_id: 0,
            origin: None,
            search_query: None,
        }
    }

    /// Descriptor of an actor's timeline of the given kind
    pub fn for_actor(kind: TimelineKind, actor_id: i64) -> Self {
        Self {
            actor_id,
            ..Self::of_kind(kind)
        }
    }

    /// Descriptor of a search timeline
    pub fn search(query: impl Into<String>) -> Self {
        Self {
            search_query: Some(query.into()),
            ..Self::of_kind(TimelineKind::Search)
        }
    }

    /// Short text used in command descriptions
    pub fn describe(&self) -> String {
        let mut text = self.kind.code().to_string();
        if self.actor_id != 0 {
            text.push_str(&format!(" actor:{}", self.actor_id));
        }
        if let Some(origin) = &self.origin {
            text.push_str(&format!(" @{origin}"));
        }
        if let Some(query) = &self.search_query {
            text.push_str(&format!(" \"{query}\""));
        }
        text
    }
}

/// Fully resolved timeline, as loaded from storage
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    /// Storage row id (0 when the timeline is not stored)
    pub id: i64,
    /// Descriptor this timeline was resolved from
    pub descriptor: TimelineDescriptor,
    /// Display title
    pub title: String,
    /// Whether new items of this timeline are synced automatically
    pub is_synced_automatically: bool,
}

/// Looks up the stored timeline matching a descriptor
#[async_trait]
pub trait TimelineResolver: Send + Sync {
    /// Resolve `descriptor` for `account`
    async fn resolve(&self, account: &AccountName, descriptor: &TimelineDescriptor) -> Timeline;
}

/// Resolver that builds the timeline from the descriptor alone
#[derive(Debug, Default, Clone, Copy)]
pub struct DescriptorResolver;

#[async_trait]
impl TimelineResolver for DescriptorResolver {
    async fn resolve(&self, account: &AccountName, descriptor: &TimelineDescriptor) -> Timeline {
        let title = if account.is_empty() {
            descriptor.describe()
        } else {
            format!("{} / {}", account, descriptor.describe())
        };
        Timeline {
            id: 0,
            descriptor: descriptor.clone(),
            title,
            is_synced_automatically: false,
        }
    }
}

/// Timeline target of a command
///
/// Equality and persistence use the descriptor only. The resolved
/// [`Timeline`] is computed on first [`resolve`](Self::resolve) and cached,
/// so commands that never run (duplicates, deleted ones) never hit storage.
#[derive(Clone, Debug)]
pub struct CommandTimeline {
    descriptor: TimelineDescriptor,
    resolved: Arc<OnceLock<Timeline>>,
}

impl CommandTimeline {
    /// Unresolved timeline for `descriptor`
    pub fn new(descriptor: TimelineDescriptor) -> Self {
        Self {
            descriptor,
            resolved: Arc::new(OnceLock::new()),
        }
    }

    /// Identity part
    pub fn descriptor(&self) -> &TimelineDescriptor {
        &self.descriptor
    }

    /// Whether the timeline was resolved already
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Resolved timeline, if any
    pub fn get(&self) -> Option<&Timeline> {
        self.resolved.get()
    }

    /// Resolve once and cache
    ///
    /// Two concurrent callers may both call the resolver; the first stored
    /// value wins and both get it back.
    pub async fn resolve(
        &self,
        resolver: &dyn TimelineResolver,
        account: &AccountName,
    ) -> Timeline {
        if let Some(timeline) = self.resolved.get() {
            return timeline.clone();
        }
        let timeline = resolver.resolve(account, &self.descriptor).await;
        self.resolved.get_or_init(|| timeline).clone()
    }
}

impl PartialEq for CommandTimeline {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor
    }
}

impl Eq for CommandTimeline {}

impl From<TimelineDescriptor> for CommandTimeline {
    fn from(descriptor: TimelineDescriptor) -> Self {
        Self::new(descriptor)
    }
}
