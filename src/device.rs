//! Connectivity, foreground state and sync preferences
//!
//! Everything here is read live at eligibility-check time. Nothing is cached
//! across polls, so flipping connectivity takes effect on the next poll.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Current network connectivity of the device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No network
    Offline,
    /// Connected through Wi-Fi (unmetered)
    #[default]
    Wifi,
    /// Connected through a mobile or other metered network
    Mobile,
}

impl ConnectionState {
    /// True when any network is available
    pub fn is_online(&self) -> bool {
        !matches!(self, ConnectionState::Offline)
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Offline => 0,
            ConnectionState::Wifi => 1,
            ConnectionState::Mobile => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Offline,
            1 => ConnectionState::Wifi,
            _ => ConnectionState::Mobile,
        }
    }
}

/// Connectivity a command needs before it may run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRequired {
    /// Runs regardless of connectivity
    Any,
    /// Runs only while offline
    Offline,
    /// Needs a network; Wi-Fi when `sync_over_wifi_only` is set
    Sync,
    /// Needs a network; Wi-Fi when `download_attachments_over_wifi_only` is set
    DownloadAttachment,
}

impl ConnectionRequired {
    /// Whether `state` satisfies this requirement under `preferences`
    pub fn is_satisfied_by(&self, state: ConnectionState, preferences: &Preferences) -> bool {
        match self {
            ConnectionRequired::Any => true,
            ConnectionRequired::Offline => state == ConnectionState::Offline,
            ConnectionRequired::Sync => {
                if preferences.sync_over_wifi_only {
                    state == ConnectionState::Wifi
                } else {
                    state.is_online()
                }
            }
            ConnectionRequired::DownloadAttachment => {
                if preferences.download_attachments_over_wifi_only {
                    state == ConnectionState::Wifi
                } else {
                    state.is_online()
                }
            }
        }
    }
}

/// User preferences that influence eligibility and follow-up work
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Sync only over Wi-Fi (default: false)
    #[serde(default)]
    pub sync_over_wifi_only: bool,

    /// Download avatars and attachments only over Wi-Fi (default: false)
    #[serde(default)]
    pub download_attachments_over_wifi_only: bool,

    /// Let background commands run while the app is in the foreground (default: true)
    #[serde(default = "default_true")]
    pub sync_while_using_app: bool,

    /// Refresh the account's home timeline after a note was posted (default: true)
    #[serde(default = "default_true")]
    pub sync_after_note_sent: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sync_over_wifi_only: false,
            download_attachments_over_wifi_only: false,
            sync_while_using_app: true,
            sync_after_note_sent: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Live source of connectivity, foreground state and preferences
///
/// Implementations must be cheap to call: the scheduler consults them on
/// every poll.
pub trait DeviceState: Send + Sync {
    /// Current connectivity
    fn connection_state(&self) -> ConnectionState;

    /// Whether the user is looking at the app right now
    fn is_app_in_foreground(&self) -> bool;

    /// Current preferences
    fn preferences(&self) -> Preferences;
}

/// [`DeviceState`] backed by atomics, updated by the embedding application
#[derive(Debug)]
pub struct SharedDeviceState {
    connection: AtomicU8,
    in_foreground: AtomicBool,
    preferences: RwLock<Preferences>,
}

impl SharedDeviceState {
    /// Create a device state with the given initial values
    pub fn new(connection: ConnectionState, preferences: Preferences) -> Self {
        Self {
            connection: AtomicU8::new(connection.to_u8()),
            in_foreground: AtomicBool::new(false),
            preferences: RwLock::new(preferences),
        }
    }

    /// Report a connectivity change
    pub fn set_connection_state(&self, state: ConnectionState) {
        tracing::debug!(?state, "Connection state changed");
        self.connection.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Report the app entering or leaving the foreground
    pub fn set_app_in_foreground(&self, in_foreground: bool) {
        self.in_foreground.store(in_foreground, Ordering::SeqCst);
    }

    /// Replace the preferences
    pub fn set_preferences(&self, preferences: Preferences) {
        match self.preferences.write() {
            Ok(mut guard) => *guard = preferences,
            Err(poisoned) => *poisoned.into_inner() = preferences,
        }
    }
}

impl Default for SharedDeviceState {
    fn default() -> Self {
        Self::new(ConnectionState::default(), Preferences::default())
    }
}

impl DeviceState for SharedDeviceState {
    fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection.load(Ordering::SeqCst))
    }

    fn is_app_in_foreground(&self) -> bool {
        self.in_foreground.load(Ordering::SeqCst)
    }

    fn preferences(&self) -> Preferences {
        match self.preferences.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
