//! Configuration types for command-scheduler

use crate::device::Preferences;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Worker pool sizing and scheduling timings
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum concurrent workers draining the general queue (default: 2)
    #[serde(default = "default_max_general_workers")]
    pub max_general_workers: usize,

    /// Maximum concurrent workers draining the downloads queue (default: 3)
    #[serde(default = "default_max_download_workers")]
    pub max_download_workers: usize,

    /// Wall-clock ceiling for one worker (default: 10 minutes)
    ///
    /// A worker stops polling once it has been alive this long, and the supervisor
    /// cancels a worker whose task exceeds it.
    #[serde(default = "default_max_execution_time", with = "duration_serde")]
    pub max_execution_time: Duration,

    /// A worker whose last progress report is older than this is considered stalled (default: 5 minutes)
    #[serde(default = "default_stale_progress_threshold", with = "duration_serde")]
    pub stale_progress_threshold: Duration,

    /// How long a cancelled task may keep running before it is aborted (default: 5 seconds)
    #[serde(default = "default_cancel_grace", with = "duration_serde")]
    pub cancel_grace: Duration,

    /// Minimum time between two executions of a command sitting in Retry or Error (default: 15 minutes)
    #[serde(default = "default_min_retry_period", with = "duration_serde")]
    pub min_retry_period: Duration,

    /// Cool-down between two promotions of the Retry queue (default: 15 minutes)
    #[serde(default = "default_retry_queue_processing_period", with = "duration_serde")]
    pub retry_queue_processing_period: Duration,

    /// Entries older than this are purged from the Error queue (default: 10 days)
    #[serde(default = "default_error_queue_max_age", with = "duration_serde")]
    pub error_queue_max_age: Duration,

    /// Interval of the heartbeat that re-evaluates the queues (default: 30 seconds)
    #[serde(default = "default_heartbeat_interval", with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// How long shutdown waits for cancelled workers to file their commands (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_general_workers: default_max_general_workers(),
            max_download_workers: default_max_download_workers(),
            max_execution_time: default_max_execution_time(),
            stale_progress_threshold: default_stale_progress_threshold(),
            cancel_grace: default_cancel_grace(),
            min_retry_period: default_min_retry_period(),
            retry_queue_processing_period: default_retry_queue_processing_period(),
            error_queue_max_age: default_error_queue_max_age(),
            heartbeat_interval: default_heartbeat_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Back-off applied when a command is filed into the Retry queue
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay after the first failed execution (default: 60 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between executions (default: 1 hour)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./command-scheduler.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Optional API key for authentication
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Main configuration for [`CommandScheduler`](crate::CommandScheduler)
///
/// Fields are organized into logical sub-configs:
/// - [`scheduler`](SchedulerConfig) - pool sizes and timings (flattened)
/// - [`retry`](RetryConfig) - back-off for the Retry queue
/// - [`persistence`](PersistenceConfig) - database location
/// - [`preferences`](Preferences) - initial device preferences
/// - [`api`](ApiConfig) - REST API server
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pool sizing and scheduling timings
    #[serde(flatten)]
    pub scheduler: SchedulerConfig,

    /// Retry back-off
    #[serde(default)]
    pub retry: RetryConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Initial sync and download preferences
    #[serde(default)]
    pub preferences: Preferences,

    /// REST API server
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Check settings that would make the scheduler unusable
    pub fn validate(&self) -> crate::Result<()> {
        if self.scheduler.max_general_workers == 0 {
            return Err(crate::Error::Config {
                message: "at least one general worker is required".to_string(),
                key: Some("max_general_workers".to_string()),
            });
        }
        if self.scheduler.max_download_workers == 0 {
            return Err(crate::Error::Config {
                message: "at least one download worker is required".to_string(),
                key: Some("max_download_workers".to_string()),
            });
        }
        if self.scheduler.heartbeat_interval.is_zero() {
            return Err(crate::Error::Config {
                message: "heartbeat interval must be positive".to_string(),
                key: Some("heartbeat_interval".to_string()),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(crate::Error::Config {
                message: "backoff multiplier must be at least 1.0".to_string(),
                key: Some("backoff_multiplier".to_string()),
            });
        }
        Ok(())
    }
}

fn default_max_general_workers() -> usize {
    2
}

fn default_max_download_workers() -> usize {
    3
}

fn default_max_execution_time() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_stale_progress_threshold() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_min_retry_period() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_retry_queue_processing_period() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_error_queue_max_age() -> Duration {
    Duration::from_secs(10 * 24 * 60 * 60)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("command-scheduler.db")
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");

        assert_eq!(config.scheduler.max_general_workers, 2);
        assert_eq!(config.scheduler.max_download_workers, 3);
        assert_eq!(config.scheduler.max_execution_time, Duration::from_secs(600));
        assert_eq!(config.scheduler.min_retry_period, Duration::from_secs(900));
        assert_eq!(
            config.persistence.database_path,
            PathBuf::from("command-scheduler.db")
        );
        assert!(config.api.api_key.is_none());
        assert!(config.retry.jitter);
    }

    #[test]
    fn scheduler_fields_are_flattened_and_durations_are_seconds() {
        let json = r#"{
            "max_general_workers": 4,
            "heartbeat_interval": 5,
            "retry": { "initial_delay": 10, "jitter": false }
        }"#;
        let config: Config = serde_json::from_str(json).expect("deserialize failed");

        assert_eq!(config.scheduler.max_general_workers, 4);
        assert_eq!(config.scheduler.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.retry.initial_delay, Duration::from_secs(10));
        assert!(!config.retry.jitter);

        let round_trip = serde_json::to_value(&config).unwrap();
        assert_eq!(round_trip["heartbeat_interval"], 5);
        assert_eq!(round_trip["max_general_workers"], 4);
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.scheduler.max_download_workers = 0;

        match config.validate() {
            Err(crate::Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("max_download_workers"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(Config::default().validate().is_ok());
    }
}
