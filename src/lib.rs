//! # command-scheduler
//!
//! Durable, prioritized, multi-queue background command scheduler for
//! social-network clients.
//!
//! Commands (sync a timeline, post a note, fetch an avatar) are admitted into
//! persistent queue partitions, ordered by foreground/background, type
//! priority and age, and drained by bounded worker pools. Soft failures are
//! retried with exponential back-off, hard failures and exhausted commands are
//! kept for inspection, and commands that cannot run right now (offline,
//! metered network) are parked until they can.
//!
//! ## Design Philosophy
//!
//! - **Durable** - Every partition survives restarts; a crash is detected and
//!   interrupted commands are surfaced instead of silently re-run
//! - **Pluggable** - What a command does is a [`CommandStrategy`] registered
//!   per [`CommandType`]
//! - **Event-driven** - Consumers subscribe to [`Event`]s, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use command_scheduler::{
//!     AccountName, Command, CommandScheduler, Config, DescriptorResolver, StrategyRegistry,
//!     TimelineKind,
//! };
//! use command_scheduler::device::SharedDeviceState;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = CommandScheduler::new(
//!         Config::default(),
//!         Arc::new(SharedDeviceState::default()),
//!         StrategyRegistry::new(),
//!         Arc::new(DescriptorResolver),
//!     )
//!     .await?;
//!
//!     let mut events = scheduler.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     scheduler.start().await?;
//!     scheduler
//!         .submit(Command::get_timeline(
//!             AccountName::new("alice@example.social"),
//!             TimelineKind::Home,
//!         ))
//!         .await?;
//!
//!     command_scheduler::run_with_shutdown(scheduler).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Commands, their results and timelines
pub mod command;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Connectivity and preferences consulted for eligibility
pub mod device;
/// Error types
pub mod error;
/// Worker pools draining the queues
pub mod executor;
/// Queue partitions and their accessors
pub mod queue;
/// Retry back-off computation
pub mod retry;
/// Scheduler facade (decomposed into focused submodules)
pub mod service;
/// Per-type execution strategies
pub mod strategy;
/// Cancellable, observable background tasks
pub mod task;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use command::{
    Command, CommandResult, CommandTimeline, CommandType, DescriptorResolver, Timeline,
    TimelineDescriptor, TimelineKind, TimelineResolver,
};
pub use config::Config;
pub use db::Database;
pub use device::{ConnectionRequired, ConnectionState, DeviceState, Preferences};
pub use error::{ApiError, Error, ErrorDetail, ExecutionError, Result, ToHttpStatus};
pub use service::{CommandScheduler, HeartbeatReport};
pub use strategy::{CommandStrategy, ProgressReport, StrategyContext, StrategyRegistry};
pub use types::{AccessorType, AccountName, CommandId, CommandSummary, Event, QueueStats, QueueType};

/// Run the scheduler until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Returns early, without a second shutdown, when the scheduler was shut
/// down by other means (e.g. `POST /shutdown`).
pub async fn run_with_shutdown(scheduler: CommandScheduler) -> Result<()> {
    tokio::select! {
        _ = wait_for_signal() => scheduler.shutdown().await,
        _ = scheduler.shutdown_token.cancelled() => Ok(()),
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
