//! The scheduler facade, split into focused submodules.
//!
//! The `CommandScheduler` struct and its methods are organized by domain:
//! - [`admission`] - Submitting, cancelling, relaunching and deleting commands
//! - [`lifecycle`] - Startup and shutdown coordination
//! - [`heartbeat`] - Periodic re-evaluation of the queues

mod admission;
mod heartbeat;
mod lifecycle;

pub use heartbeat::HeartbeatReport;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::command::{Command, CommandType, TimelineResolver};
use crate::config::Config;
use crate::db::Database;
use crate::device::DeviceState;
use crate::error::Result;
use crate::executor::{QueueExecutors, WorkerEnv, WorkerInfo};
use crate::queue::{QueueAccessor, QueueSet};
use crate::strategy::{DeleteCommandStrategy, StrategyRegistry};
use crate::types::{AccessorType, Event, QueueStats, QueueType};

/// Buffer size of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Main scheduler instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct CommandScheduler {
    /// Database instance for persistence
    /// Public for integration tests to inspect stored rows
    pub db: Arc<Database>,
    /// All queue partitions
    pub(crate) queues: Arc<QueueSet>,
    /// Accessor for everything except downloads
    pub(crate) general: Arc<QueueAccessor>,
    /// Accessor for avatar and attachment downloads
    pub(crate) downloads: Arc<QueueAccessor>,
    /// Worker pool draining the general queue
    pub(crate) general_pool: Arc<QueueExecutors>,
    /// Worker pool draining the downloads queue
    pub(crate) download_pool: Arc<QueueExecutors>,
    /// Connectivity, foreground state and preferences
    pub(crate) device: Arc<dyn DeviceState>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Whether new commands are accepted (false once shutdown began)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Set once [`start`](Self::start) ran
    pub(crate) started: Arc<AtomicBool>,
    /// Cancelled on shutdown; stops the heartbeat
    pub(crate) shutdown_token: CancellationToken,
}

impl CommandScheduler {
    /// Create a new scheduler
    ///
    /// This opens (or creates) the SQLite database and runs migrations, wires
    /// both accessors and worker pools, and registers the built-in
    /// [`DeleteCommandStrategy`]. Nothing runs until [`start`](Self::start)
    /// loads the persisted queues; commands submitted before that are held in
    /// pre-admission.
    pub async fn new(
        config: Config,
        device: Arc<dyn DeviceState>,
        strategies: StrategyRegistry,
        resolver: Arc<dyn TimelineResolver>,
    ) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let config = Arc::new(config);
        let queues = Arc::new(QueueSet::new(db.clone()));

        let strategies = strategies.register(
            CommandType::DeleteCommand,
            DeleteCommandStrategy::new(queues.clone(), event_tx.clone()),
        );
        tracing::info!(
            registered = ?strategies.registered_types(),
            "Strategies registered"
        );

        let env = Arc::new(WorkerEnv {
            registry: Arc::new(strategies),
            resolver,
            device: device.clone(),
            config: config.clone(),
            event_tx: event_tx.clone(),
        });
        let accessor = |accessor_type| {
            Arc::new(QueueAccessor::new(
                accessor_type,
                queues.clone(),
                device.clone(),
                config.clone(),
                event_tx.clone(),
            ))
        };
        let general = accessor(AccessorType::General);
        let downloads = accessor(AccessorType::Downloads);

        let general_pool = Arc::new(QueueExecutors::new(
            general.clone(),
            env.clone(),
            config.scheduler.max_general_workers,
        ));
        let download_pool = Arc::new(QueueExecutors::new(
            downloads.clone(),
            env,
            config.scheduler.max_download_workers,
        ));

        Ok(Self {
            db,
            queues,
            general,
            downloads,
            general_pool,
            download_pool,
            device,
            config,
            event_tx,
            accepting_new: Arc::new(AtomicBool::new(true)),
            started: Arc::new(AtomicBool::new(false)),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Subscribe to scheduler events
    ///
    /// Each subscriber receives all events independently. A subscriber that
    /// falls behind by more than 1000 events gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The device state consulted for eligibility
    pub fn device(&self) -> Arc<dyn DeviceState> {
        Arc::clone(&self.device)
    }

    /// Emit an event to all subscribers; dropped when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn accessor(&self, accessor_type: AccessorType) -> &Arc<QueueAccessor> {
        match accessor_type {
            AccessorType::General => &self.general,
            AccessorType::Downloads => &self.downloads,
        }
    }

    pub(crate) fn executors(&self, accessor_type: AccessorType) -> &Arc<QueueExecutors> {
        match accessor_type {
            AccessorType::General => &self.general_pool,
            AccessorType::Downloads => &self.download_pool,
        }
    }

    /// Sizes of all partitions plus live worker counts
    pub async fn stats(&self) -> QueueStats {
        let mut stats = self.queues.stats().await;
        stats.general_workers = self.general_pool.running().await;
        stats.download_workers = self.download_pool.running().await;
        stats
    }

    /// Copies of every queued command with its partition
    pub async fn list(&self) -> Vec<(QueueType, Command)> {
        self.queues.list().await
    }

    /// Human-readable dump of every partition and worker
    pub async fn dump(&self) -> String {
        let mut out = self.queues.dump().await;
        for pool in [&self.general_pool, &self.download_pool] {
            let workers = pool.workers().await;
            out.push_str(&format!(
                "{} workers ({}/{}){}\n",
                pool.accessor_type(),
                workers.len(),
                pool.cap(),
                if pool.is_stopped() { " stopped" } else { "" }
            ));
            for worker in workers {
                out.push_str(&format_worker(&worker));
            }
        }
        out
    }

    /// Live workers of both pools
    pub async fn workers(&self) -> Vec<(AccessorType, WorkerInfo)> {
        let mut all = Vec::new();
        for pool in [&self.general_pool, &self.download_pool] {
            all.extend(
                pool.workers()
                    .await
                    .into_iter()
                    .map(|worker| (pool.accessor_type(), worker)),
            );
        }
        all
    }
}

fn format_worker(worker: &WorkerInfo) -> String {
    match (&worker.current, worker.current_for_ms) {
        (Some(current), Some(ms)) => format!(
            "  worker {} [{}] executed:{} running {} for {}ms\n",
            worker.worker_id, worker.status, worker.executed, current, ms
        ),
        _ => format!(
            "  worker {} [{}] executed:{} idle\n",
            worker.worker_id, worker.status, worker.executed
        ),
    }
}
