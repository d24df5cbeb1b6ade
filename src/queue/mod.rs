//! The queue set: seven named, ordered, persisted partitions
//!
//! A command sits in exactly one partition at any time. All structural
//! changes happen under one [`tokio::sync::Mutex`]; the flush to SQLite holds
//! the same lock so memory and disk never diverge mid-write.

mod accessor;
mod partition;

pub use accessor::{Admission, QueueAccessor, Routing};
pub use partition::CommandQueue;

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};

use crate::command::{Command, now_ms};
use crate::db::Database;
use crate::error::Result;
use crate::types::{AccessorType, CommandId, QueueStats, QueueType};

/// Attempts made by a flush that keeps hitting a locked database
const FLUSH_ATTEMPTS: u32 = 4;

/// Delay before the first flush retry
const FLUSH_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Message stored on commands that were executing when the process died
pub const INTERRUPTED_MESSAGE: &str = "interrupted: the process stopped while this command was executing";

/// Partitions that hold the schedulable copy of a command for admission purposes
pub(crate) fn admission_scope(accessor: AccessorType) -> [QueueType; 4] {
    [
        QueueType::PreAdmission,
        accessor.main_queue(),
        QueueType::Skipped,
        QueueType::Executing,
    ]
}

/// Contents of the queue set, only reachable through [`QueueSet::lock`]
#[derive(Debug)]
pub struct Partitions {
    queues: [CommandQueue; 7],
    last_retry_promotion: HashMap<AccessorType, Instant>,
    cancel_requested: HashSet<CommandId>,
}

impl Partitions {
    fn new() -> Self {
        Self {
            queues: QueueType::ALL.map(CommandQueue::new),
            last_retry_promotion: HashMap::new(),
            cancel_requested: HashSet::new(),
        }
    }

    /// One partition
    pub fn get(&self, queue: QueueType) -> &CommandQueue {
        &self.queues[queue.index()]
    }

    pub(crate) fn get_mut(&mut self, queue: QueueType) -> &mut CommandQueue {
        &mut self.queues[queue.index()]
    }

    /// Partition and command holding `id`
    pub fn find(&self, id: CommandId) -> Option<(QueueType, &Command)> {
        QueueType::ALL
            .iter()
            .find_map(|q| self.get(*q).get(id).map(|c| (*q, c)))
    }

    /// Whether an equal command sits in any of `queues`
    pub fn contains_equal_in(&self, queues: &[QueueType], command: &Command) -> bool {
        queues.iter().any(|q| self.get(*q).contains(command))
    }

    /// Whether the id is present anywhere
    pub fn contains_id(&self, id: CommandId) -> bool {
        QueueType::ALL.iter().any(|q| self.get(*q).contains_id(id))
    }

    /// Total commands across all partitions
    pub fn total(&self) -> usize {
        self.queues.iter().map(CommandQueue::len).sum()
    }

    pub(crate) fn retry_promotion_due(&self, accessor: AccessorType, period: Duration) -> bool {
        self.last_retry_promotion
            .get(&accessor)
            .is_none_or(|at| at.elapsed() >= period)
    }

    pub(crate) fn mark_retry_promotion(&mut self, accessor: AccessorType) {
        self.last_retry_promotion.insert(accessor, Instant::now());
    }

    pub(crate) fn request_cancel(&mut self, id: CommandId) {
        self.cancel_requested.insert(id);
    }

    pub(crate) fn take_cancel_request(&mut self, id: CommandId) -> bool {
        self.cancel_requested.remove(&id)
    }

    fn snapshot(&self) -> Vec<(QueueType, Command)> {
        QueueType::ALL
            .iter()
            .flat_map(|q| self.get(*q).iter().map(move |c| (*q, c.clone())))
            .collect()
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for queue in QueueType::ALL {
            stats.set_count(queue, self.get(queue).len());
        }
        stats
    }
}

/// Owned queue state shared by accessors, workers and the service
pub struct QueueSet {
    partitions: Mutex<Partitions>,
    db: Arc<Database>,
    changed: AtomicBool,
    loaded: AtomicBool,
}

impl QueueSet {
    /// Empty, not yet loaded queue set persisted in `db`
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            partitions: Mutex::new(Partitions::new()),
            db,
            changed: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
        }
    }

    /// Lock the partitions for a structural change
    pub async fn lock(&self) -> MutexGuard<'_, Partitions> {
        self.partitions.lock().await
    }

    /// Whether [`load`](Self::load) has completed
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Remember that memory and disk differ
    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }

    /// Whether there are unflushed changes
    pub fn is_changed(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    /// Load persisted commands, merging them with anything admitted since start
    ///
    /// Rows whose id or identity is already present are skipped. Commands
    /// that were Executing when the process stopped go to Error with an
    /// "interrupted" message; they need a manual relaunch. Returns the number
    /// of commands restored.
    pub async fn load(&self) -> Result<usize> {
        let rows = self.db.load_commands().await?;
        let mut partitions = self.lock().await;
        let mut restored = 0;

        for (queue, mut command) in rows {
            CommandId::observe(command.id);
            if partitions.contains_id(command.id) {
                tracing::debug!(command_id = command.id.get(), "Already admitted, skipping row");
                continue;
            }

            let target = match queue {
                QueueType::Executing => {
                    command.result.message = INTERRUPTED_MESSAGE.to_string();
                    tracing::warn!(
                        command_id = command.id.get(),
                        command = %command.description(),
                        "Command was interrupted mid-execution, moved to error queue"
                    );
                    QueueType::Error
                }
                other => other,
            };

            let duplicate = match target {
                QueueType::Retry | QueueType::Error => partitions.get(target).contains(&command),
                _ => partitions.contains_equal_in(&admission_scope(command.accessor()), &command),
            };
            if duplicate {
                tracing::debug!(
                    command_id = command.id.get(),
                    queue = %target,
                    "Equal command already queued, skipping row"
                );
                continue;
            }

            if partitions.get_mut(target).insert(command) {
                restored += 1;
            }
        }

        self.loaded.store(true, Ordering::SeqCst);
        self.mark_changed();
        tracing::info!(restored, total = partitions.total(), "Queues loaded");
        Ok(restored)
    }

    /// Write every partition to the database, replacing what was stored
    ///
    /// Does nothing before [`load`](Self::load): an unloaded set would wipe
    /// the persisted queues.
    pub async fn save(&self) -> Result<()> {
        if !self.is_loaded() {
            return Ok(());
        }
        let partitions = self.lock().await;
        let snapshot = partitions.snapshot();
        self.changed.store(false, Ordering::SeqCst);
        let result = crate::retry::with_retry(FLUSH_ATTEMPTS, FLUSH_RETRY_DELAY, || {
            self.db.replace_all_commands(&snapshot)
        })
        .await;
        if result.is_err() {
            self.mark_changed();
        }
        result
    }

    /// Save only if something changed since the last save; returns whether it wrote
    pub async fn flush_if_changed(&self) -> Result<bool> {
        if !self.is_changed() || !self.is_loaded() {
            return Ok(false);
        }
        self.save().await?;
        Ok(true)
    }

    /// Partition and copy of the command with `id`
    pub async fn find(&self, id: CommandId) -> Option<(QueueType, Command)> {
        self.lock()
            .await
            .find(id)
            .map(|(queue, command)| (queue, command.clone()))
    }

    /// Remove a command that is not executing
    ///
    /// Returns None if the id is unknown or currently owned by a worker.
    pub async fn remove(&self, id: CommandId) -> Option<(QueueType, Command)> {
        let mut partitions = self.lock().await;
        let (queue, _) = partitions.find(id)?;
        if queue == QueueType::Executing {
            return None;
        }
        let command = partitions.get_mut(queue).remove(id)?;
        self.mark_changed();
        Some((queue, command))
    }

    /// Purge Error entries older than `max_age`; returns how many were dropped
    pub async fn purge_error_queue(&self, max_age: Duration) -> usize {
        let cutoff = now_ms().saturating_sub(i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX));
        let mut partitions = self.lock().await;
        let purged = partitions.get_mut(QueueType::Error).take_where(|command| {
            let last_seen = command.result.last_executed_at.max(command.created_at);
            last_seen < cutoff
        });
        if !purged.is_empty() {
            self.mark_changed();
            for command in &purged {
                tracing::info!(
                    command_id = command.id.get(),
                    command = %command.description(),
                    "Purged stale command from error queue"
                );
            }
        }
        purged.len()
    }

    /// Sizes of all partitions
    pub async fn stats(&self) -> QueueStats {
        self.lock().await.stats()
    }

    /// Copies of all commands with their partition, in dump order
    pub async fn list(&self) -> Vec<(QueueType, Command)> {
        self.lock().await.snapshot()
    }

    /// Human-readable dump of every partition
    pub async fn dump(&self) -> String {
        let partitions = self.lock().await;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Queues: {} commands{}",
            partitions.total(),
            if self.is_loaded() { "" } else { " (not loaded)" }
        );
        for queue in QueueType::ALL {
            let partition = partitions.get(queue);
            if partition.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{} ({}):", queue, partition.len());
            for command in partition.iter() {
                let _ = writeln!(out, "  {}  {}", command, command.result.status_line());
            }
        }
        out
    }
}
