//! Periodic re-evaluation of the queues.

use serde::Serialize;

use crate::types::AccessorType;

use super::CommandScheduler;

/// What one heartbeat tick changed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HeartbeatReport {
    /// Skipped commands moved back to a main queue
    pub rehabilitated: usize,
    /// Retry entries promoted to a main queue
    pub promoted: usize,
    /// Old Error entries dropped
    pub purged: usize,
    /// Workers started
    pub workers_started: usize,
}

impl CommandScheduler {
    /// Spawn the heartbeat task; it runs until shutdown
    pub(crate) fn spawn_heartbeat(&self) {
        let scheduler = self.clone();
        let period = self.config.scheduler.heartbeat_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; start() already did that work
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        scheduler.heartbeat_tick().await;
                    }
                    _ = scheduler.shutdown_token.cancelled() => {
                        tracing::debug!("Heartbeat stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Re-evaluate the queues once
    ///
    /// Moves Skipped commands that became eligible back, promotes due Retry
    /// entries, purges old Error entries, resizes both worker pools and
    /// flushes. Call it after a connectivity or preference change to react
    /// without waiting for the next tick.
    pub async fn heartbeat_tick(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();
        for accessor_type in AccessorType::ALL {
            let accessor = self.accessor(accessor_type);
            report.rehabilitated += accessor.rehabilitate_skipped().await;
            report.promoted += accessor.promote_retries_if_due().await;
        }
        report.purged = self
            .queues
            .purge_error_queue(self.config.scheduler.error_queue_max_age)
            .await;
        report.workers_started = self.ensure_executors_started().await;
        self.persist().await;

        if report != HeartbeatReport::default() {
            tracing::debug!(
                rehabilitated = report.rehabilitated,
                promoted = report.promoted,
                purged = report.purged,
                workers_started = report.workers_started,
                "Heartbeat"
            );
        }
        report
    }

    /// Resize both worker pools; returns the number of workers started
    pub(crate) async fn ensure_executors_started(&self) -> usize {
        if !self.queues.is_loaded() {
            return 0;
        }
        self.general_pool.ensure_executors_started().await
            + self.download_pool.ensure_executors_started().await
    }
}
