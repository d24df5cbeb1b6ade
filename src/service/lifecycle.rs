//! Startup and shutdown coordination.

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::types::Event;

use super::CommandScheduler;

impl CommandScheduler {
    /// Load the persisted queues and start processing
    ///
    /// This method:
    /// 1. Loads the queues from the database, merging them with commands
    ///    submitted since construction (those move out of pre-admission)
    /// 2. Marks the session as running for unclean shutdown detection
    /// 3. Spawns the heartbeat
    /// 4. Starts workers for whatever is runnable
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be read or written.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let unclean = self.db.was_unclean_shutdown().await?;
        let restored = self.queues.load().await?;
        if unclean && restored > 0 {
            tracing::warn!(
                restored,
                "Previous session did not shut down cleanly, interrupted commands moved to error queue"
            );
        }

        let readmitted = self.general.admit_pre_admitted().await
            + self.downloads.admit_pre_admitted().await;
        self.db.set_clean_start().await?;
        self.queues.flush_if_changed().await?;

        self.spawn_heartbeat();
        let workers = self.ensure_executors_started().await;

        tracing::info!(restored, readmitted, workers, "Command scheduler started");
        Ok(())
    }

    /// Gracefully shut down the scheduler
    ///
    /// This method performs the shutdown sequence:
    /// 1. Stops accepting new commands and stops the heartbeat
    /// 2. Cancels in-flight workers; their commands are filed as stale (soft)
    ///    failures so they run again next session
    /// 3. Waits up to `shutdown_timeout` for the workers to file them
    /// 4. Persists the queues and marks the shutdown as clean
    ///
    /// # Errors
    ///
    /// Failures of the individual steps are logged and do not stop the
    /// sequence.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new commands
        self.accepting_new.store(false, Ordering::SeqCst);
        self.shutdown_token.cancel();

        // 2. Stop both pools
        let still_running =
            self.general_pool.stop(true).await + self.download_pool.stop(true).await;

        // 3. Wait for in-flight commands to be filed
        if still_running > 0 {
            let timeout = self.config.scheduler.shutdown_timeout;
            let (general_idle, downloads_idle) = tokio::join!(
                self.general_pool.wait_idle(timeout),
                self.download_pool.wait_idle(timeout)
            );
            if general_idle && downloads_idle {
                tracing::info!(still_running, "All workers finished");
            } else {
                tracing::warn!(
                    ?timeout,
                    "Timeout waiting for workers to finish, proceeding with shutdown"
                );
            }
        }

        // 4. Persist final state
        if let Err(e) = self.queues.save().await {
            tracing::error!(error = %e, "Failed to persist queues during shutdown");
        } else {
            tracing::info!("Final queue state persisted to database");
        }

        // 5. Mark clean shutdown in database
        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether the scheduler still accepts commands
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }
}
