//! Shared test helpers for creating CommandScheduler instances in tests.

use crate::command::{CommandType, DescriptorResolver};
use crate::config::Config;
use crate::device::SharedDeviceState;
use crate::error::ExecutionError;
use crate::service::CommandScheduler;
use crate::strategy::{CommandStrategy, StrategyContext, StrategyRegistry};
use crate::types::{AccountName, QueueStats};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Strategy with a fixed outcome
pub(crate) enum TestStrategy {
    Succeed,
    Fail(ExecutionError),
    Hang,
}

#[async_trait]
impl CommandStrategy for TestStrategy {
    async fn execute(&self, context: &mut StrategyContext) -> Result<(), ExecutionError> {
        match self {
            TestStrategy::Succeed => {
                context.command.result.message = "ok".to_string();
                Ok(())
            }
            TestStrategy::Fail(error) => Err(error.clone()),
            TestStrategy::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    fn name(&self) -> &'static str {
        "test"
    }
}

/// Registry where every type succeeds
pub(crate) fn succeeding_registry() -> StrategyRegistry {
    StrategyRegistry::new().register_all(&CommandType::ALL, Arc::new(TestStrategy::Succeed))
}

/// Test scheduler state; keep the tempdir alive for the database
pub(crate) struct TestScheduler {
    pub scheduler: CommandScheduler,
    pub device: Arc<SharedDeviceState>,
    pub temp_dir: tempfile::TempDir,
}

/// Helper to create a test scheduler with a persistent database and succeeding strategies.
pub(crate) async fn create_test_scheduler() -> TestScheduler {
    create_test_scheduler_with(succeeding_registry(), |_| {}).await
}

/// Helper to create a test scheduler with custom strategies and configuration.
pub(crate) async fn create_test_scheduler_with(
    registry: StrategyRegistry,
    configure: impl FnOnce(&mut Config),
) -> TestScheduler {
    let temp_dir = tempdir().unwrap();
    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.retry.jitter = false;
    configure(&mut config);

    let device = Arc::new(SharedDeviceState::default());
    let scheduler = CommandScheduler::new(
        config,
        device.clone(),
        registry,
        Arc::new(DescriptorResolver),
    )
    .await
    .unwrap();

    TestScheduler {
        scheduler,
        device,
        temp_dir,
    }
}

/// Open a second scheduler on the same database file
pub(crate) async fn reopen(
    previous: &TestScheduler,
    registry: StrategyRegistry,
) -> (CommandScheduler, Arc<SharedDeviceState>) {
    let mut config = (*previous.scheduler.get_config()).clone();
    config.persistence.database_path = previous.temp_dir.path().join("test.db");
    let device = Arc::new(SharedDeviceState::default());
    let scheduler = CommandScheduler::new(
        config,
        device.clone(),
        registry,
        Arc::new(DescriptorResolver),
    )
    .await
    .unwrap();
    (scheduler, device)
}

pub(crate) fn alice() -> AccountName {
    AccountName::new("alice@example.social")
}

/// Poll the scheduler's stats until `check` holds
pub(crate) async fn wait_for_stats(
    scheduler: &CommandScheduler,
    check: impl Fn(&QueueStats) -> bool,
) -> QueueStats {
    for _ in 0..300 {
        let stats = scheduler.stats().await;
        if check(&stats) {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scheduler never reached the expected state: {:?}", scheduler.stats().await);
}
