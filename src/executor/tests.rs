use super::*;
use crate::command::{
    Command, CommandType, DescriptorResolver, TimelineDescriptor, TimelineKind,
};
use crate::db::Database;
use crate::device::SharedDeviceState;
use crate::error::ExecutionError;
use crate::queue::QueueSet;
use crate::strategy::{CommandStrategy, StrategyContext};
use crate::types::{AccountName, QueueStats, QueueType};
use async_trait::async_trait;
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Test strategy with a fixed behavior
enum Scripted {
    Succeed,
    SoftFail,
    HardFail,
    Hang,
    Gate(Arc<Notify>),
    Report(&'static str),
}

#[async_trait]
impl CommandStrategy for Scripted {
    async fn execute(&self, context: &mut StrategyContext) -> Result<(), ExecutionError> {
        match self {
            Scripted::Succeed => {
                context.command.result.new_count = 1;
                Ok(())
            }
            Scripted::SoftFail => Err(ExecutionError::Io("connection reset".into())),
            Scripted::HardFail => Err(ExecutionError::Auth("token revoked".into())),
            Scripted::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Scripted::Gate(gate) => {
                gate.notified().await;
                Ok(())
            }
            Scripted::Report(progress) => {
                context.publish_progress(*progress);
                Ok(())
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Counts executions, always failing softly
struct CountingSoftFail(Arc<AtomicUsize>);

#[async_trait]
impl CommandStrategy for CountingSoftFail {
    async fn execute(&self, _context: &mut StrategyContext) -> Result<(), ExecutionError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(ExecutionError::Io("timed out".into()))
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

struct Pool {
    queues: Arc<QueueSet>,
    accessor: Arc<QueueAccessor>,
    executors: QueueExecutors,
    events: broadcast::Receiver<Event>,
    _temp_dir: TempDir,
}

async fn pool(registry: StrategyRegistry) -> Pool {
    pool_with(registry, |_| {}).await
}

async fn pool_with(registry: StrategyRegistry, configure: impl FnOnce(&mut Config)) -> Pool {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("workers.db"))
        .await
        .unwrap();
    let queues = Arc::new(QueueSet::new(Arc::new(db)));
    queues.load().await.unwrap();

    let mut config = Config::default();
    config.retry.jitter = false;
    configure(&mut config);
    let config = Arc::new(config);

    let device: Arc<dyn DeviceState> = Arc::new(SharedDeviceState::default());
    let (event_tx, events) = broadcast::channel(1024);
    let accessor = Arc::new(QueueAccessor::new(
        AccessorType::General,
        queues.clone(),
        device.clone(),
        config.clone(),
        event_tx.clone(),
    ));
    let env = Arc::new(WorkerEnv {
        registry: Arc::new(registry),
        resolver: Arc::new(DescriptorResolver),
        device,
        config: config.clone(),
        event_tx,
    });
    let executors =
        QueueExecutors::new(accessor.clone(), env, config.scheduler.max_general_workers);

    Pool {
        queues,
        accessor,
        executors,
        events,
        _temp_dir: temp_dir,
    }
}

fn alice() -> AccountName {
    AccountName::new("alice@example.social")
}

async fn wait_for_stats(queues: &QueueSet, check: impl Fn(&QueueStats) -> bool) -> QueueStats {
    for _ in 0..300 {
        let stats = queues.stats().await;
        if check(&stats) {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queues never reached the expected state: {:?}", queues.stats().await);
}

fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut all = Vec::new();
    while let Ok(event) = events.try_recv() {
        all.push(event);
    }
    all
}

#[tokio::test]
async fn test_pool_drains_and_files_every_outcome() {
    let registry = StrategyRegistry::new()
        .register(CommandType::GetTimeline, Scripted::Succeed)
        .register(CommandType::GetNote, Scripted::SoftFail)
        .register(CommandType::Follow, Scripted::HardFail);
    let mut p = pool(registry).await;

    p.accessor
        .admit(Command::get_timeline(alice(), TimelineKind::Home))
        .await;
    p.accessor
        .admit(Command::new(CommandType::GetNote, alice(), TimelineDescriptor::none()).with_item(7))
        .await;
    p.accessor
        .admit(Command::new(
            CommandType::Follow,
            alice(),
            TimelineDescriptor::for_actor(TimelineKind::Actor, 5),
        ))
        .await;

    assert_eq!(p.executors.ensure_executors_started().await, 2);
    assert!(p.executors.wait_idle(Duration::from_secs(5)).await);

    let stats = p.queues.stats().await;
    assert_eq!(stats.current, 0);
    assert_eq!(stats.executing, 0);
    assert_eq!(stats.retry, 1);
    assert_eq!(stats.error, 1);

    let routed: Vec<_> = drain(&mut p.events)
        .into_iter()
        .filter_map(|event| match event {
            Event::AfterExecute {
                command, routed_to, ..
            } => Some((command.command_type, routed_to)),
            _ => None,
        })
        .collect();
    assert_eq!(routed.len(), 3);
    assert!(routed.contains(&(CommandType::GetTimeline, None)));
    assert!(routed.contains(&(CommandType::GetNote, Some(QueueType::Retry))));
    assert!(routed.contains(&(CommandType::Follow, Some(QueueType::Error))));
}

#[tokio::test]
async fn test_pool_never_exceeds_its_cap() {
    let registry = StrategyRegistry::new().register(CommandType::GetTimeline, Scripted::Hang);
    let p = pool(registry).await;
    for kind in [
        TimelineKind::Home,
        TimelineKind::Notifications,
        TimelineKind::Public,
        TimelineKind::Private,
    ] {
        p.accessor.admit(Command::get_timeline(alice(), kind)).await;
    }

    assert_eq!(p.executors.ensure_executors_started().await, 2);
    wait_for_stats(&p.queues, |s| s.executing == 2).await;
    assert_eq!(p.executors.running().await, 2);
    assert_eq!(p.executors.ensure_executors_started().await, 0);
    assert_eq!(p.queues.stats().await.current, 2);

    let workers = p.executors.workers().await;
    assert_eq!(workers.len(), 2);
    assert!(workers.iter().all(|w| w.current.is_some()));

    p.executors.stop(true).await;
    assert!(p.executors.wait_idle(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_no_workers_without_runnable_work() {
    let p = pool(StrategyRegistry::new()).await;
    assert_eq!(p.executors.ensure_executors_started().await, 0);

    // Delayed commands are not runnable yet
    let mut delayed = Command::get_timeline(alice(), TimelineKind::Home);
    delayed.result.delay_till(crate::command::now_ms() + 60_000);
    p.accessor.admit(delayed).await;
    assert_eq!(p.executors.ensure_executors_started().await, 0);
}

#[tokio::test]
async fn test_soft_failures_exhaust_the_retry_budget() {
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = StrategyRegistry::new()
        .register(CommandType::GetNote, CountingSoftFail(runs.clone()));
    let p = pool_with(registry, |config| {
        config.retry.initial_delay = Duration::ZERO;
        config.scheduler.retry_queue_processing_period = Duration::ZERO;
    })
    .await;

    let mut command =
        Command::new(CommandType::GetNote, alice(), TimelineDescriptor::none()).with_item(42);
    command.result.retries_left = 3;
    let id = command.id;
    p.accessor.admit(command).await;

    p.executors.ensure_executors_started().await;
    wait_for_stats(&p.queues, |s| s.error == 1).await;
    assert!(p.executors.wait_idle(Duration::from_secs(5)).await);

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    let (queue, failed) = p.queues.find(id).await.unwrap();
    assert_eq!(queue, QueueType::Error);
    assert_eq!(failed.result.execution_count, 3);
    assert_eq!(failed.result.retries_left, 0);
    assert_eq!(p.queues.stats().await.retry, 0);
}

#[tokio::test]
async fn test_stalled_worker_is_cancelled_and_its_command_retried() {
    let registry = StrategyRegistry::new().register(CommandType::GetTimeline, Scripted::Hang);
    let p = pool_with(registry, |config| {
        config.scheduler.max_execution_time = Duration::from_millis(100);
    })
    .await;
    let command = Command::get_timeline(alice(), TimelineKind::Home);
    let id = command.id;
    p.accessor.admit(command).await;

    assert_eq!(p.executors.ensure_executors_started().await, 1);
    wait_for_stats(&p.queues, |s| s.executing == 1).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    // The supervisor evicts the worker; the command is filed as a soft failure
    p.executors.ensure_executors_started().await;
    wait_for_stats(&p.queues, |s| s.retry == 1 && s.executing == 0).await;

    let (_, retried) = p.queues.find(id).await.unwrap();
    assert_eq!(retried.result.io_errors, 1);
    assert!(retried.result.message.contains("cancelled"));
    assert!(retried.result.delayed_till.is_some());
    assert_eq!(p.executors.running().await, 0);
}

#[tokio::test]
async fn test_graceful_stop_finishes_the_current_command_only() {
    let gate = Arc::new(Notify::new());
    let registry = StrategyRegistry::new()
        .register(CommandType::GetTimeline, Scripted::Gate(gate.clone()));
    let registry = registry.register(CommandType::GetOlderTimeline, Scripted::Succeed);
    let mut p = pool_with(registry, |config| config.scheduler.max_general_workers = 1).await;

    p.accessor
        .admit(Command::get_timeline(alice(), TimelineKind::Home))
        .await;
    p.executors.ensure_executors_started().await;
    wait_for_stats(&p.queues, |s| s.executing == 1).await;

    let older = Command::new(
        CommandType::GetOlderTimeline,
        alice(),
        TimelineDescriptor::of_kind(TimelineKind::Home),
    );
    p.accessor.admit(older).await;

    assert_eq!(p.executors.stop(false).await, 1);
    gate.notify_one();
    assert!(p.executors.wait_idle(Duration::from_secs(5)).await);

    let stats = p.queues.stats().await;
    assert_eq!(stats.executing, 0);
    assert_eq!(stats.current, 1);
    assert_eq!(p.executors.ensure_executors_started().await, 0);

    let stopped = drain(&mut p.events).into_iter().any(|event| {
        matches!(
            event,
            Event::PoolStopped {
                accessor: AccessorType::General,
                forced: false,
                still_running: 1,
            }
        )
    });
    assert!(stopped);
}

#[tokio::test]
async fn test_forced_stop_files_in_flight_commands_as_stale() {
    let registry = StrategyRegistry::new().register(CommandType::GetTimeline, Scripted::Hang);
    let p = pool(registry).await;
    let command = Command::get_timeline(alice(), TimelineKind::Home);
    let id = command.id;
    p.accessor.admit(command).await;

    p.executors.ensure_executors_started().await;
    wait_for_stats(&p.queues, |s| s.executing == 1).await;

    p.executors.stop(true).await;
    assert!(p.executors.wait_idle(Duration::from_secs(5)).await);

    let (queue, stale) = p.queues.find(id).await.unwrap();
    assert_eq!(queue, QueueType::Retry);
    assert!(!stale.result.cancelled);
    assert_eq!(stale.result.io_errors, 1);
}

#[tokio::test]
async fn test_cancelling_one_command_keeps_the_worker_going() {
    let registry = StrategyRegistry::new()
        .register(CommandType::GetTimeline, Scripted::Hang)
        .register(CommandType::GetOlderTimeline, Scripted::Succeed);
    let mut p = pool_with(registry, |config| config.scheduler.max_general_workers = 1).await;

    let hanging = Command::get_timeline(alice(), TimelineKind::Home);
    let id = hanging.id;
    p.accessor.admit(hanging).await;
    p.executors.ensure_executors_started().await;
    wait_for_stats(&p.queues, |s| s.executing == 1).await;
    p.accessor
        .admit(Command::new(
            CommandType::GetOlderTimeline,
            alice(),
            TimelineDescriptor::of_kind(TimelineKind::Home),
        ))
        .await;

    p.queues.lock().await.request_cancel(id);
    assert!(p.executors.cancel_command(id).await);
    assert!(!p.executors.cancel_command(CommandId(-1)).await);
    assert!(p.executors.wait_idle(Duration::from_secs(5)).await);

    assert_eq!(p.queues.stats().await.total(), 0);
    let events = drain(&mut p.events);
    let cancelled = events.iter().any(|event| {
        matches!(
            event,
            Event::AfterExecute { command, result, routed_to: None }
                if command.id == id && result.cancelled
        )
    });
    assert!(cancelled);
    let older_ran = events.iter().any(|event| {
        matches!(
            event,
            Event::AfterExecute { command, routed_to: None, .. }
                if command.command_type == CommandType::GetOlderTimeline
        )
    });
    assert!(older_ran);
}

#[tokio::test]
async fn test_posting_schedules_a_home_timeline_sync() {
    let registry = StrategyRegistry::new()
        .register(CommandType::UpdateNote, Scripted::Succeed)
        .register(CommandType::GetTimeline, Scripted::Succeed);
    let mut p = pool(registry).await;

    p.accessor
        .admit(
            Command::new(CommandType::UpdateNote, alice(), TimelineDescriptor::none())
                .with_item(9)
                .in_foreground(true),
        )
        .await;
    p.executors.ensure_executors_started().await;
    wait_for_stats(&p.queues, |s| s.total() == 0).await;
    assert!(p.executors.wait_idle(Duration::from_secs(5)).await);

    let synced = drain(&mut p.events).into_iter().any(|event| match event {
        Event::AfterExecute { command, .. } => {
            command.command_type == CommandType::GetTimeline
                && command.account == alice()
                && command.in_foreground
        }
        _ => false,
    });
    assert!(synced);
}

#[tokio::test]
async fn test_progress_is_broadcast_with_its_command() {
    let registry =
        StrategyRegistry::new().register(CommandType::GetTimeline, Scripted::Report("page 1"));
    let mut p = pool(registry).await;
    let command = Command::get_timeline(alice(), TimelineKind::Home);
    let id = command.id;
    p.accessor.admit(command).await;

    p.executors.ensure_executors_started().await;
    assert!(p.executors.wait_idle(Duration::from_secs(5)).await);

    let reported = drain(&mut p.events).into_iter().any(|event| {
        matches!(event, Event::Progress { command, progress } if command.id == id && progress == "page 1")
    });
    assert!(reported);
}

#[tokio::test]
async fn test_unregistered_type_lands_in_error() {
    let p = pool(StrategyRegistry::new()).await;
    let command = Command::get_timeline(alice(), TimelineKind::Home);
    let id = command.id;
    p.accessor.admit(command).await;

    p.executors.ensure_executors_started().await;
    assert!(p.executors.wait_idle(Duration::from_secs(5)).await);

    let (queue, failed) = p.queues.find(id).await.unwrap();
    assert_eq!(queue, QueueType::Error);
    assert_eq!(failed.result.parse_errors, 1);
}
