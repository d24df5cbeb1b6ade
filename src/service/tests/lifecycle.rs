use crate::command::{Command, CommandType, TimelineKind};
use crate::device::ConnectionState;
use crate::queue::INTERRUPTED_MESSAGE;
use crate::service::test_helpers::*;
use crate::strategy::StrategyRegistry;
use crate::types::{AccessorType, Event, QueueType};
use std::time::Duration;

fn hanging_registry() -> StrategyRegistry {
    StrategyRegistry::new().register(CommandType::GetTimeline, TestStrategy::Hang)
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let ts = create_test_scheduler().await;
    ts.scheduler.start().await.unwrap();
    ts.scheduler.start().await.unwrap();
    assert!(!ts.scheduler.db.was_unclean_shutdown().await.unwrap());
    ts.scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_skipped_command_survives_restart_and_runs_when_online() {
    let ts = create_test_scheduler().await;
    ts.device.set_connection_state(ConnectionState::Offline);
    ts.scheduler.start().await.unwrap();
    let command = Command::get_timeline(alice(), TimelineKind::Home);
    let id = command.id;
    ts.scheduler.submit(command).await.unwrap();
    ts.scheduler.shutdown().await.unwrap();

    let (restarted, _device) = reopen(&ts, succeeding_registry()).await;
    restarted.start().await.unwrap();
    let (queue, _) = restarted.queues.find(id).await.unwrap();
    assert_eq!(queue, QueueType::Skipped);

    // The new device state is online
    let report = restarted.heartbeat_tick().await;
    assert_eq!(report.rehabilitated, 1);
    wait_for_stats(&restarted, |s| s.total() == 0).await;
    restarted.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_files_in_flight_commands_for_next_session() {
    let ts = create_test_scheduler_with(hanging_registry(), |_| {}).await;
    ts.scheduler.start().await.unwrap();
    let mut events = ts.scheduler.subscribe();

    let command = Command::get_timeline(alice(), TimelineKind::Home);
    let id = command.id;
    ts.scheduler.submit(command).await.unwrap();
    wait_for_stats(&ts.scheduler, |s| s.executing == 1).await;

    ts.scheduler.shutdown().await.unwrap();
    assert!(!ts.scheduler.db.was_unclean_shutdown().await.unwrap());

    let events: Vec<Event> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::PoolStopped {
            accessor: AccessorType::General,
            forced: true,
            ..
        }
    )));
    assert!(matches!(events.last(), Some(Event::Shutdown)));

    let (restarted, _device) = reopen(&ts, hanging_registry()).await;
    restarted.start().await.unwrap();
    let (queue, stale) = restarted.queues.find(id).await.unwrap();
    assert_eq!(queue, QueueType::Retry);
    assert_eq!(stale.result.io_errors, 1);
    assert_eq!(stale.result.execution_count, 1);
    restarted.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_commands_interrupted_by_a_crash_land_in_error() {
    let ts = create_test_scheduler_with(hanging_registry(), |_| {}).await;
    ts.scheduler.start().await.unwrap();
    let command = Command::get_timeline(alice(), TimelineKind::Home);
    let id = command.id;
    ts.scheduler.submit(command).await.unwrap();
    wait_for_stats(&ts.scheduler, |s| s.executing == 1).await;

    // Persist mid-execution and never shut down
    ts.scheduler.queues.save().await.unwrap();

    let (restarted, _device) = reopen(&ts, succeeding_registry()).await;
    assert!(restarted.db.was_unclean_shutdown().await.unwrap());
    restarted.start().await.unwrap();

    let (queue, interrupted) = restarted.queues.find(id).await.unwrap();
    assert_eq!(queue, QueueType::Error);
    assert_eq!(interrupted.result.message, INTERRUPTED_MESSAGE);
    assert_eq!(restarted.stats().await.general_workers, 0);
}

#[tokio::test]
async fn test_heartbeat_reacts_to_connectivity_on_its_own() {
    let ts = create_test_scheduler_with(succeeding_registry(), |config| {
        config.scheduler.heartbeat_interval = Duration::from_millis(50);
    })
    .await;
    ts.device.set_connection_state(ConnectionState::Offline);
    ts.scheduler.start().await.unwrap();

    ts.scheduler
        .submit(Command::get_avatar(alice(), 4))
        .await
        .unwrap();
    assert_eq!(ts.scheduler.stats().await.skipped, 1);

    ts.device.set_connection_state(ConnectionState::Wifi);
    wait_for_stats(&ts.scheduler, |s| s.total() == 0).await;
    ts.scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dump_shows_queues_and_workers() {
    let ts = create_test_scheduler_with(hanging_registry(), |_| {}).await;
    ts.scheduler.start().await.unwrap();
    ts.scheduler
        .submit(Command::get_timeline(alice(), TimelineKind::Home))
        .await
        .unwrap();
    wait_for_stats(&ts.scheduler, |s| s.executing == 1 && s.general_workers == 1).await;

    let dump = ts.scheduler.dump().await;
    assert!(dump.contains("executing (1):"));
    assert!(dump.contains("general workers (1/2)"));
    assert!(dump.contains("downloads workers (0/3)"));
    assert!(dump.contains("running Sync timeline"));

    let workers = ts.scheduler.workers().await;
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].0, AccessorType::General);

    ts.scheduler.shutdown().await.unwrap();
    assert!(ts.scheduler.dump().await.contains("stopped"));
}
