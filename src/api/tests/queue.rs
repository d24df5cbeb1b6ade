use super::*;
use crate::command::{Command, CommandType, TimelineKind};
use crate::device::ConnectionState;
use crate::service::test_helpers::{TestStrategy, alice, wait_for_stats};
use crate::strategy::StrategyRegistry;

#[tokio::test]
async fn stats_reports_partitions_and_workers() {
    let registry = StrategyRegistry::new().register(CommandType::GetTimeline, TestStrategy::Hang);
    let test = create_test_scheduler_with(registry, |_| {}).await;
    test.scheduler.start().await.unwrap();
    test.scheduler
        .submit(Command::get_timeline(alice(), TimelineKind::Home))
        .await
        .unwrap();
    wait_for_stats(&test.scheduler, |s| s.executing == 1).await;
    let app = router_for(&test);

    let (status, stats) = send_json(&app, Method::GET, "/queue/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["executing"], 1);
    assert_eq!(stats["general_workers"], 1);
    assert_eq!(stats["download_workers"], 0);
    assert_eq!(stats["error"], 0);

    let (status, workers) = send_json(&app, Method::GET, "/queue/workers", None).await;
    assert_eq!(status, StatusCode::OK);
    let workers = workers.as_array().unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["accessor"], "general");
    assert!(workers[0]["current"].as_str().unwrap().contains("Sync timeline"));
}

#[tokio::test]
async fn dump_is_plain_text() {
    let test = create_test_scheduler().await;
    test.scheduler.start().await.unwrap();
    let app = router_for(&test);

    let (status, body) = send(&app, Method::GET, "/queue/dump", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("general workers (0/"));
    assert!(text.contains("downloads workers (0/"));
}

#[tokio::test]
async fn heartbeat_endpoint_rehabilitates_skipped_commands() {
    let test = create_test_scheduler().await;
    test.device.set_connection_state(ConnectionState::Offline);
    test.scheduler.start().await.unwrap();
    test.scheduler
        .submit(Command::get_timeline(alice(), TimelineKind::Home))
        .await
        .unwrap();
    assert_eq!(test.scheduler.stats().await.skipped, 1);
    let app = router_for(&test);

    test.device.set_connection_state(ConnectionState::Wifi);
    let (status, report) = send_json(&app, Method::POST, "/queue/heartbeat", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["rehabilitated"], 1);
    assert_eq!(report["workers_started"], 1);

    wait_for_stats(&test.scheduler, |s| s.total() == 0).await;
}
