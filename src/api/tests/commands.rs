use super::*;
use crate::command::CommandType;
use crate::error::ExecutionError;
use crate::service::test_helpers::{TestStrategy, wait_for_stats};
use crate::strategy::StrategyRegistry;
use serde_json::json;

fn home_sync() -> Value {
    json!({
        "command_type": "get_timeline",
        "account": "alice@example.social",
        "timeline": { "kind": "home" },
        "in_foreground": true
    })
}

#[tokio::test]
async fn submit_lists_and_runs_a_command() {
    let test = create_test_scheduler().await;
    let app = router_for(&test);

    let (status, body) = send_json(&app, Method::POST, "/commands", Some(home_sync())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["accepted"], true);
    let id = body["id"].as_i64().unwrap();

    // not started yet: held in pre-admission
    let (status, listed) = send_json(&app, Method::GET, "/commands", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = listed.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], id);
    assert_eq!(entries[0]["queue"], "pre_admission");
    assert_eq!(entries[0]["command_type"], "get_timeline");
    assert!(
        entries[0]["description"]
            .as_str()
            .unwrap()
            .contains("alice@example.social")
    );

    test.scheduler.start().await.unwrap();
    wait_for_stats(&test.scheduler, |s| s.total() == 0).await;

    let (_, listed) = send_json(&app, Method::GET, "/commands", None).await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn equal_submission_is_reported_as_not_accepted() {
    let test = create_test_scheduler().await;
    let app = router_for(&test);

    let (status, _) = send_json(&app, Method::POST, "/commands", Some(home_sync())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send_json(&app, Method::POST, "/commands", Some(home_sync())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], false);
    assert_eq!(test.scheduler.stats().await.pre_admission, 1);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let test = create_test_scheduler().await;
    let app = router_for(&test);

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/commands",
        Some(json!({ "command_type": "like", "item_id": 9 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    // unknown type fails deserialization
    let (status, _) = send(
        &app,
        Method::POST,
        "/commands",
        Some(json!({ "command_type": "teleport", "account": "a@b" })),
    )
    .await;
    assert!(status.is_client_error());
    assert_eq!(test.scheduler.stats().await.total(), 0);
}

#[tokio::test]
async fn unknown_ids_are_404() {
    let test = create_test_scheduler().await;
    let app = router_for(&test);

    for (method, uri) in [
        (Method::DELETE, "/commands/12345"),
        (Method::POST, "/commands/12345/cancel"),
        (Method::POST, "/commands/12345/retry"),
    ] {
        let (status, body) = send_json(&app, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["error"]["code"], "not_found");
    }
}

#[tokio::test]
async fn delete_and_cancel_remove_waiting_commands() {
    let test = create_test_scheduler().await;
    let app = router_for(&test);

    let (_, first) = send_json(&app, Method::POST, "/commands", Some(home_sync())).await;
    let (_, second) = send_json(
        &app,
        Method::POST,
        "/commands",
        Some(json!({
            "command_type": "get_avatar",
            "account": "alice@example.social",
            "timeline": { "kind": "actor", "actor_id": 7 }
        })),
    )
    .await;

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/commands/{}", first["id"]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/commands/{}/cancel", second["id"]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(test.scheduler.stats().await.total(), 0);
}

#[tokio::test]
async fn executing_command_cannot_be_deleted_but_can_be_cancelled() {
    let registry = StrategyRegistry::new().register(CommandType::GetTimeline, TestStrategy::Hang);
    let test = create_test_scheduler_with(registry, |_| {}).await;
    test.scheduler.start().await.unwrap();
    let app = router_for(&test);

    let (_, body) = send_json(&app, Method::POST, "/commands", Some(home_sync())).await;
    wait_for_stats(&test.scheduler, |s| s.executing == 1).await;

    let uri = format!("/commands/{}", body["id"]);
    let (status, error) = send_json(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "command_executing");

    let (status, _) = send(&app, Method::POST, &format!("{uri}/cancel"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    wait_for_stats(&test.scheduler, |s| s.executing == 0).await;
}

#[tokio::test]
async fn failed_command_is_listed_and_relaunched() {
    let registry = StrategyRegistry::new().register(
        CommandType::GetTimeline,
        TestStrategy::Fail(ExecutionError::Auth("401 Unauthorized".into())),
    );
    let test = create_test_scheduler_with(registry, |_| {}).await;
    test.scheduler.start().await.unwrap();
    let app = router_for(&test);

    let (_, body) = send_json(&app, Method::POST, "/commands", Some(home_sync())).await;
    wait_for_stats(&test.scheduler, |s| s.error == 1).await;

    let (status, listed) = send_json(&app, Method::GET, "/commands?queue=error", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = listed.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], body["id"]);
    assert!(entries[0]["status"].as_str().unwrap().contains("auth:1"));

    let (_, none) = send_json(&app, Method::GET, "/commands?queue=retry", None).await;
    assert!(none.as_array().unwrap().is_empty());

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/commands/{}/retry", body["id"]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // runs again and fails hard again, keeping its history
    wait_for_stats(&test.scheduler, |s| s.error == 1).await;
    let (queue, command) = test.scheduler.list().await.pop().unwrap();
    assert_eq!(queue, crate::types::QueueType::Error);
    assert_eq!(command.id.get(), body["id"].as_i64().unwrap());
    assert_eq!(command.result.execution_count, 2);
}

#[tokio::test]
async fn submit_after_shutdown_is_503() {
    let test = create_test_scheduler().await;
    test.scheduler.start().await.unwrap();
    test.scheduler.shutdown().await.unwrap();
    let app = router_for(&test);

    let (status, body) = send_json(&app, Method::POST, "/commands", Some(home_sync())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "shutting_down");
}
