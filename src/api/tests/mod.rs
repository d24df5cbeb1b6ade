use super::*;
use crate::service::test_helpers::{TestScheduler, create_test_scheduler, create_test_scheduler_with, succeeding_registry};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

mod commands;
mod queue;

/// Router over the test scheduler, using the scheduler's own config
fn router_for(test: &TestScheduler) -> Router {
    let scheduler = Arc::new(test.scheduler.clone());
    let config = scheduler.get_config();
    create_router(scheduler, config)
}

/// Send one request and collect the body
async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn api_server_stops_with_the_scheduler() {
    let test = create_test_scheduler_with(succeeding_registry(), |config| {
        config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    })
    .await;
    let scheduler = Arc::new(test.scheduler.clone());
    scheduler.start().await.unwrap();

    let handle = scheduler.spawn_api_server();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    scheduler.shutdown().await.unwrap();
    let served = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop after shutdown")
        .unwrap();
    assert!(served.is_ok());
}

#[tokio::test]
async fn cors_headers_present_when_enabled() {
    let test = create_test_scheduler().await;
    let app = router_for(&test);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("Origin", "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn cors_can_be_disabled() {
    let test = create_test_scheduler_with(succeeding_registry(), |config| {
        config.api.cors_enabled = false;
    })
    .await;
    let app = router_for(&test);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("Origin", "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(!response.headers().contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn api_key_guards_every_route() {
    let test = create_test_scheduler_with(succeeding_registry(), |config| {
        config.api.api_key = Some("test-secret-key".to_string());
    })
    .await;
    let app = router_for(&test);

    let (status, _) = send(&app, Method::GET, "/queue/stats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/queue/stats")
                .header("X-Api-Key", "test-secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn cors_layer_accepts_explicit_origins() {
    // a list without "*" must not panic on an unparsable entry
    let _layer = build_cors_layer(&[
        "http://localhost:3000".to_string(),
        "not a header\nvalue".to_string(),
    ]);
}
