//! System handlers: health, events, shutdown.

use crate::api::AppState;
use crate::types::Event;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// GET /health - Health check
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "accepting": state.scheduler.is_accepting(),
    }))
}

/// SSE event name of a scheduler event
fn event_name(event: &Event) -> &'static str {
    match event {
        Event::Admitted { .. } => "admitted",
        Event::Skipped { .. } => "skipped",
        Event::BeforeExecute { .. } => "before_execute",
        Event::Progress { .. } => "progress",
        Event::AfterExecute { .. } => "after_execute",
        Event::Cancelled { .. } => "cancelled",
        Event::Deleted { .. } => "deleted",
        Event::PoolStopped { .. } => "pool_stopped",
        Event::Shutdown => "shutdown",
    }
}

/// GET /events - Server-sent events stream
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.scheduler.subscribe());

    let sse_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(data) => Some(Ok(SseEvent::default().event(event_name(&event)).data(data))),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize event to JSON");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "SSE client lagged");
            Some(Ok(SseEvent::default()
                .event("error")
                .data(json!({ "error": "lagged", "skipped": skipped }).to_string())))
        }
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

/// POST /shutdown - Graceful shutdown
///
/// Answers 202 right away; the scheduler shuts down in the background and
/// the API server stops with it.
pub async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        // let the response go out first
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Err(e) = scheduler.shutdown().await {
            tracing::error!(error = %e, "Error during graceful shutdown");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "shutdown initiated"})),
    )
}
