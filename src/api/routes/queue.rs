//! Queue-wide read handlers.

use crate::api::AppState;
use crate::executor::WorkerInfo;
use crate::types::AccessorType;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

/// One entry of GET /queue/workers
#[derive(Debug, Serialize)]
pub struct WorkerEntry {
    /// Pool the worker belongs to
    pub accessor: AccessorType,
    /// Worker snapshot
    #[serde(flatten)]
    pub worker: WorkerInfo,
}

/// GET /queue/stats - Partition sizes and live worker counts
pub async fn queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.stats().await)
}

/// GET /queue/dump - Plain-text dump of every partition and worker
pub async fn queue_dump(State(state): State<AppState>) -> String {
    state.scheduler.dump().await
}

/// GET /queue/workers - Live workers of both pools
pub async fn list_workers(State(state): State<AppState>) -> impl IntoResponse {
    let workers: Vec<WorkerEntry> = state
        .scheduler
        .workers()
        .await
        .into_iter()
        .map(|(accessor, worker)| WorkerEntry { accessor, worker })
        .collect();
    Json(workers)
}

/// POST /queue/heartbeat - Re-evaluate the queues now
///
/// For clients that just changed connectivity or preferences.
pub async fn trigger_heartbeat(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.heartbeat_tick().await)
}
