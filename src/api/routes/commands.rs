//! Command management handlers.

use super::{CommandEntry, ListCommandsQuery, NewCommandRequest, SubmitResponse};
use crate::api::AppState;
use crate::api::error_response::{bad_request, conflict};
use crate::types::CommandId;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// GET /commands - List queued commands, optionally of one partition
pub async fn list_commands(
    State(state): State<AppState>,
    Query(query): Query<ListCommandsQuery>,
) -> impl IntoResponse {
    let entries: Vec<CommandEntry> = state
        .scheduler
        .list()
        .await
        .into_iter()
        .filter(|(queue, _)| query.queue.is_none_or(|wanted| wanted == *queue))
        .map(|(queue, command)| CommandEntry::new(queue, command))
        .collect();
    Json(entries)
}

/// POST /commands - Submit a command
///
/// 201 when queued, 200 when an equal command was already scheduled.
pub async fn submit_command(
    State(state): State<AppState>,
    Json(request): Json<NewCommandRequest>,
) -> Response {
    let command = match request.into_command() {
        Ok(command) => command,
        Err(message) => return bad_request(message),
    };
    let id = command.id.get();

    match state.scheduler.submit(command).await {
        Ok(true) => (
            StatusCode::CREATED,
            Json(SubmitResponse { id, accepted: true }),
        )
            .into_response(),
        Ok(false) => (
            StatusCode::OK,
            Json(SubmitResponse {
                id,
                accepted: false,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /commands/:id - Remove a command that is not executing
pub async fn delete_command(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.scheduler.delete_command(CommandId(id)).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => conflict(
            "command_executing",
            format!("command {id} is executing; cancel it instead"),
        ),
        Err(e) => e.into_response(),
    }
}

/// POST /commands/:id/retry - Refill the retry budget and relaunch
pub async fn retry_command(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.scheduler.reset_retries(CommandId(id)).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => conflict(
            "command_executing",
            format!("command {id} is executing"),
        ),
        Err(e) => e.into_response(),
    }
}

/// POST /commands/:id/cancel - Cancel a waiting or executing command
pub async fn cancel_command(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.scheduler.cancel(CommandId(id)).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
