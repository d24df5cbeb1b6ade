//! REST API server module
//!
//! Exposes the scheduler over HTTP for dashboards and operators: submitting
//! and managing commands, inspecting the partitions and workers, and
//! following events.

use crate::{CommandScheduler, Config, Result};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error_response;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Commands
/// - `GET /commands` - List queued commands (`?queue=retry` filters by partition)
/// - `POST /commands` - Submit a command
/// - `DELETE /commands/:id` - Remove a command that is not executing
/// - `POST /commands/:id/retry` - Refill the retry budget and relaunch
/// - `POST /commands/:id/cancel` - Cancel a waiting or executing command
///
/// ## Queues
/// - `GET /queue/stats` - Partition sizes and worker counts
/// - `GET /queue/dump` - Plain-text dump
/// - `GET /queue/workers` - Live workers
/// - `POST /queue/heartbeat` - Re-evaluate the queues now
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /events` - Server-sent events stream
/// - `POST /shutdown` - Graceful shutdown
pub fn create_router(scheduler: Arc<CommandScheduler>, config: Arc<Config>) -> Router {
    let state = AppState::new(scheduler, config.clone());

    let router = Router::new()
        // Commands
        .route(
            "/commands",
            get(routes::list_commands).post(routes::submit_command),
        )
        .route("/commands/:id", delete(routes::delete_command))
        .route("/commands/:id/retry", post(routes::retry_command))
        .route("/commands/:id/cancel", post(routes::cancel_command))
        // Queues
        .route("/queue/stats", get(routes::queue_stats))
        .route("/queue/dump", get(routes::queue_dump))
        .route("/queue/workers", get(routes::list_workers))
        .route("/queue/heartbeat", post(routes::trigger_heartbeat))
        // System
        .route("/health", get(routes::health_check))
        .route("/events", get(routes::event_stream))
        .route("/shutdown", post(routes::shutdown))
        .with_state(state);

    let router = if config.api.api_key.is_some() {
        router.layer(middleware::from_fn_with_state(
            config.api.api_key.clone(),
            auth::require_api_key,
        ))
    } else {
        router
    };

    let router = router.layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer; `"*"` or an empty list allows any origin
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}

/// Serve the API on the configured bind address
///
/// Runs until the scheduler shuts down (including through `POST /shutdown`)
/// or the listener fails.
///
/// ```no_run
/// use command_scheduler::{CommandScheduler, Config, DescriptorResolver, StrategyRegistry};
/// use command_scheduler::device::SharedDeviceState;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default();
/// let scheduler = CommandScheduler::new(
///     config.clone(),
///     Arc::new(SharedDeviceState::default()),
///     StrategyRegistry::new(),
///     Arc::new(DescriptorResolver),
/// )
/// .await?;
/// scheduler.start().await?;
///
/// command_scheduler::api::start_api_server(Arc::new(scheduler), Arc::new(config)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(scheduler: Arc<CommandScheduler>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;
    let stopped = scheduler.shutdown_token.clone();
    let app = create_router(scheduler, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;
    let local_address = listener.local_addr().map_err(crate::error::Error::Io)?;
    tracing::info!(address = %local_address, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { stopped.cancelled_owned().await })
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

impl CommandScheduler {
    /// Spawn the API server in a background task
    pub fn spawn_api_server(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let scheduler = Arc::clone(self);
        let config = scheduler.get_config();
        tokio::spawn(async move { start_api_server(scheduler, config).await })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
