//! Application state for the API server

use crate::{CommandScheduler, Config};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clone).
#[derive(Clone)]
pub struct AppState {
    /// The scheduler the handlers drive
    pub scheduler: Arc<CommandScheduler>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(scheduler: Arc<CommandScheduler>, config: Arc<Config>) -> Self {
        Self { scheduler, config }
    }
}
