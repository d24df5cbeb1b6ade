//! Command type → strategy dispatch
//!
//! The registry is built once before the scheduler starts and never changes
//! afterwards. Types without a registered strategy resolve to
//! [`UnsupportedStrategy`].

mod builtin;
mod traits;

pub use builtin::{DeleteCommandStrategy, UnsupportedStrategy};
pub use traits::{CommandStrategy, ProgressReport, StrategyContext};

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::CommandType;

/// Maps each [`CommandType`] to the strategy that executes it
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<CommandType, Arc<dyn CommandStrategy>>,
    fallback: Arc<dyn CommandStrategy>,
}

impl StrategyRegistry {
    /// Empty registry; every type falls back to [`UnsupportedStrategy`]
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
            fallback: Arc::new(UnsupportedStrategy),
        }
    }

    /// Register `strategy` for `command_type`, replacing any previous one
    pub fn register(self, command_type: CommandType, strategy: impl CommandStrategy + 'static) -> Self {
        self.register_arc(command_type, Arc::new(strategy))
    }

    /// Register a shared strategy for `command_type`
    pub fn register_arc(
        mut self,
        command_type: CommandType,
        strategy: Arc<dyn CommandStrategy>,
    ) -> Self {
        if let Some(previous) = self.strategies.insert(command_type, strategy) {
            tracing::debug!(
                command_type = %command_type,
                previous = previous.name(),
                "Strategy replaced"
            );
        }
        self
    }

    /// Register one shared strategy for several types
    pub fn register_all(
        self,
        command_types: &[CommandType],
        strategy: Arc<dyn CommandStrategy>,
    ) -> Self {
        command_types.iter().fold(self, |registry, command_type| {
            registry.register_arc(*command_type, strategy.clone())
        })
    }

    /// Strategy for `command_type`
    pub fn get(&self, command_type: CommandType) -> Arc<dyn CommandStrategy> {
        self.strategies
            .get(&command_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Whether a strategy other than the fallback is registered
    pub fn is_registered(&self, command_type: CommandType) -> bool {
        self.strategies.contains_key(&command_type)
    }

    /// Registered types, in [`CommandType::ALL`] order
    pub fn registered_types(&self) -> Vec<CommandType> {
        CommandType::ALL
            .iter()
            .copied()
            .filter(|t| self.is_registered(*t))
            .collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("registered", &self.registered_types())
            .finish()
    }
}
