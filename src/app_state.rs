//! Shared state handed to every connection task.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::domain::RoomRegistry;

/// State shared by the accept loop and all connection tasks.
#[derive(Debug, Clone)]
pub struct RelayState {
    /// Process-wide room registry.
    pub registry: Arc<RoomRegistry>,
    /// Immutable runtime configuration.
    pub config: Arc<RelayConfig>,
}

impl RelayState {
    /// Creates state with an empty registry.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(RoomRegistry::new()),
            config: Arc::new(config),
        }
    }
}
