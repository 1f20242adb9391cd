//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::progress::ProgressBroadcaster;
use crate::transfer::TransferCoordinator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    coordinator: TransferCoordinator,
    progress: ProgressBroadcaster,
}

impl AppState {
    /// Create a new application state
    ///
    /// The coordinator publishes upload progress into the broadcaster
    /// served by the progress listener.
    pub fn new(config: Config) -> Self {
        let progress = ProgressBroadcaster::new();
        let coordinator = TransferCoordinator::new(&config, Arc::new(progress.clone()));

        Self {
            inner: Arc::new(AppStateInner {
                config,
                coordinator,
                progress,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the transfer coordinator
    pub fn coordinator(&self) -> &TransferCoordinator {
        &self.inner.coordinator
    }

    /// Get the progress broadcaster
    pub fn progress(&self) -> &ProgressBroadcaster {
        &self.inner.progress
    }
}
