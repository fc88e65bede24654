//! # TCC Testkit
//!
//! Shared fixtures for coordinator tests: scripted actions, a transaction
//! manager with injectable failures, and tracing setup.

#![allow(missing_docs)]

pub mod actions;
pub mod manager;

pub use actions::{ScriptedAction, ServiceScript};
pub use manager::FaultyManager;

use std::sync::Arc;
use std::time::Duration;
use tcc_core::CoordinatorConfig;
use tcc_coordinator::{ActionTable, Coordinator};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber; honours `RUST_LOG`, defaults to `warn`.
///
/// Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A coordinator wired to a [`FaultyManager`], plus handles to its parts
pub struct Fixture {
    pub coordinator: Coordinator,
    pub actions: Arc<ActionTable>,
    pub manager: Arc<FaultyManager>,
}

impl Fixture {
    pub fn new(config: CoordinatorConfig) -> Self {
        init_tracing();
        let actions = Arc::new(ActionTable::new());
        let manager = Arc::new(FaultyManager::new());
        let coordinator =
            Coordinator::new(config, actions.clone()).with_manager(manager.clone());
        Self {
            coordinator,
            actions,
            manager,
        }
    }

    /// Fixture whose End deadline is `timeout`
    pub fn with_end_timeout(timeout: Duration) -> Self {
        Self::new(CoordinatorConfig::default().with_end_timeout(timeout))
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}
