//! Shared helpers for the integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use salt_factories::config::{FactoriesConfig, LogServer};
use salt_factories::manager::{FactoriesManager, ManagerOptions};

/// Install the tracing subscriber once per test binary.
///
/// `RUST_LOG` controls verbosity. Repeated calls are fine, only the first
/// one wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// A manager over a default configuration with a freshly allocated log
/// server endpoint, rooted at a temporary directory.
pub fn manager() -> FactoriesManager {
    init_tracing();
    let log_server = LogServer::allocate().expect("failed to allocate a log server port");
    let config = FactoriesConfig::default_with(&log_server);
    FactoriesManager::new(config, ManagerOptions::default())
        .expect("failed to create the factories manager")
}
