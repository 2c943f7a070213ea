//! Logging setup
//!
//! The runtime logs through `tracing` with `gdbridge::*` targets. Installing a
//! subscriber is left to the embedder unless the configuration asks for it.

use tracing_subscriber::EnvFilter;

use crate::config::BridgeConfig;

/// Install a formatting subscriber filtered by `config.log_filter`.
///
/// Returns `false` when another global subscriber is already installed.
pub fn init(config: &BridgeConfig) -> bool {
    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(BridgeConfig::default().log_filter));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(target: "gdbridge::bridge", filter = %config.log_filter, "Logger installed");
    }
    installed
}
