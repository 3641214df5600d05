//! Logging initialization.
//!
//! Downstream binaries embedding this crate get one canonical way to wire
//! up `tracing`: an `EnvFilter` driven by `RUST_LOG`, falling back to the
//! level passed in.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Safe to call more than once;
/// later calls are ignored.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
