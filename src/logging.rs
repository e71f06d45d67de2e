//! Subscriber setup for binaries and tests embedding the exporter.
//!
//! The library itself only emits through `log` and `tracing`; nothing is
//! printed unless the host installs a subscriber.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// `log` records are forwarded into it. Returns `false` if a global
/// subscriber was already installed, which is not an error.
pub fn init_logging() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
