//! Process-wide tracing setup shared by tempo binaries.

use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies
/// (e.g. `"info,tower_http=debug"`).
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}
