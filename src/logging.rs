//! Subscriber setup for the CLI.
//!
//! The library only emits `tracing` events; without a subscriber they are
//! dropped.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "warehouse_fleet=info";

/// Install a formatted subscriber honouring `RUST_LOG`, falling back to
/// `warehouse_fleet=info`. Lines carry the thread name so per-robot loops
/// (`robot-<id>`) are distinguishable. Safe to call more than once.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVE))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}
