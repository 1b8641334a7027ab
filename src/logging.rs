/// Structured logging setup shared by every binary entry point.
use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber reading its filter from `RUST_LOG`,
/// defaulting to `info` when unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
