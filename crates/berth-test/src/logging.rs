//! Test logging.

use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness's captured writer.
///
/// Honors `RUST_LOG`, defaulting to `debug` for the berth crates. Safe to
/// call from every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,berth_container=debug,berth_manager=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .try_init();
}
