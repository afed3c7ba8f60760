//! Structured logging setup.
//!
//! The proxy has no blockchain RPC calls to correlate across process
//! boundaries, so tracing here is a thin wrapper over
//! `tracing-subscriber`'s `EnvFilter`, controlled entirely by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// Safe to call once at process start, before any component is
/// constructed. A second call is a no-op (logged at `warn`).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
    if let Err(err) = result {
        eprintln!("tracing subscriber already initialized: {err}");
    }
}
