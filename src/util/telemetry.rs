//! Telemetry helpers for structured logging and tracing.

/// Initialize tracing. Embedders can install their own subscriber; this
/// helper installs a default env-filtered fmt subscriber if none is set.
///
/// Filter with `RUST_LOG`, e.g. `RUST_LOG=replica_dispatch=debug`.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .try_init();
}
