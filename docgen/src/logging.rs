//! Diagnostic tracing for the generator and the agents it spawns.
//!
//! Tracing goes to stderr and is never part of the product output: the
//! rendered document, its sidecar and analysis transcripts are written
//! regardless of `RUST_LOG`. Agent stdout/stderr lines arrive under the
//! `docgen::agent` target.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=docgen=debug,docgen::agent=info docgen generate architecture-vision .
/// ```
pub fn init() {
    init_with_default("warn");
}

/// Like [`init`], with a caller-chosen filter when `RUST_LOG` is unset.
pub fn init_with_default(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
