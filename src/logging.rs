//! Diagnostic output.
//!
//! Everything in the crate reports through `tracing`. [`init`] installs a
//! formatting subscriber for binaries and tests that have none of their own.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "webaudio_bridge=info";

/// Install a global subscriber filtered by `RUST_LOG`, falling back to
/// `webaudio_bridge=info`. Calling it more than once is harmless.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
