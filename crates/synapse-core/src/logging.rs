//! Tracing subscriber setup.
//!
//! Host binaries call [`init_logging`] once at startup. `RUST_LOG` overrides
//! the default filter; invalid values fall back rather than aborting.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `default_filter` applies when `RUST_LOG` is unset or unparseable
/// (e.g. `"synapse=info"`). Calling twice is a no-op: the second
/// `try_init` result is discarded.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
