//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter used when neither `RUST_LOG` nor the config provides one.
pub const DEFAULT_LOG_FILTER: &str = "info,tessera=debug";

/// Initialize tracing with the default filter.
///
/// `RUST_LOG` takes precedence when set.
///
/// # Example
/// ```
/// tessera_core::init_logging();
/// tracing::info!("Logging ready");
/// ```
pub fn init_logging() {
    init_logging_with(DEFAULT_LOG_FILTER);
}

/// Initialize tracing, falling back to `default_filter` when `RUST_LOG` is unset
/// or unparsable.
///
/// Calling this twice is harmless; the second subscriber is discarded.
pub fn init_logging_with(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();

    if result.is_err() {
        tracing::debug!("Global subscriber already installed, keeping the existing one");
    }
}
