#![forbid(unsafe_code)]

//! Production logging bootstrap.
//!
//! The controller emits `tracing` events with structured fields
//! (`widget_id`, `state`, `attempts`). Hosts that want JSON lines on
//! stderr call [`init_json_logging`] once at startup; the filter is read
//! from `GRIDBOARD_LOG` and defaults to `info`.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive.
pub const LOG_ENV_VAR: &str = "GRIDBOARD_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Install a global JSON subscriber.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_json_logging() -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}
