//! Structured event logging for orchestration runs.
//!
//! Per-event lines go to stderr so they never mix with recipe output on
//! stdout. `RUST_LOG` always wins; without it `--verbose` selects `info`,
//! otherwise only warnings are shown.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber for the CLI process.
pub fn init(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
