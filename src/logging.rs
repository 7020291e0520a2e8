//! Diagnostic logging setup.
//!
//! Results go to stdout through `output`; tracing events go to stderr. The
//! default level follows the verbosity flags and `RUST_LOG` overrides it.

use crate::output::OutputMode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn default_directive(mode: OutputMode) -> &'static str {
    match mode {
        OutputMode::Quiet => "error",
        OutputMode::Normal => "warn",
        OutputMode::Verbose => "info",
        OutputMode::VeryVerbose => "debug",
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(mode: OutputMode) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(mode)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}
