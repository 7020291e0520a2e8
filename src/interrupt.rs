//! Cooperative cancellation shared between the coordinator, the workers and
//! the Ctrl-C handler.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit status used when the user interrupts a run (128 + SIGINT).
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Cloneable cancellation flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Route Ctrl-C / SIGINT into `flag`.
///
/// The first signal asks the run to stop and save its progress. A second one
/// exits immediately.
pub fn install_ctrlc_handler(flag: &CancelFlag) -> Result<()> {
    let flag = flag.clone();
    ctrlc::set_handler(move || {
        if flag.is_cancelled() {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
        eprintln!("\nScan interrupted by user. Saving progress...");
        flag.cancel();
    })
    .with_context(|| "Failed to install Ctrl-C handler")
}
