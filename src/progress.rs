use crate::output::OutputMode;
use indicatif::{ProgressBar, ProgressStyle};

/// Create a progress bar for determinate progress
pub fn create_progress_bar(total: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg} ({elapsed})")
    {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Progress display for the validation phase.
///
/// Absent in quiet mode. Lines printed through it appear above the bar
/// instead of tearing it, and still reach stderr when the bar is hidden
/// (e.g. output is not a terminal).
pub struct ScanProgress {
    bar: Option<ProgressBar>,
}

impl ScanProgress {
    pub fn new(total: u64, mode: OutputMode) -> Self {
        let bar = (mode != OutputMode::Quiet).then(|| create_progress_bar(total, "scanned"));
        Self { bar }
    }

    pub fn inc(&self) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    pub fn println(&self, line: String) {
        match &self.bar {
            Some(bar) if !bar.is_hidden() => bar.println(line),
            _ => eprintln!("{}", line),
        }
    }

    /// Finish and clear the bar
    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    /// Leave the bar where it stopped
    pub fn abandon(&self) {
        if let Some(bar) = &self.bar {
            bar.abandon();
        }
    }
}
