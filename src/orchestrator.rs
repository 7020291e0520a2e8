//! Scan orchestration
//!
//! Turns a set of root directories into a [`ScanReport`]:
//!
//! 1. optionally prune ledger records of deleted files
//! 2. discover candidate files
//! 3. ask the ledger which of them are stale
//! 4. validate the stale ones on a bounded worker pool
//! 5. fold results into the report as they complete and commit them to the
//!    ledger in batches
//!
//! Workers never touch the ledger. The coordinating thread is the only
//! writer, so batch commits need no locking.

use crate::config::FileFilter;
use crate::discovery::find_video_files;
use crate::interrupt::CancelFlag;
use crate::ledger::{CandidateFile, ScanDepth, ScanLedger, ScanRecord};
use crate::output::OutputMode;
use crate::progress::ScanProgress;
use crate::report::ScanReport;
use crate::utils::display_path;
use crate::validator::{ScanOutcome, Validator};
use colored::*;
use crossbeam_channel::RecvTimeoutError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Records accumulated before a ledger commit
pub const BATCH_SIZE: usize = 10;

/// How long the coordinator waits for a result before re-checking for
/// cancellation
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors that end a run early
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The user asked the run to stop. Completed results were saved.
    #[error("Scan interrupted after {completed} of {dispatched} files")]
    Interrupted { completed: usize, dispatched: usize },
    #[error(transparent)]
    Ledger(#[from] anyhow::Error),
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Per-run switches
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Ignore the ledger and validate everything
    pub force: bool,
    /// Drop records of deleted files before scanning
    pub prune: bool,
    /// Worker pool size
    pub workers: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            force: false,
            prune: false,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

pub struct Orchestrator<'a> {
    ledger: &'a mut ScanLedger,
    validator: Arc<dyn Validator>,
    cancel: CancelFlag,
    mode: OutputMode,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ledger: &'a mut ScanLedger, validator: Arc<dyn Validator>, cancel: CancelFlag) -> Self {
        Self {
            ledger,
            validator,
            cancel,
            mode: OutputMode::Quiet,
        }
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    /// Scan `roots` and return the summary.
    ///
    /// Cancellation is honoured at every step, including runs where nothing
    /// needs checking. Every result already received is committed before
    /// [`ScanError::Interrupted`] is returned. Checks still running are
    /// abandoned, not awaited, and their verdicts are not recorded; those
    /// files are simply checked again on the next run.
    pub fn run(
        &mut self,
        roots: &[PathBuf],
        options: &ScanOptions,
        filter: &FileFilter,
    ) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let depth = self.validator.depth();
        let _span = tracing::info_span!("scan", %depth, force = options.force).entered();

        let mut report = ScanReport::default();

        if options.prune {
            let removed = self.ledger.prune()?;
            if self.mode >= OutputMode::Verbose {
                eprintln!("Pruned {} deleted files from DB", removed);
            }
            report.pruned = Some(removed);
        }
        self.check_cancelled()?;

        if self.mode >= OutputMode::Verbose {
            eprintln!("Finding video files...");
        }
        let discovery = find_video_files(roots, filter, &self.cancel);
        self.check_cancelled()?;
        if self.mode != OutputMode::Quiet {
            for root in &discovery.skipped_roots {
                eprintln!("{} Skipped non-directory: {}", "Warning:".yellow(), display_path(root));
            }
        }
        report.total_found = discovery.files.len();
        report.skipped_roots = discovery.skipped_roots;

        if self.mode != OutputMode::Quiet {
            eprintln!("Found {} video files. Checking status...", report.total_found);
        }

        let to_scan = self.partition(discovery.files, options.force, depth, &mut report)?;

        if self.mode != OutputMode::Quiet {
            eprintln!(
                "Skipping {} up-to-date files. Scanning {} files...",
                report.skipped,
                to_scan.len()
            );
        }

        let result = self.dispatch(to_scan, options.workers, depth, &mut report);
        report.duration = started.elapsed();
        result?;

        tracing::info!(
            found = report.total_found,
            scanned = report.scanned,
            skipped = report.skipped,
            corrupted = report.corrupted(),
            "scan finished"
        );
        Ok(report)
    }

    /// Interruption before any check was dispatched
    fn check_cancelled(&self) -> Result<(), ScanError> {
        if self.cancel.is_cancelled() {
            tracing::info!("scan interrupted before checking started");
            return Err(ScanError::Interrupted {
                completed: 0,
                dispatched: 0,
            });
        }
        Ok(())
    }

    /// Split discovered files into those that must be validated and those
    /// whose stored verdict still holds.
    fn partition(
        &self,
        files: Vec<PathBuf>,
        force: bool,
        depth: ScanDepth,
        report: &mut ScanReport,
    ) -> Result<Vec<PathBuf>, ScanError> {
        let mut to_scan = Vec::new();

        for path in files {
            self.check_cancelled()?;
            let candidate = match CandidateFile::from_path(&path) {
                Ok(candidate) => candidate,
                Err(e) => {
                    // Gone between discovery and stat
                    tracing::warn!(path = %path.display(), error = %e, "dropping file that can no longer be read");
                    continue;
                }
            };

            if self.ledger.needs_scan(&candidate, force, depth)? {
                to_scan.push(candidate.path);
            } else {
                report.skipped += 1;
                tracing::debug!(path = %path.display(), "up to date");
                if self.mode == OutputMode::VeryVerbose {
                    eprintln!("  {} {}", "=".dimmed(), display_path(&path).dimmed());
                }
            }
        }

        Ok(to_scan)
    }

    fn dispatch(
        &mut self,
        to_scan: Vec<PathBuf>,
        workers: usize,
        depth: ScanDepth,
        report: &mut ScanReport,
    ) -> Result<(), ScanError> {
        self.check_cancelled()?;
        if to_scan.is_empty() {
            return Ok(());
        }

        let dispatched = to_scan.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("validate-{}", i))
            .build()?;

        let (tx, rx) = crossbeam_channel::unbounded::<ScanOutcome>();
        for path in to_scan {
            let tx = tx.clone();
            let validator = Arc::clone(&self.validator);
            let cancel = self.cancel.clone();
            pool.spawn(move || {
                if cancel.is_cancelled() {
                    return;
                }
                if let Some(outcome) = validator.validate(&path, &cancel) {
                    let _ = tx.send(outcome);
                }
            });
        }
        // Channel disconnects once every job has finished
        drop(tx);

        let progress = ScanProgress::new(dispatched as u64, self.mode);
        let mut pending: Vec<ScanRecord> = Vec::with_capacity(BATCH_SIZE);

        loop {
            if self.cancel.is_cancelled() {
                for outcome in rx.try_iter() {
                    self.fold(outcome, depth, report, &mut pending, &progress);
                }
                self.flush(&mut pending)?;
                progress.abandon();
                tracing::info!(completed = report.scanned, dispatched, "scan interrupted, progress saved");
                // Dropping the pool does not wait for running jobs
                return Err(ScanError::Interrupted {
                    completed: report.scanned,
                    dispatched,
                });
            }

            match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(outcome) => {
                    self.fold(outcome, depth, report, &mut pending, &progress);
                    if pending.len() >= BATCH_SIZE {
                        self.flush(&mut pending)?;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.flush(&mut pending)?;
        progress.finish();
        Ok(())
    }

    /// Account for one completed check and queue its ledger record.
    ///
    /// The record carries the file's size and mtime as they are now, after
    /// the check, not as they were at discovery.
    fn fold(
        &self,
        outcome: ScanOutcome,
        depth: ScanDepth,
        report: &mut ScanReport,
        pending: &mut Vec<ScanRecord>,
        progress: &ScanProgress,
    ) {
        report.scanned += 1;
        progress.inc();

        if outcome.valid {
            if self.mode >= OutputMode::Verbose {
                let name = outcome
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| display_path(&outcome.path));
                progress.println(format!("{} {}", "✓ Valid:".green(), name));
            }
        } else {
            report.record_corrupted(&outcome.path, outcome.message.as_deref());
            if self.mode != OutputMode::Quiet {
                progress.println(format!(
                    "{} {} ({})",
                    "✗ CORRUPTED:".red().bold(),
                    display_path(&outcome.path),
                    outcome.message.as_deref().unwrap_or("no diagnostic")
                ));
            }
        }

        match CandidateFile::from_path(&outcome.path) {
            Ok(stat) => {
                report.scanned_bytes += stat.size;
                pending.push(ScanRecord::from_outcome(&outcome, &stat, depth));
            }
            Err(e) => {
                tracing::warn!(
                    path = %outcome.path.display(),
                    error = %e,
                    "file disappeared before its result could be recorded"
                );
            }
        }
    }

    /// Commit `pending` to the ledger. On failure the batch is left in
    /// place so nothing is dropped silently.
    fn flush(&mut self, pending: &mut Vec<ScanRecord>) -> Result<(), ScanError> {
        if pending.is_empty() {
            return Ok(());
        }

        self.ledger.record_results(pending)?;
        tracing::debug!(records = pending.len(), "committed batch");
        pending.clear();
        Ok(())
    }
}
