//! Aggregate result of one scan run

use std::path::{Path, PathBuf};
use std::time::Duration;

/// A file whose check failed, with the diagnostic the check produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub total_found: usize,
    pub scanned: usize,
    pub skipped: usize,
    /// Size of the scanned files as recorded after their checks
    pub scanned_bytes: u64,
    pub duration: Duration,
    /// In completion order
    pub corrupted_files: Vec<PathBuf>,
    pub errors: Vec<FileError>,
    /// Records removed by `--prune`, when pruning was requested
    pub pruned: Option<usize>,
    pub skipped_roots: Vec<PathBuf>,
}

impl ScanReport {
    pub fn corrupted(&self) -> usize {
        self.corrupted_files.len()
    }

    pub fn has_corruption(&self) -> bool {
        !self.corrupted_files.is_empty()
    }

    /// 0 when every scanned file played, 1 when any was corrupted
    pub fn exit_code(&self) -> i32 {
        if self.has_corruption() {
            1
        } else {
            0
        }
    }

    pub(crate) fn record_corrupted(&mut self, path: &Path, message: Option<&str>) {
        self.corrupted_files.push(path.to_path_buf());
        if let Some(message) = message {
            self.errors.push(FileError {
                path: path.to_path_buf(),
                error: message.to_string(),
            });
        }
    }
}
