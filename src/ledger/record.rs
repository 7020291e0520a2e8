//! Ledger row types and file metadata snapshots

use crate::validator::ScanOutcome;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How thoroughly a file was checked.
///
/// Ordered so that a deeper check compares greater than a shallower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDepth {
    /// Container/stream header probe (fast)
    Quick,
    /// Full decode of every stream (slow, accurate)
    Deep,
}

impl ScanDepth {
    pub fn from_deep_flag(deep: bool) -> Self {
        if deep {
            ScanDepth::Deep
        } else {
            ScanDepth::Quick
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanDepth::Quick => "quick",
            ScanDepth::Deep => "deep",
        }
    }
}

impl fmt::Display for ScanDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanDepth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quick" => Ok(ScanDepth::Quick),
            "deep" => Ok(ScanDepth::Deep),
            other => Err(anyhow!("Unknown scan depth: {}", other)),
        }
    }
}

/// Modification time split into whole seconds and nanoseconds since the
/// UNIX epoch, the form it is stored and compared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModTime {
    pub secs: i64,
    pub nanos: i64,
}

impl ModTime {
    pub fn new(secs: i64, nanos: i64) -> Self {
        Self { secs, nanos }
    }
}

impl From<SystemTime> for ModTime {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, d.subsec_nanos() as i64),
            // Pre-epoch mtimes are rare but legal; keep them distinct from the epoch
            Err(e) => {
                let before = e.duration();
                let mut secs = -(before.as_secs() as i64);
                let mut nanos = before.subsec_nanos() as i64;
                if nanos > 0 {
                    secs -= 1;
                    nanos = 1_000_000_000 - nanos;
                }
                Self::new(secs, nanos)
            }
        }
    }
}

impl From<ModTime> for SystemTime {
    fn from(mtime: ModTime) -> Self {
        let nanos = Duration::from_nanos(mtime.nanos.max(0) as u64);
        if mtime.secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(mtime.secs as u64) + nanos
        } else {
            UNIX_EPOCH - Duration::from_secs(mtime.secs.unsigned_abs()) + nanos
        }
    }
}

/// A file found on disk together with the metadata read at that moment.
///
/// Transient: produced by discovery, consumed by the staleness check and
/// the validation dispatch. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: ModTime,
}

impl CandidateFile {
    /// Stat `path` now.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = crate::utils::safe_metadata(path)
            .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
        let mtime = metadata
            .modified()
            .with_context(|| format!("Failed to get mtime: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            mtime: mtime.into(),
        })
    }
}

/// The ledger's memory of one file: what it looked like and what the last
/// check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub path: PathBuf,
    pub mtime: ModTime,
    pub size: u64,
    pub last_scanned: DateTime<Utc>,
    pub corrupted: bool,
    pub scan_depth: ScanDepth,
    /// Only present when `corrupted` is set
    pub error_message: Option<String>,
}

impl ScanRecord {
    /// Build the record for a finished check from the file state observed
    /// when the check completed.
    pub fn from_outcome(outcome: &ScanOutcome, stat: &CandidateFile, depth: ScanDepth) -> Self {
        let corrupted = !outcome.valid;
        Self {
            path: stat.path.clone(),
            mtime: stat.mtime,
            size: stat.size,
            last_scanned: Utc::now(),
            corrupted,
            scan_depth: depth,
            error_message: if corrupted {
                outcome.message.clone()
            } else {
                None
            },
        }
    }

    /// Whether this record still describes `candidate` as it is on disk.
    pub fn matches(&self, candidate: &CandidateFile) -> bool {
        self.size == candidate.size && self.mtime == candidate.mtime
    }
}
