//! Scan ledger
//!
//! Persistent per-file record of the last validation: the size and mtime the
//! file had, the verdict, and how deep the check went. Decides which files
//! can be skipped on the next run and takes completed results back in
//! atomic batches.

pub mod database;
pub mod record;

pub use database::ScanLedger;
pub use record::{CandidateFile, ModTime, ScanDepth, ScanRecord};
