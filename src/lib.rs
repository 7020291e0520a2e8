//! Video integrity validator library crate
//!
//! Scans directories for video files, checks each one with ffprobe or ffmpeg,
//! and keeps a ledger of verdicts so unchanged, known-good files are skipped
//! on later runs. The CLI binary is a thin layer over this API.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod interrupt;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod progress;
pub mod report;
pub mod utils;
pub mod validator;
