use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::{CliOverrides, Config};
use crate::interrupt::{self, CancelFlag, INTERRUPTED_EXIT_CODE};
use crate::ledger::{ScanDepth, ScanLedger};
use crate::logging;
use crate::orchestrator::{Orchestrator, ScanError, ScanOptions};
use crate::output::{self, OutputMode};
use crate::validator;

#[derive(Parser, Debug)]
#[command(name = "video-validator")]
#[command(version)]
#[command(about = "Find corrupted video files, skipping files already verified")]
#[command(long_about = "Checks every video file under the given directories with ffprobe \
    (or a full ffmpeg decode with --deep) and remembers each verdict, so later runs only \
    re-check files that changed, files that failed before, or files last checked less \
    thoroughly.\n\n\
    Exit status: 0 no corruption, 1 corrupted files found, 130 interrupted.\n\n\
    Examples:\n  \
    video-validator ~/Movies                 # Quick header check\n  \
    video-validator --deep ~/Movies ~/Shows  # Decode every frame\n  \
    video-validator --prune --json ~/Movies  # Forget deleted files, JSON report")]
pub struct Cli {
    /// Directories to scan
    #[arg(required = true, value_name = "DIRECTORIES")]
    pub directories: Vec<PathBuf>,

    /// Scan ledger location [default: ~/.cache/video-validator/scan.db]
    #[arg(long, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Ignore history and rescan everything
    #[arg(long)]
    pub force: bool,

    /// Use ffmpeg decoding (slow) instead of ffprobe
    #[arg(long)]
    pub deep: bool,

    /// Number of parallel workers [default: number of CPUs]
    #[arg(long, value_name = "N", value_parser = parse_workers)]
    pub workers: Option<usize>,

    /// Remove ledger entries for deleted files
    #[arg(long)]
    pub prune: bool,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Skip paths matching a glob pattern (repeatable)
    #[arg(long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Config file [default: platform config dir/video-validator/config.toml]
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// ffprobe executable used for quick checks
    #[arg(long, value_name = "PATH")]
    pub ffprobe: Option<PathBuf>,

    /// ffmpeg executable used for deep checks
    #[arg(long, value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Increase output verbosity (-v, -vv for more)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress and status output
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    pub quiet: bool,
}

fn parse_workers(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn output_mode(&self) -> OutputMode {
        if self.quiet {
            OutputMode::Quiet
        } else if self.verbose >= 2 {
            OutputMode::VeryVerbose
        } else if self.verbose == 1 {
            OutputMode::Verbose
        } else {
            OutputMode::Normal
        }
    }

    /// Run the scan and return the process exit code.
    ///
    /// Fatal problems (config, ledger, worker pool) are returned as errors;
    /// corrupted files and interruption are reported through the code.
    pub fn run(self) -> anyhow::Result<i32> {
        let output_mode = self.output_mode();
        logging::init(output_mode);

        let mut config = Config::load(self.config.as_deref())?;
        config.apply_cli_overrides(CliOverrides {
            db_path: self.db_path,
            workers: self.workers,
            exclude: self.exclude,
            ffprobe: self.ffprobe,
            ffmpeg: self.ffmpeg,
        });
        let filter = config.file_filter()?;

        let mut ledger = ScanLedger::open(&config.db_path())?;

        let cancel = CancelFlag::new();
        interrupt::install_ctrlc_handler(&cancel)?;

        let depth = ScanDepth::from_deep_flag(self.deep);
        let options = ScanOptions {
            force: self.force,
            prune: self.prune,
            workers: config.workers(),
        };
        tracing::debug!(
            ledger = %ledger.path().display(),
            %depth,
            workers = options.workers,
            "starting scan"
        );

        // JSON goes to stdout alone, without live status lines
        let scan_mode = if self.json { OutputMode::Quiet } else { output_mode };
        let result = Orchestrator::new(&mut ledger, validator::for_depth(depth, &config.tools), cancel)
            .with_output_mode(scan_mode)
            .run(&self.directories, &options, &filter);

        match result {
            Ok(report) => {
                if self.json {
                    output::print_json(&report)?;
                } else {
                    output::print_human(&report);
                }
                Ok(report.exit_code())
            }
            Err(ScanError::Interrupted { .. }) => {
                eprintln!("\nInterrupted.");
                Ok(INTERRUPTED_EXIT_CODE)
            }
            Err(e) => Err(e.into()),
        }
    }
}
