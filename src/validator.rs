//! Playability checks delegated to external media tools
//!
//! The orchestrator only sees the [`Validator`] trait. Two implementations
//! ship with the tool: [`QuickProbe`] asks `ffprobe` to parse the container
//! and stream headers, [`DeepDecode`] has `ffmpeg` decode every frame to a
//! null muxer. Anything other than a clean exit within the time limit counts
//! as a failed check.

use crate::config::ToolsConfig;
use crate::interrupt::CancelFlag;
use crate::ledger::ScanDepth;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

const NON_ZERO_EXIT_MESSAGE: &str = "Process returned non-zero code";
const TIMEOUT_MESSAGE: &str = "Timeout expired";

/// Result of one validation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub path: PathBuf,
    pub valid: bool,
    /// Diagnostic text from the tool, or why the tool could not give a verdict
    pub message: Option<String>,
}

impl ScanOutcome {
    pub fn valid(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            valid: true,
            message: None,
        }
    }

    pub fn corrupted(path: &Path, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            valid: false,
            message: Some(message.into()),
        }
    }
}

/// Something that can tell whether a video file plays.
pub trait Validator: Send + Sync {
    /// Depth recorded for verdicts produced by this validator
    fn depth(&self) -> ScanDepth;

    /// Check `path`.
    ///
    /// Returns `None` only when the check was abandoned because `cancel` was
    /// set; such attempts produce no verdict and must not be recorded.
    fn validate(&self, path: &Path, cancel: &CancelFlag) -> Option<ScanOutcome>;
}

/// Header/container probe with `ffprobe`
#[derive(Debug, Clone)]
pub struct QuickProbe {
    ffprobe: PathBuf,
    timeout: Duration,
}

impl QuickProbe {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            ffprobe: tools.ffprobe.clone(),
            timeout: Duration::from_secs(tools.quick_timeout_secs),
        }
    }
}

impl Validator for QuickProbe {
    fn depth(&self) -> ScanDepth {
        ScanDepth::Quick
    }

    fn validate(&self, path: &Path, cancel: &CancelFlag) -> Option<ScanOutcome> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-show_format".into(),
            "-show_streams".into(),
            path.into(),
        ];
        run_tool(&self.ffprobe, &args, self.timeout, cancel).into_outcome(path)
    }
}

/// Full decode with `ffmpeg`, discarding the output
#[derive(Debug, Clone)]
pub struct DeepDecode {
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl DeepDecode {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            ffmpeg: tools.ffmpeg.clone(),
            timeout: Duration::from_secs(tools.deep_timeout_secs),
        }
    }
}

impl Validator for DeepDecode {
    fn depth(&self) -> ScanDepth {
        ScanDepth::Deep
    }

    fn validate(&self, path: &Path, cancel: &CancelFlag) -> Option<ScanOutcome> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-i".into(),
            path.into(),
            "-f".into(),
            "null".into(),
            "-".into(),
        ];
        run_tool(&self.ffmpeg, &args, self.timeout, cancel).into_outcome(path)
    }
}

/// Pick the validator for a run
pub fn for_depth(depth: ScanDepth, tools: &ToolsConfig) -> Arc<dyn Validator> {
    match depth {
        ScanDepth::Quick => Arc::new(QuickProbe::new(tools)),
        ScanDepth::Deep => Arc::new(DeepDecode::new(tools)),
    }
}

/// How an external tool invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum ToolRun {
    Passed,
    Failed(String),
    Abandoned,
}

impl ToolRun {
    fn into_outcome(self, path: &Path) -> Option<ScanOutcome> {
        match self {
            ToolRun::Passed => Some(ScanOutcome::valid(path)),
            ToolRun::Failed(message) => Some(ScanOutcome::corrupted(path, message)),
            ToolRun::Abandoned => None,
        }
    }
}

/// Run `program` to completion, killing it on timeout or cancellation.
///
/// stdout is discarded; stderr is collected on a helper thread so a chatty
/// decoder cannot fill the pipe and stall.
fn run_tool(program: &Path, args: &[OsString], timeout: Duration, cancel: &CancelFlag) -> ToolRun {
    if cancel.is_cancelled() {
        return ToolRun::Abandoned;
    }

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return ToolRun::Failed(format!("Failed to run {}: {}", program.display(), e)),
    };

    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return ToolRun::Failed(e.to_string());
            }
        }

        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return ToolRun::Abandoned;
        }

        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(program = %program.display(), ?timeout, "tool timed out");
            return ToolRun::Failed(TIMEOUT_MESSAGE.to_string());
        }

        thread::sleep(POLL_INTERVAL);
    };

    if status.success() {
        return ToolRun::Passed;
    }

    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).trim().to_string())
        .unwrap_or_default();

    if stderr.is_empty() {
        ToolRun::Failed(NON_ZERO_EXIT_MESSAGE.to_string())
    } else {
        ToolRun::Failed(stderr)
    }
}
