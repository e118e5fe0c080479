//! Per-run outcome of a YREC invocation.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome class of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
}

/// Which evidence marks a run as failed.
///
/// YREC does not reliably exit non-zero on a failed model, but it does write
/// diagnostics to stderr, so the default looks at stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSignal {
    /// Failed iff stderr is non-empty after trimming.
    #[default]
    StderrText,
    /// Failed iff the process did not exit with status 0.
    ExitStatus,
    /// Failed if either check fails.
    Either,
}

impl FailureSignal {
    pub fn classify(self, exit_code: Option<i32>, stderr: &str) -> JobStatus {
        let stderr_failed = !stderr.trim().is_empty();
        let exit_failed = exit_code != Some(0);
        let failed = match self {
            FailureSignal::StderrText => stderr_failed,
            FailureSignal::ExitStatus => exit_failed,
            FailureSignal::Either => stderr_failed || exit_failed,
        };
        if failed {
            JobStatus::Failed
        } else {
            JobStatus::Success
        }
    }
}

/// Result of running one [`RunSpec`](crate::RunSpec).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Run identifier from the locator.
    pub run_id: String,

    /// Exact argv, binary first.
    pub command: Vec<String>,

    /// Directory the binary ran in.
    pub work_dir: PathBuf,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr (or the launch error when the process never ran).
    pub stderr: String,

    /// Exit code; `None` if the process never started, was killed, or timed out.
    pub exit_code: Option<i32>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    pub status: JobStatus,
}

impl JobResult {
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Success
    }

    /// Result for a run that could not be executed at all.
    pub fn launch_failure(
        run_id: impl Into<String>,
        command: Vec<String>,
        work_dir: PathBuf,
        started_at: DateTime<Utc>,
        error: impl std::fmt::Display,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            run_id: run_id.into(),
            command,
            work_dir,
            stdout: String::new(),
            stderr: error.to_string(),
            exit_code: None,
            started_at,
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
            status: JobStatus::Failed,
        }
    }

    /// The command as a single shell-like line, for display.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

pub(crate) fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}
