//! Launching the YREC binary for one run.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::job::{elapsed_ms, FailureSignal, JobResult, JobStatus};
use crate::locator::RunSpec;

/// Executes one run and reports its outcome.
///
/// Implementations must always return a [`JobResult`]: a run that cannot be
/// started is a failed result, not an error, so the batch keeps one result
/// per run.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, spec: &RunSpec) -> JobResult;
}

/// Runs `<binary> <primary> <secondary>` inside `work_dir`.
#[derive(Debug, Clone)]
pub struct ModelCommand {
    /// Binary to run, e.g. `./model5.1c`.
    pub binary: PathBuf,

    /// Working directory for the process; resolved to an absolute path at launch.
    pub work_dir: PathBuf,

    /// Per-run limit; `None` waits indefinitely.
    pub timeout: Option<Duration>,

    pub failure_signal: FailureSignal,
}

impl ModelCommand {
    pub fn new(binary: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
            timeout: None,
            failure_signal: FailureSignal::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_failure_signal(mut self, signal: FailureSignal) -> Self {
        self.failure_signal = signal;
        self
    }

    /// The program to execute when running inside `work_dir`.
    ///
    /// A relative binary with a directory part (`./model5.1c`) is taken
    /// relative to `work_dir`; a bare name is looked up on `PATH`. Pass an
    /// absolute `work_dir`: the child changes into it before exec, so a
    /// relative one would be applied twice.
    fn program_in(&self, work_dir: &Path) -> PathBuf {
        let has_dir = self
            .binary
            .parent()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if self.binary.is_relative() && has_dir {
            work_dir.join(&self.binary)
        } else {
            self.binary.clone()
        }
    }

    /// argv for `spec`, binary first.
    pub fn argv(&self, spec: &RunSpec) -> Vec<String> {
        argv_for(&self.program_in(&self.work_dir), spec)
    }
}

fn argv_for(program: &Path, spec: &RunSpec) -> Vec<String> {
    vec![
        display(program),
        display(&spec.primary),
        display(&spec.secondary),
    ]
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// How long to keep draining pipes once the child has exited or been killed.
const PIPE_GRACE: Duration = Duration::from_secs(1);

/// Bytes read so far from one child pipe.
type Captured = Arc<Mutex<Vec<u8>>>;

/// Copy `pipe` into a shared buffer chunk by chunk, so whatever arrived
/// before a kill is still readable.
fn capture<R>(pipe: Option<R>) -> (Captured, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf: Captured = Arc::default();
    let sink = Arc::clone(&buf);
    let task = tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut b) = sink.lock() {
                        b.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    });
    (buf, task)
}

fn drained(buf: &Captured) -> String {
    buf.lock()
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl JobLauncher for ModelCommand {
    async fn launch(&self, spec: &RunSpec) -> JobResult {
        let started_at = Utc::now();

        let work_dir = match tokio::fs::canonicalize(&self.work_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                return JobResult::launch_failure(
                    &spec.run_id,
                    self.argv(spec),
                    self.work_dir.clone(),
                    started_at,
                    format!("work directory {} unavailable: {e}", self.work_dir.display()),
                )
            }
        };
        let program = self.program_in(&work_dir);
        let command = argv_for(&program, spec);

        debug!(run_id = %spec.run_id, command = %command.join(" "), "Spawning model");

        let child = Command::new(&program)
            .arg(&spec.primary)
            .arg(&spec.secondary)
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(c) => c,
            Err(e) => {
                return JobResult::launch_failure(
                    &spec.run_id,
                    command,
                    work_dir,
                    started_at,
                    format!("failed to start {}: {e}", self.binary.display()),
                )
            }
        };

        let (stdout_buf, stdout_task) = capture(child.stdout.take());
        let (stderr_buf, stderr_task) = capture(child.stderr.take());

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status.map(Some),
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!(run_id = %spec.run_id, error = %e, "Failed to kill timed-out run");
                    }
                    Ok(None)
                }
            },
            None => child.wait().await.map(Some),
        };

        // A grandchild may still hold the pipes open; stop reading after a grace period.
        let aborts = [stdout_task.abort_handle(), stderr_task.abort_handle()];
        let readers = async {
            let _ = stdout_task.await;
            let _ = stderr_task.await;
        };
        if tokio::time::timeout(PIPE_GRACE, readers).await.is_err() {
            debug!(run_id = %spec.run_id, "Output pipes still open after exit");
            aborts.iter().for_each(|a| a.abort());
        }

        let finished_at = Utc::now();
        let stdout = drained(&stdout_buf);
        let mut stderr = drained(&stderr_buf);

        let (exit_code, status) = match waited {
            Ok(Some(exit)) => {
                let code = exit.code();
                (code, self.failure_signal.classify(code, &stderr))
            }
            Ok(None) => {
                let limit = self.timeout.unwrap_or_default();
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!(
                    "run {} timed out after {}s",
                    spec.run_id,
                    limit.as_secs_f64()
                ));
                (None, JobStatus::Failed)
            }
            Err(e) => {
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("failed waiting for {}: {e}", spec.run_id));
                (None, JobStatus::Failed)
            }
        };

        JobResult {
            run_id: spec.run_id.clone(),
            command,
            work_dir,
            stdout,
            stderr,
            exit_code,
            started_at,
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(primary: &str, secondary: &str) -> RunSpec {
        RunSpec {
            run_id: "m100".to_string(),
            primary: PathBuf::from(primary),
            secondary: PathBuf::from(secondary),
        }
    }

    #[test]
    fn test_program_resolution() {
        let dir = Path::new("/opt/yrec/models");
        let cmd = ModelCommand::new("./model5.1c", dir);
        assert_eq!(cmd.program_in(dir), PathBuf::from("/opt/yrec/models/./model5.1c"));

        let cmd = ModelCommand::new("echo", dir);
        assert_eq!(cmd.program_in(dir), PathBuf::from("echo"));

        let cmd = ModelCommand::new("/usr/bin/model", dir);
        assert_eq!(cmd.program_in(dir), PathBuf::from("/usr/bin/model"));
    }

    #[cfg(unix)]
    fn write_model_stub(dir: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("model5.1c");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relative_work_dir_runs_binary_once() {
        let cwd = std::env::current_dir().unwrap();
        let tmp = tempfile::tempdir_in(&cwd).unwrap();
        write_model_stub(tmp.path(), "echo \"ran in $(pwd)\"");
        let relative = tmp.path().strip_prefix(&cwd).unwrap().to_path_buf();
        assert!(relative.is_relative());

        let cmd = ModelCommand::new("./model5.1c", &relative);
        let result = cmd.launch(&spec("a.nml1", "a.nml2")).await;

        assert_eq!(result.status, JobStatus::Success, "stderr: {}", result.stderr);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.work_dir.is_absolute());
        assert!(Path::new(&result.command[0]).is_absolute());
        assert!(result.stdout.contains("ran in"));
    }

    #[tokio::test]
    async fn test_missing_work_dir_is_a_failed_result() {
        let cmd = ModelCommand::new("./model5.1c", "/no/such/yrec/models");
        let result = cmd.launch(&spec("a", "b")).await;
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.stderr.contains("work directory"));
    }

    #[test]
    fn test_argv_order() {
        let cmd = ModelCommand::new("/bin/model", "/tmp");
        assert_eq!(
            cmd.argv(&spec("/r/a.nml1", "/r/a.nml2")),
            vec!["/bin/model", "/r/a.nml1", "/r/a.nml2"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_captures_stdout() {
        let cmd = ModelCommand::new("echo", std::env::temp_dir());
        let result = cmd.launch(&spec("a.nml1", "a.nml2")).await;
        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("a.nml1 a.nml2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_without_stderr_counts_as_success_by_default() {
        let cmd = ModelCommand::new("false", std::env::temp_dir());
        let result = cmd.launch(&spec("a", "b")).await;
        assert_ne!(result.exit_code, Some(0));
        assert_eq!(result.status, JobStatus::Success);

        let strict = cmd.with_failure_signal(FailureSignal::ExitStatus);
        let result = strict.launch(&spec("a", "b")).await;
        assert_eq!(result.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_failed_result() {
        let cmd = ModelCommand::new("./no-such-model-binary", std::env::temp_dir());
        let result = cmd.launch(&spec("a", "b")).await;
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.exit_code.is_none());
        assert!(result.stderr.contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let cmd = ModelCommand::new("sh", std::env::temp_dir())
            .with_timeout(Duration::from_millis(100));
        let result = cmd
            .launch(&RunSpec {
                run_id: "slow".into(),
                primary: PathBuf::from("-c"),
                secondary: PathBuf::from("sleep 5"),
            })
            .await;
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.exit_code.is_none());
        assert!(result.stderr.contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let cmd = ModelCommand::new("sh", std::env::temp_dir())
            .with_timeout(Duration::from_millis(300));
        let result = cmd
            .launch(&RunSpec {
                run_id: "slow".into(),
                primary: PathBuf::from("-c"),
                secondary: PathBuf::from("echo step1; echo 'WARNING: slow convergence' >&2; sleep 5"),
            })
            .await;
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.stdout.contains("step1"));
        assert!(result.stderr.contains("slow convergence"));
        assert!(result.stderr.trim_end().ends_with("timed out after 0.3s"));
    }
}
