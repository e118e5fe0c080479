//! Integration tests for run discovery and parallel execution.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use yrec_batch::{
    locate_runs, BatchError, BatchRunner, JobLauncher, JobResult, JobStatus, RunSpec,
    WorkerPolicy,
};

fn touch(dir: &Path, name: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, " NMODLS = 1\n").unwrap();
    path
}

/// Test: unmatched primaries are reported, complete pairs still run
#[test]
fn test_missing_secondary_reported_once() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("Run_ZAMSmodels");
    touch(&dir, "m100.nml1");
    touch(&dir, "m100.nml2");
    touch(&dir, "m080.nml1");
    touch(&dir, "m120.nml1");
    touch(&dir, "m120.nml2");
    touch(&dir, "orphan.nml2");

    let located = locate_runs(&[dir.clone()]).expect("locate failed");

    let ids: Vec<&str> = located.runs.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids, vec!["m100", "m120"]);
    assert_eq!(located.unmatched.len(), 1);
    assert!(located.unmatched[0].ends_with("m080.nml1"));

    let run = &located.runs[0];
    assert!(run.primary.is_absolute());
    assert!(run.primary.ends_with("m100.nml1"));
    assert!(run.secondary.ends_with("m100.nml2"));
}

/// Test: directories concatenated in caller order, files sorted within each
#[test]
fn test_directory_order_is_preserved() {
    let tmp = tempfile::tempdir().unwrap();
    let first = tmp.path().join("z_grid");
    let second = tmp.path().join("a_grid");
    for name in ["b", "a"] {
        touch(&first, &format!("{name}.nml1"));
        touch(&first, &format!("{name}.nml2"));
    }
    touch(&second, "c.nml1");
    touch(&second, "c.nml2");
    touch(&second, "a.nml1");
    touch(&second, "a.nml2");

    let located = locate_runs(&[first, second]).unwrap();
    let ids: Vec<&str> = located.runs.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "a_grid/a", "c"]);
}

/// Test: nothing to run is fatal
#[test]
fn test_no_pairs_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    touch(tmp.path(), "lonely.nml1");

    let err = locate_runs(&[tmp.path().to_path_buf(), tmp.path().join("missing")]).unwrap_err();
    assert!(matches!(err, BatchError::NoRunsFound { ref searched } if searched.len() == 2));
}

/// Launcher that records how many runs are in flight at once.
struct CountingLauncher {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    fail: HashSet<String>,
}

impl CountingLauncher {
    fn new(fail: &[&str]) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fail: fail.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl JobLauncher for CountingLauncher {
    async fn launch(&self, spec: &RunSpec) -> JobResult {
        let now_running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failed = self.fail.contains(&spec.run_id);
        let now = Utc::now();
        JobResult {
            run_id: spec.run_id.clone(),
            command: vec!["stub".into()],
            work_dir: PathBuf::from("."),
            stdout: String::new(),
            stderr: if failed { "STOP".into() } else { String::new() },
            exit_code: Some(0),
            started_at: now,
            finished_at: now,
            duration_ms: 20,
            status: if failed {
                JobStatus::Failed
            } else {
                JobStatus::Success
            },
        }
    }
}

fn specs(n: usize) -> Vec<RunSpec> {
    (0..n)
        .map(|i| RunSpec {
            run_id: format!("run{i:02}"),
            primary: PathBuf::from(format!("run{i:02}.nml1")),
            secondary: PathBuf::from(format!("run{i:02}.nml2")),
        })
        .collect()
}

/// Test: worker bound respected, every run accounted for, failures isolated
#[tokio::test]
async fn test_bounded_parallel_execution() {
    let launcher = Arc::new(CountingLauncher::new(&["run03", "run07"]));
    let runner = BatchRunner::new(Arc::clone(&launcher), WorkerPolicy::with_workers(3));

    let input = specs(12);
    let expected: HashSet<String> = input.iter().map(|r| r.run_id.clone()).collect();
    let report = runner.run(input).await;

    assert_eq!(report.len(), 12);
    let got: HashSet<String> = report.results.keys().cloned().collect();
    assert_eq!(got, expected);

    assert_eq!(report.failed_count(), 2);
    assert_eq!(report.passed_count(), 10);
    assert!(launcher.peak.load(Ordering::SeqCst) <= 3);
    assert!(launcher.peak.load(Ordering::SeqCst) >= 2, "runs should overlap");
}

#[cfg(unix)]
fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// Test: end-to-end with a stub model that writes nothing
#[cfg(unix)]
#[tokio::test]
async fn test_stub_model_end_to_end() {
    use yrec_batch::ModelCommand;
    use yrec_core::{load_catalog, TrackLoadPlan, VersionMarkerReader};

    let tmp = tempfile::tempdir().unwrap();
    let models = tmp.path().join("models");
    fs::create_dir_all(&models).unwrap();
    write_stub(&models, "model5.1c", "echo \"running $1 $2\"");

    let run_a = tmp.path().join("run_a");
    let run_b = tmp.path().join("run_b");
    touch(&run_a, "m100.nml1");
    touch(&run_a, "m100.nml2");
    touch(&run_b, "m120.nml1");
    touch(&run_b, "m120.nml2");

    let dirs = vec![run_a, run_b];
    let located = locate_runs(&dirs).unwrap();
    let runner = BatchRunner::new(
        Arc::new(ModelCommand::new("./model5.1c", &models)),
        WorkerPolicy::default(),
    );
    let report = runner.run(located.runs).await;

    assert_eq!(report.len(), 2);
    assert!(report.all_passed());
    assert!(report.results["m100"].stdout.contains("m100.nml1"));
    assert_eq!(report.results["m120"].command.len(), 3);

    let catalog = load_catalog(&dirs, &TrackLoadPlan::default(), VersionMarkerReader).unwrap();
    assert!(catalog.star_lists.unwrap().is_empty());
    assert!(catalog.subgiant_star_lists.unwrap().is_empty());
    assert!(catalog.eep_lists.unwrap().is_empty());
    assert!(catalog.isochrone_lists.unwrap().is_empty());
}

/// Test: stderr output marks a run failed without touching its sibling
#[cfg(unix)]
#[tokio::test]
async fn test_stderr_marks_only_that_run_failed() {
    use yrec_batch::ModelCommand;

    let tmp = tempfile::tempdir().unwrap();
    let stub = write_stub(
        tmp.path(),
        "model",
        "case \"$1\" in */bad.nml1) echo 'STOP: convergence failure' >&2 ;; *) echo ok ;; esac",
    );

    let runs = tmp.path().join("runs");
    for stem in ["bad", "good"] {
        touch(&runs, &format!("{stem}.nml1"));
        touch(&runs, &format!("{stem}.nml2"));
    }

    let located = locate_runs(&[runs]).unwrap();
    let runner = BatchRunner::new(
        Arc::new(ModelCommand::new(&stub, tmp.path())),
        WorkerPolicy::with_workers(2),
    );
    let report = runner.run(located.runs).await;

    assert_eq!(report.results["bad"].status, JobStatus::Failed);
    assert!(report.results["bad"].stderr.contains("convergence"));
    assert_eq!(report.results["bad"].exit_code, Some(0));
    assert_eq!(report.results["good"].status, JobStatus::Success);
}
