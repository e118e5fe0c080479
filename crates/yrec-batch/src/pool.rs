//! Bounded parallel execution of a batch of runs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::concurrency::{available_parallelism, WorkerPolicy};
use crate::job::{elapsed_ms, JobResult};
use crate::launcher::JobLauncher;
use crate::locator::RunSpec;

/// Result of a complete batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Identifier used to tag this batch's log lines.
    pub batch_id: Uuid,

    /// Number of runs allowed to execute at once.
    pub worker_count: usize,

    pub started_at: DateTime<Utc>,

    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// One result per submitted run, keyed by run id.
    pub results: BTreeMap<String, JobResult>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &JobResult> {
        self.results.values().filter(|r| r.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobResult> {
        self.results.values().filter(|r| !r.succeeded())
    }

    /// Number of runs that passed.
    pub fn passed_count(&self) -> usize {
        self.succeeded().count()
    }

    /// Number of runs that failed.
    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0
    }
}

/// Runs every [`RunSpec`] exactly once with at most `worker_count` in flight.
///
/// All runs are submitted up front; a semaphore hands out slots as earlier
/// runs finish. A failed run never cancels its siblings, and [`run`] only
/// returns once every run has produced a result. There is no cancellation:
/// a run that never exits holds its slot forever unless the launcher has a
/// timeout.
///
/// [`run`]: BatchRunner::run
pub struct BatchRunner<L: ?Sized> {
    launcher: Arc<L>,
    policy: WorkerPolicy,
}

impl<L> BatchRunner<L>
where
    L: JobLauncher + ?Sized + 'static,
{
    pub fn new(launcher: Arc<L>, policy: WorkerPolicy) -> Self {
        Self { launcher, policy }
    }

    pub async fn run(&self, runs: Vec<RunSpec>) -> BatchReport {
        self.run_with_progress(runs, |_, _, _| {}).await
    }

    /// Like [`BatchRunner::run`], calling `on_complete(result, done, total)`
    /// as each run finishes, in completion order.
    pub async fn run_with_progress<F>(&self, runs: Vec<RunSpec>, on_complete: F) -> BatchReport
    where
        F: FnMut(&JobResult, usize, usize),
    {
        let batch_id = Uuid::new_v4();
        let span = info_span!("yrec.batch", batch_id = %batch_id);
        self.execute(batch_id, runs, on_complete)
            .instrument(span)
            .await
    }

    async fn execute<F>(&self, batch_id: Uuid, runs: Vec<RunSpec>, mut on_complete: F) -> BatchReport
    where
        F: FnMut(&JobResult, usize, usize),
    {
        let started_at = Utc::now();
        let total = runs.len();
        let worker_count = self.policy.resolve(total);

        info!(
            jobs = total,
            workers = worker_count,
            cpus = available_parallelism(),
            "Running up to {} jobs in parallel",
            worker_count
        );

        let sem = Arc::new(Semaphore::new(worker_count.min(Semaphore::MAX_PERMITS)));
        let mut pending = FuturesUnordered::new();

        for spec in runs {
            let sem = Arc::clone(&sem);
            let launcher = Arc::clone(&self.launcher);
            let run_id = spec.run_id.clone();

            let handle = tokio::spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();
                    launcher.launch(&spec).await
                }
                .in_current_span(),
            );

            pending.push(async move { (run_id, handle.await) });
        }

        let mut results = BTreeMap::new();
        let mut done = 0usize;

        while let Some((run_id, joined)) = pending.next().await {
            let result = match joined {
                Ok(r) => r,
                Err(e) => JobResult::launch_failure(
                    run_id.clone(),
                    Vec::new(),
                    PathBuf::new(),
                    Utc::now(),
                    format!("task for {run_id} did not complete: {e}"),
                ),
            };
            done += 1;

            log_result(&result, done, total);
            on_complete(&result, done, total);

            let key = free_key(&results, run_id);
            results.insert(key, result);
        }

        let report = BatchReport {
            batch_id,
            worker_count,
            started_at,
            duration_ms: elapsed_ms(started_at, Utc::now()),
            results,
        };

        info!(
            passed = report.passed_count(),
            failed = report.failed_count(),
            duration_ms = report.duration_ms,
            "Batch finished"
        );
        report
    }
}

/// `run_id`, suffixed if a result is already stored under it.
fn free_key(results: &BTreeMap<String, JobResult>, run_id: String) -> String {
    if !results.contains_key(&run_id) {
        return run_id;
    }
    warn!(run_id = %run_id, "Duplicate run id in batch");
    let free = (2..)
        .map(|n| format!("{run_id}#{n}"))
        .find(|k| !results.contains_key(k));
    free.unwrap_or(run_id)
}

fn log_result(result: &JobResult, done: usize, total: usize) {
    if result.succeeded() {
        info!(
            run_id = %result.run_id,
            duration_ms = result.duration_ms,
            progress = %format!("{done}/{total}"),
            "Finished {}",
            result.run_id
        );
    } else {
        warn!(
            run_id = %result.run_id,
            exit_code = ?result.exit_code,
            progress = %format!("{done}/{total}"),
            "Error while running {}",
            result.run_id
        );
    }
    debug!(run_id = %result.run_id, command = %result.command_line(), "Command");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use async_trait::async_trait;

    struct EchoLauncher;

    #[async_trait]
    impl JobLauncher for EchoLauncher {
        async fn launch(&self, spec: &RunSpec) -> JobResult {
            let now = Utc::now();
            JobResult {
                run_id: spec.run_id.clone(),
                command: vec!["stub".into()],
                work_dir: PathBuf::from("."),
                stdout: spec.run_id.clone(),
                stderr: String::new(),
                exit_code: Some(0),
                started_at: now,
                finished_at: now,
                duration_ms: 0,
                status: JobStatus::Success,
            }
        }
    }

    fn specs(ids: &[&str]) -> Vec<RunSpec> {
        ids.iter()
            .map(|id| RunSpec {
                run_id: id.to_string(),
                primary: PathBuf::from(format!("{id}.nml1")),
                secondary: PathBuf::from(format!("{id}.nml2")),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_every_run_reported_once() {
        let runner = BatchRunner::new(Arc::new(EchoLauncher), WorkerPolicy::with_workers(2));
        let report = runner.run(specs(&["a", "b", "c", "d", "e"])).await;

        assert_eq!(report.len(), 5);
        assert_eq!(report.worker_count, 2);
        assert!(report.all_passed());
        assert_eq!(report.results["c"].stdout, "c");
    }

    #[tokio::test]
    async fn test_progress_callback_counts_up() {
        let runner = BatchRunner::new(Arc::new(EchoLauncher), WorkerPolicy::default());
        let mut seen = Vec::new();
        runner
            .run_with_progress(specs(&["a", "b", "c"]), |r, done, total| {
                seen.push((r.run_id.clone(), done, total));
            })
            .await;

        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen.iter().map(|(_, d, _)| *d).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(seen.iter().all(|(_, _, t)| *t == 3));
    }

    #[tokio::test]
    async fn test_duplicate_ids_do_not_overwrite() {
        let runner = BatchRunner::new(Arc::new(EchoLauncher), WorkerPolicy::default());
        let report = runner.run(specs(&["m100", "m100"])).await;
        assert_eq!(report.len(), 2);
        assert!(report.results.contains_key("m100"));
        assert!(report.results.contains_key("m100#2"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let runner = BatchRunner::new(Arc::new(EchoLauncher), WorkerPolicy::default());
        let report = runner.run(Vec::new()).await;
        assert!(report.is_empty());
        assert!(report.all_passed());
    }

    #[test]
    fn test_report_counts() {
        let now = Utc::now();
        let mk = |id: &str, status| JobResult {
            run_id: id.into(),
            command: vec![],
            work_dir: PathBuf::new(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            status,
        };
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), mk("a", JobStatus::Success));
        results.insert("b".to_string(), mk("b", JobStatus::Failed));
        let report = BatchReport {
            batch_id: Uuid::new_v4(),
            worker_count: 1,
            started_at: now,
            duration_ms: 0,
            results,
        };
        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.all_passed());
        assert_eq!(report.failed().next().map(|r| r.run_id.as_str()), Some("b"));
    }
}
