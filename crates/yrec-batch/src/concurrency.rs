//! Worker-count policy for the batch runner.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How many YREC processes may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPolicy {
    /// CPUs left free for the host when no override is given.
    pub reserve: usize,

    /// Explicit worker count; replaces the computed bound.
    pub workers: Option<i64>,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        Self {
            reserve: 3,
            workers: None,
        }
    }
}

impl WorkerPolicy {
    pub fn with_workers(workers: i64) -> Self {
        Self {
            workers: Some(workers),
            ..Self::default()
        }
    }

    /// Worker count for `jobs` runs on a host with `available` CPUs.
    ///
    /// Without an override: `min(jobs, max(1, available - reserve))`.
    /// An override below 1 is corrected to 1.
    pub fn worker_count(&self, available: usize, jobs: usize) -> usize {
        match self.workers {
            Some(n) if n < 1 => {
                warn!(requested = n, "Number of workers cannot be below 1, defaulting to 1");
                1
            }
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
            None => available
                .saturating_sub(self.reserve)
                .max(1)
                .min(jobs.max(1)),
        }
    }

    /// [`WorkerPolicy::worker_count`] against this host's parallelism.
    pub fn resolve(&self, jobs: usize) -> usize {
        self.worker_count(available_parallelism(), jobs)
    }
}

/// Logical CPUs available to this process, at least 1.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
