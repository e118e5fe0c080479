//! YREC batch execution
//!
//! - Pairs `.nml1`/`.nml2` namelists into runs
//! - Executes runs in parallel under a bounded worker count
//! - Reports one result per run, successful or not

pub mod concurrency;
pub mod error;
pub mod job;
pub mod launcher;
pub mod locator;
pub mod pool;

// Re-export key types
pub use concurrency::{available_parallelism, WorkerPolicy};
pub use error::{BatchError, Result};
pub use job::{FailureSignal, JobResult, JobStatus};
pub use launcher::{JobLauncher, ModelCommand};
pub use locator::{locate_runs, LocatedRuns, RunSpec};
pub use pool::{BatchReport, BatchRunner};
