//! Error types for batch discovery and execution.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("no .nml1/.nml2 pairs found in {}", display_dirs(.searched))]
    NoRunsFound { searched: Vec<PathBuf> },

    #[error("failed to resolve {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn display_dirs(dirs: &[PathBuf]) -> String {
    dirs.iter()
        .map(|d| d.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;
