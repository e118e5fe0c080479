//! Error taxonomy for track ingestion, classification and namelist handling.

use std::path::PathBuf;

/// Errors produced while turning one `.track` file into a [`Track`](crate::Track).
///
/// These are per-file failures: the loader logs them and skips the file.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("no '#Version' marker found in {}", path.display())]
    MissingMarker { path: PathBuf },

    #[error("no header row after the last '#Version' marker in {}", path.display())]
    MissingHeader { path: PathBuf },

    #[error("{}:{line}: expected {expected} fields, found {found}", path.display())]
    RowWidth {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the classification pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("{derivation} requires load_all_tracks = true")]
    RawTracksRequired { derivation: &'static str },
}

/// Errors raised while rewriting namelist files.
#[derive(Debug, thiserror::Error)]
pub enum NamelistError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for classification operations.
pub type Result<T> = std::result::Result<T, ClassifyError>;
