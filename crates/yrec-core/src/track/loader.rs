//! Discovery of `.track` files and grouping into per-directory bundles.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::track::ingest::TrackReader;
use crate::track::table::Track;

/// Extension of YREC evolutionary track files.
pub const TRACK_EXTENSION: &str = "track";

/// Suffix appended to the parent directory name to form a bundle name.
pub const BUNDLE_SUFFIX: &str = "_yrectracks";

/// One ingested file together with its file name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedTrack {
    pub track: Track,
    pub file_name: String,
}

/// Bundle name -> tracks in discovery order.
pub type TrackBundles = BTreeMap<String, Vec<LoadedTrack>>;

/// A file the reader rejected.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of a loader pass.
#[derive(Debug, Default)]
pub struct LoadedTracks {
    pub bundles: TrackBundles,
    pub skipped: Vec<SkippedFile>,
}

impl LoadedTracks {
    /// Total number of tracks across all bundles.
    pub fn track_count(&self) -> usize {
        self.bundles.values().map(Vec::len).sum()
    }
}

/// Walks track directories and hands each file to a [`TrackReader`].
pub struct TrackLoader<R> {
    reader: R,
    recursive: bool,
}

impl<R: TrackReader> TrackLoader<R> {
    /// Create a recursive loader around `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            recursive: true,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Load every track under `dirs`.
    ///
    /// Files the reader rejects are logged, recorded in
    /// [`LoadedTracks::skipped`] and left out of the bundles.
    pub fn load(&self, dirs: &[PathBuf]) -> LoadedTracks {
        let mut out = LoadedTracks::default();

        for dir in dirs {
            for path in self.discover(dir) {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                let track = match self.reader.read_track(&path) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(file = %file_name, error = %e, "Failed to read track file");
                        out.skipped.push(SkippedFile {
                            path,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                let bundle = bundle_name(&path);
                debug!(file = %file_name, bundle = %bundle, rows = track.len(), "Loaded track");
                out.bundles
                    .entry(bundle)
                    .or_default()
                    .push(LoadedTrack { track, file_name });
            }
        }

        info!(
            bundles = out.bundles.len(),
            tracks = out.track_count(),
            skipped = out.skipped.len(),
            "Track loading finished"
        );
        out
    }

    /// Sorted list of `.track` files under `dir`.
    ///
    /// `dir` is canonicalized first so that `.`, `..` or a trailing `..`
    /// still give every file a named parent directory.
    fn discover(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let dir = &fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());

        if self.recursive {
            for entry in WalkDir::new(dir) {
                match entry {
                    Ok(e) if e.file_type().is_file() && is_track_file(e.path()) => {
                        files.push(e.into_path());
                    }
                    Ok(_) => {}
                    Err(err) => warn!(dir = %dir.display(), error = %err, "Directory traversal error"),
                }
            }
        } else {
            match fs::read_dir(dir) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        let path = entry.path();
                        if path.is_file() && is_track_file(&path) {
                            files.push(path);
                        }
                    }
                }
                Err(err) => warn!(dir = %dir.display(), error = %err, "Cannot read track directory"),
            }
        }

        files.sort();
        files
    }
}

fn is_track_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == TRACK_EXTENSION)
}

/// Bundle name for a file: its parent directory's stem plus [`BUNDLE_SUFFIX`].
pub fn bundle_name(path: &Path) -> String {
    let folder = path
        .parent()
        .and_then(Path::file_stem)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{folder}{BUNDLE_SUFFIX}")
}
