//! Discovery of `.nml1` / `.nml2` namelist pairs.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BatchError, Result};

/// Extension of the primary (control) namelist.
pub const PRIMARY_EXTENSION: &str = "nml1";

/// Extension of the secondary (physics) namelist.
pub const SECONDARY_EXTENSION: &str = "nml2";

/// One YREC invocation: a matched pair of namelists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunSpec {
    /// Shared file stem, qualified by directory name if the stem repeats.
    pub run_id: String,

    /// Absolute path of the `.nml1` file.
    pub primary: PathBuf,

    /// Absolute path of the `.nml2` file.
    pub secondary: PathBuf,
}

/// Result of scanning the run directories.
#[derive(Debug, Clone, Default)]
pub struct LocatedRuns {
    /// Matched pairs, in directory order then file-name order.
    pub runs: Vec<RunSpec>,

    /// `.nml1` files that had no `.nml2` partner.
    pub unmatched: Vec<PathBuf>,
}

/// Scan `dirs` (non-recursively) for namelist pairs.
///
/// Fails with [`BatchError::NoRunsFound`] if no pair exists in any directory.
/// Unmatched `.nml1` files are logged and returned, never fatal.
pub fn locate_runs(dirs: &[PathBuf]) -> Result<LocatedRuns> {
    let mut located = LocatedRuns::default();
    let mut seen_ids = HashSet::new();

    for dir in dirs {
        let (primaries, secondaries) = match list_namelists(dir) {
            Ok(lists) => lists,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot read run directory");
                continue;
            }
        };

        for nml1 in primaries {
            let Some(stem) = file_stem(&nml1) else {
                continue;
            };
            let Some(nml2) = secondaries.get(&stem) else {
                warn!(file = %nml1.display(), "No matching .nml2");
                located.unmatched.push(nml1);
                continue;
            };

            let run_id = unique_run_id(&stem, dir, &mut seen_ids);
            let spec = RunSpec {
                run_id,
                primary: absolute(&nml1)?,
                secondary: absolute(nml2)?,
            };
            debug!(run_id = %spec.run_id, "Found namelist pair");
            located.runs.push(spec);
        }
    }

    if located.runs.is_empty() {
        return Err(BatchError::NoRunsFound {
            searched: dirs.to_vec(),
        });
    }

    info!(
        runs = located.runs.len(),
        unmatched = located.unmatched.len(),
        "Located namelist pairs"
    );
    Ok(located)
}

/// Sorted `.nml1` files and a stem -> `.nml2` lookup for one directory.
fn list_namelists(dir: &Path) -> std::io::Result<(Vec<PathBuf>, BTreeMap<String, PathBuf>)> {
    let mut primaries = Vec::new();
    let mut secondaries = BTreeMap::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(PRIMARY_EXTENSION) => primaries.push(path),
            Some(SECONDARY_EXTENSION) => {
                if let Some(stem) = file_stem(&path) {
                    secondaries.insert(stem, path);
                }
            }
            _ => {}
        }
    }

    primaries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok((primaries, secondaries))
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|source| BatchError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// The stem itself, or `<dir>/<stem>` (then `#n`) when already taken.
fn unique_run_id(stem: &str, dir: &Path, seen: &mut HashSet<String>) -> String {
    if seen.insert(stem.to_string()) {
        return stem.to_string();
    }

    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string());
    let qualified = format!("{dir_name}/{stem}");
    if seen.insert(qualified.clone()) {
        return qualified;
    }

    let mut n = 2;
    loop {
        let candidate = format!("{qualified}#{n}");
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
