//! Path fixing for YREC `.nml1` / `.nml2` namelists.
//!
//! Namelists shipped with model grids carry absolute paths from the machine
//! that produced them. [`NamelistResolver`] points input-file entries at the
//! local `<root>/input` tree and redirects output-file entries to a chosen
//! output directory, rewriting the files in place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::NamelistError;

/// Output-file keys and the extension each one is written with.
pub const OUTPUT_KEYS: &[(&str, &str)] = &[
    ("FLAST", ".last"),
    ("FMODPT", ".full"),
    ("FSTOR", ".store"),
    ("FTRACK", ".track"),
    ("FSHORT", ".short"),
    ("FPMOD", ".pmod"),
    ("FPENV", ".penv"),
    ("FPATM", ".atm"),
    ("FSNU", ".snu"),
    ("FSCOMP", ".excomp"),
];

/// Values containing any of these are placeholders and are left alone.
const PLACEHOLDER_WORDS: &[&str] = &["template", "dummy", "replace", "default"];

const NAMELIST_EXTENSIONS: &[&str] = &["nml1", "nml2"];

fn entry_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)([A-Z0-9_]+)\s*=\s*([^,\n]+)").expect("static namelist pattern")
    })
}

fn output_extension(key: &str) -> Option<&'static str> {
    OUTPUT_KEYS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, ext)| *ext)
}

fn is_placeholder(value: &str) -> bool {
    let lower = value.to_lowercase();
    PLACEHOLDER_WORDS.iter().any(|w| lower.contains(w))
}

/// Strip `!` comments and return `KEY -> value` with upper-cased keys and
/// unquoted values. Later assignments win.
pub fn parse_namelist(text: &str) -> BTreeMap<String, String> {
    let cleaned: Vec<&str> = text
        .lines()
        .map(|l| l.split('!').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty())
        .collect();
    let joined = cleaned.join("\n");

    entry_pattern()
        .captures_iter(&joined)
        .map(|c| {
            let key = c[1].to_uppercase();
            let value = c[2].trim().trim_matches('"').to_string();
            (key, value)
        })
        .collect()
}

/// Replace the value of every line whose key is in `updates`.
///
/// Rewritten lines take the form ` KEY = value`; all other lines, including
/// comments, are kept byte for byte.
pub fn rewrite(text: &str, updates: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let stripped = line.trim();
        let key = (!stripped.starts_with('!'))
            .then(|| stripped.split_once('='))
            .flatten()
            .map(|(k, _)| k.trim().to_uppercase());

        match key.and_then(|k| updates.get(&k).map(|v| (k, v))) {
            Some((k, v)) => {
                out.push_str(&format!(" {k} = {v}"));
                if line.ends_with('\n') {
                    out.push('\n');
                }
            }
            None => out.push_str(line),
        }
    }
    out
}

/// Outcome of fixing every namelist under one directory.
#[derive(Debug, Default)]
pub struct FixReport {
    pub updated: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Resolves namelist file entries against a local YREC tree.
#[derive(Debug, Clone)]
pub struct NamelistResolver {
    root_dir: PathBuf,
    outpath: Option<PathBuf>,
}

impl NamelistResolver {
    /// `root_dir` must contain an `input` directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            outpath: None,
        }
    }

    /// Redirect output-file keys into `outpath`.
    pub fn with_outpath(mut self, outpath: impl Into<PathBuf>) -> Self {
        self.outpath = Some(outpath.into());
        self
    }

    fn input_root(&self) -> PathBuf {
        self.root_dir.join("input")
    }

    /// Compute the new (quoted) value for each entry that should change.
    pub fn resolve(&self, entries: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut updates = BTreeMap::new();

        for (key, value) in entries {
            if is_placeholder(value) {
                continue;
            }

            match output_extension(key) {
                Some(ext) => {
                    if let Some(outpath) = &self.outpath {
                        let target = outpath.join(format!("{}{ext}", key.to_lowercase()));
                        debug!(key = %key, target = %target.display(), "Redirected output file");
                        updates.insert(key.clone(), format!("\"{}\"", target.display()));
                    }
                }
                None if value.contains('/') => {
                    let Some(name) = Path::new(value).file_name() else {
                        continue;
                    };
                    match self.find_input(name) {
                        Some(found) => {
                            debug!(key = %key, resolved = %found.display(), "Resolved input file");
                            updates.insert(key.clone(), format!("\"{}\"", found.display()));
                        }
                        None => {
                            warn!(key = %key, file = %name.to_string_lossy(), "Input file not found under input tree");
                        }
                    }
                }
                None => {}
            }
        }

        updates
    }

    /// First file named `name` under `<root>/input`, by sorted path.
    fn find_input(&self, name: &std::ffi::OsStr) -> Option<PathBuf> {
        let found = WalkDir::new(self.input_root())
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == name)?;
        let path = found.into_path();
        Some(fs::canonicalize(&path).unwrap_or(path))
    }

    /// Rewrite one namelist in place. Returns whether anything changed.
    pub fn fix_file(&self, path: &Path) -> Result<bool, NamelistError> {
        let io_err = |source| NamelistError::Io {
            path: path.to_path_buf(),
            source,
        };
        let text = fs::read_to_string(path).map_err(io_err)?;
        let updates = self.resolve(&parse_namelist(&text));
        let new_text = rewrite(&text, &updates);
        if new_text == text {
            return Ok(false);
        }
        fs::write(path, new_text).map_err(io_err)?;
        Ok(true)
    }

    /// Fix every `.nml1`/`.nml2` under `dir`, recursively.
    ///
    /// A failure on one file is logged and recorded; the rest still run.
    pub fn fix_directory(&self, dir: &Path) -> FixReport {
        let mut report = FixReport::default();

        let files: Vec<PathBuf> = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| NAMELIST_EXTENSIONS.iter().any(|n| ext == *n))
            })
            .collect();

        for file in files {
            match self.fix_file(&file) {
                Ok(true) => {
                    debug!(file = %file.display(), "Updated namelist");
                    report.updated.push(file);
                }
                Ok(false) => report.unchanged.push(file),
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Error updating namelist");
                    report.failed.push((file, e.to_string()));
                }
            }
        }

        info!(
            dir = %dir.display(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "Namelist update finished"
        );
        report
    }
}
