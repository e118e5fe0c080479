//! Reading `.track` files into [`Track`] tables.
//!
//! YREC writes a block of metadata lines before the table. With the extended
//! header enabled, the last metadata line carries a `#Version` marker and the
//! column header follows on the next line. A file may repeat the header
//! block (restarted runs), so only the **last** marker counts.

use std::fs;
use std::path::Path;

use crate::error::IngestError;
use crate::track::table::{Track, Value};

/// Literal token that ends the metadata block.
pub const VERSION_MARKER: &str = "#Version";

/// Converts one output file into a table.
///
/// The loader takes its reader by injection, so tests and alternative file
/// layouts can supply their own. Any `Fn(&Path) -> Result<Track, IngestError>`
/// is a reader.
pub trait TrackReader: Send + Sync {
    fn read_track(&self, path: &Path) -> Result<Track, IngestError>;
}

impl<F> TrackReader for F
where
    F: Fn(&Path) -> Result<Track, IngestError> + Send + Sync,
{
    fn read_track(&self, path: &Path) -> Result<Track, IngestError> {
        self(path)
    }
}

/// The stock reader for `#Version`-delimited files.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionMarkerReader;

impl TrackReader for VersionMarkerReader {
    fn read_track(&self, path: &Path) -> Result<Track, IngestError> {
        let text = fs::read_to_string(path).map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_track(&text, path)
    }
}

/// Parse the text of a track file. `path` is only used in error messages.
pub fn parse_track(text: &str, path: &Path) -> Result<Track, IngestError> {
    let lines: Vec<&str> = text.lines().collect();

    let marker = lines
        .iter()
        .rposition(|l| l.contains(VERSION_MARKER))
        .ok_or_else(|| IngestError::MissingMarker {
            path: path.to_path_buf(),
        })?;

    // Line numbers below are 1-based for error messages.
    let mut body = lines
        .iter()
        .enumerate()
        .skip(marker + 1)
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header_line) = body.next().ok_or_else(|| IngestError::MissingHeader {
        path: path.to_path_buf(),
    })?;
    let columns: Vec<String> = header_line.split_whitespace().map(str::to_string).collect();

    let mut rows = Vec::new();
    for (idx, line) in body {
        let row: Vec<Value> = line.split_whitespace().map(Value::parse).collect();
        if row.len() != columns.len() {
            return Err(IngestError::RowWidth {
                path: path.to_path_buf(),
                line: idx + 1,
                expected: columns.len(),
                found: row.len(),
            });
        }
        rows.push(row);
    }

    Ok(Track::new(columns, rows))
}
