//! In-memory representation of one `.track` table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Core hydrogen mass fraction; the evolutionary-phase indicator.
pub const CORE_HYDROGEN_COLUMN: &str = "X_cen";

/// Stellar mass in solar masses.
pub const MASS_COLUMN: &str = "Mass";

/// Model age in gigayears.
pub const AGE_COLUMN: &str = "Age(Gyr)";

/// A single cell: numeric when the token parses as `f64`, text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// Parse a whitespace-delimited token.
    pub fn parse(token: &str) -> Self {
        match token.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Text(token.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// An ordered table of rows sharing one header.
///
/// A `Track` is never modified after ingestion. Derived views (subgiant
/// subsets, mass or age partitions) are new tables built with
/// [`Track::select_rows`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Track {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Track {
    /// Build a table. Every row must be as wide as `columns`.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell lookup by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Numeric view of one column; `None` entries are non-numeric cells.
    /// Returns `None` if the column does not exist.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_f64()).collect())
    }

    /// Copy the rows at `indices`, in the given order, into a new table.
    pub fn select_rows(&self, indices: &[usize]) -> Track {
        Track {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Copy the rows for which `keep` returns true.
    pub fn filter_rows<F>(&self, mut keep: F) -> Track
    where
        F: FnMut(&[Value]) -> bool,
    {
        Track {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}
