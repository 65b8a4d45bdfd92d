//! In-memory tables
//!
//! A table is an ordered list of named columns over row-major cells.
//! Every row holds exactly one cell per column.

use crate::error::TransformError;
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sort request attached to a table by an enrichment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub ascending: bool,
}

impl SortKey {
    pub fn new(column: impl Into<String>, ascending: bool) -> Self {
        SortKey {
            column: column.into(),
            ascending,
        }
    }
}

pub type Row = Vec<Value>;

/// Row-major table of scalar values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
    default_sort: Option<SortKey>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
            default_sort: None,
        }
    }

    /// Build a table from rows, padding short rows with `Empty` and
    /// truncating long ones so the column invariant holds.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Empty);
                row
            })
            .collect();

        Table {
            columns,
            rows,
            default_sort: None,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Index of a column, or `MissingColumn`
    pub fn require_column(&self, name: &str) -> Result<usize, TransformError> {
        self.column_index(name)
            .ok_or_else(|| TransformError::MissingColumn(name.to_string()))
    }

    /// Append a row; it is padded/truncated to the table width
    pub fn push_row(&mut self, mut row: Row) {
        row.resize(self.columns.len(), Value::Empty);
        self.rows.push(row);
    }

    /// Get a cell by row index and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// All values of one column in row order
    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>, TransformError> {
        let index = self.require_column(name)?;
        Ok(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Keep only the rows for which `predicate` holds
    pub fn retain_rows<F>(&self, mut predicate: F) -> Table
    where
        F: FnMut(&Row) -> bool,
    {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|row| predicate(row)).cloned().collect(),
            default_sort: self.default_sort.clone(),
        }
    }

    /// Set a column's values, appending the column if it does not exist yet.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len());
        match self.column_index(name) {
            Some(index) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[index] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                let mut values = values.into_iter();
                for row in self.rows.iter_mut() {
                    row.push(values.next().unwrap_or_default());
                }
            }
        }
    }

    pub fn default_sort(&self) -> Option<&SortKey> {
        self.default_sort.as_ref()
    }

    pub fn set_default_sort(&mut self, sort: Option<SortKey>) {
        self.default_sort = sort;
    }

    /// Stable sort by a column
    pub fn sort_by(&mut self, column: &str, ascending: bool) -> Result<(), TransformError> {
        let index = self.require_column(column)?;
        self.rows.sort_by(|a, b| {
            let ordering = a[index].sort_cmp(&b[index]);
            if ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
        Ok(())
    }

    /// First `limit` rows
    pub fn head(&self, limit: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(limit).cloned().collect(),
            default_sort: self.default_sort.clone(),
        }
    }

    /// Rows as column-name keyed records
    pub fn records(&self) -> Vec<BTreeMap<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}
