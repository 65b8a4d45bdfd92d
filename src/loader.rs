//! Raw table loading
//!
//! Loaders turn a dataset descriptor into a table with every original column
//! present and blank cells normalized to `Value::Empty`.

use crate::error::{Result, SieveError};
use crate::records::Dataset;
use crate::table::Table;
use crate::types::{DatasetId, Value};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub trait TableLoader: Send + Sync {
    fn load(&self, dataset: &Dataset) -> Result<Table>;
}

/// Delimited text files under a data directory
pub struct CsvLoader {
    data_dir: PathBuf,
}

impl CsvLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        CsvLoader {
            data_dir: data_dir.into(),
        }
    }

    pub fn path_of(&self, dataset: &Dataset) -> PathBuf {
        self.data_dir.join(&dataset.filename)
    }

    fn delimiter_for(path: &Path) -> u8 {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => b',',
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
            other => {
                warn!(path = %path.display(), extension = ?other, "unrecognized extension, reading as CSV");
                b','
            }
        }
    }

    /// Parse delimited text with a header row
    pub fn read<R: std::io::Read>(reader: R, delimiter: u8, source: &str) -> Result<Table> {
        let load_error = |e: csv::Error| SieveError::Load {
            path: source.to_string(),
            reason: e.to_string(),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(reader);

        let columns: Vec<String> = reader
            .headers()
            .map_err(load_error)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut table = Table::new(columns);
        for record in reader.records() {
            let record = record.map_err(load_error)?;
            table.push_row(record.iter().map(Value::parse).collect());
        }
        Ok(table)
    }
}

impl TableLoader for CsvLoader {
    fn load(&self, dataset: &Dataset) -> Result<Table> {
        let path = self.path_of(dataset);
        debug!(dataset = %dataset.id, path = %path.display(), "loading dataset");

        let file = std::fs::File::open(&path).map_err(|e| SieveError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let table = Self::read(file, Self::delimiter_for(&path), &path.display().to_string())?;

        debug!(dataset = %dataset.id, rows = table.len(), columns = table.columns().len(), "loaded dataset");
        Ok(table)
    }
}

/// Preloaded tables keyed by dataset id
#[derive(Default)]
pub struct MemoryLoader {
    tables: DashMap<DatasetId, Table>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dataset_id: DatasetId, table: Table) {
        self.tables.insert(dataset_id, table);
    }

    pub fn with_table(self, dataset_id: DatasetId, table: Table) -> Self {
        self.insert(dataset_id, table);
        self
    }
}

impl TableLoader for MemoryLoader {
    fn load(&self, dataset: &Dataset) -> Result<Table> {
        self.tables
            .get(&dataset.id)
            .map(|table| table.value().clone())
            .ok_or_else(|| SieveError::Load {
                path: dataset.filename.clone(),
                reason: "no table registered".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_normalizes_cells() {
        let data = " id ,Q1,Q2\n1,yes,\n2,,3.5\n3,no\n";
        let table = CsvLoader::read(data.as_bytes(), b',', "inline").unwrap();

        assert_eq!(table.columns(), &["id", "Q1", "Q2"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0, "id"), Some(&Value::Int(1)));
        assert_eq!(table.get(0, "Q2"), Some(&Value::Empty));
        assert_eq!(table.get(1, "Q1"), Some(&Value::Empty));
        assert_eq!(table.get(1, "Q2"), Some(&Value::Float(3.5)));
        assert_eq!(table.get(2, "Q2"), Some(&Value::Empty));
    }

    #[test]
    fn test_load_tsv_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("survey.tsv"), "Q1\tQ2\nyes\tslow page\n").unwrap();

        let loader = CsvLoader::new(dir.path());
        let table = loader
            .load(&Dataset::new(DatasetId::new(1), "survey.tsv"))
            .unwrap();
        assert_eq!(table.get(0, "Q2"), Some(&Value::from("slow page")));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loader = CsvLoader::new(dir.path());
        assert!(matches!(
            loader.load(&Dataset::new(DatasetId::new(1), "nope.csv")),
            Err(SieveError::Load { .. })
        ));
    }

    #[test]
    fn test_memory_loader() {
        let loader = MemoryLoader::new().with_table(
            DatasetId::new(2),
            Table::new(vec!["Q1".to_string()]),
        );
        assert!(loader.load(&Dataset::new(DatasetId::new(2), "x")).is_ok());
        assert!(loader.load(&Dataset::new(DatasetId::new(3), "y")).is_err());
    }
}
