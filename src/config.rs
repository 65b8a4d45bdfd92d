//! Session configuration

use crate::error::{Result, SieveError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where a session keeps its records and finds its data files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the record files and tag maps
    pub config_dir: PathBuf,
    /// Directory the dataset files are read from
    pub data_dir: PathBuf,
    pub users_filename: String,
    pub datasets_filename: String,
    pub views_filename: String,
    pub view_history_filename: String,
    /// Tag maps are stored as `{tag_prefix}_{dataset}.json`
    pub tag_prefix: String,
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub log_level: String,
    /// Rows returned when a caller gives no limit
    pub row_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            config_dir: PathBuf::from("config"),
            data_dir: PathBuf::from("data"),
            users_filename: "users.json".to_string(),
            datasets_filename: "datasets.json".to_string(),
            views_filename: "data_views.json".to_string(),
            view_history_filename: "data_view_history.json".to_string(),
            tag_prefix: "tags".to_string(),
            log_level: "info".to_string(),
            row_limit: 250,
        }
    }
}

impl Config {
    /// Default layout rooted at one directory
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Config {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
            ..Config::default()
        }
    }

    /// Read a JSON config file; absent fields keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SieveError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| SieveError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.row_limit == 0 {
            return Err(SieveError::Config("row_limit must be positive".to_string()));
        }
        for (field, value) in [
            ("users_filename", &self.users_filename),
            ("datasets_filename", &self.datasets_filename),
            ("views_filename", &self.views_filename),
            ("view_history_filename", &self.view_history_filename),
        ] {
            if value.trim().is_empty() {
                return Err(SieveError::Config(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }

    pub fn users_path(&self) -> PathBuf {
        self.config_dir.join(&self.users_filename)
    }

    pub fn datasets_path(&self) -> PathBuf {
        self.config_dir.join(&self.datasets_filename)
    }

    pub fn views_path(&self) -> PathBuf {
        self.config_dir.join(&self.views_filename)
    }

    pub fn view_history_path(&self) -> PathBuf {
        self.config_dir.join(&self.view_history_filename)
    }

    /// Tag maps live next to the other records
    pub fn tag_dir(&self) -> &Path {
        &self.config_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sieve.json");
        std::fs::write(&path, r#"{"data_dir": "/srv/surveys", "row_limit": 50}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/surveys"));
        assert_eq!(config.row_limit, 50);
        assert_eq!(config.users_filename, "users.json");
        assert_eq!(config.views_path(), PathBuf::from("config/data_views.json"));
    }

    #[test]
    fn test_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sieve.json");
        std::fs::write(&path, r#"{"row_limit": 0}"#).unwrap();
        assert!(matches!(Config::load(&path), Err(SieveError::Config(_))));

        assert!(matches!(
            Config::load(dir.path().join("missing.json")),
            Err(SieveError::Config(_))
        ));
    }
}
