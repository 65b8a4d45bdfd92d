//! Whole-file JSON persistence
//!
//! Record stores are loaded eagerly and rewritten wholesale on every change.
//! Writes go to a sibling temporary file that is renamed over the target,
//! so a failed write never leaves a truncated file behind.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load a JSON document, creating the file from `init` if it does not exist
pub fn load_or_init<T, F>(path: &Path, init: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> T,
{
    if !path.exists() {
        debug!(path = %path.display(), "initializing missing file");
        let value = init();
        save(path, &value)?;
        return Ok(value);
    }

    debug!(path = %path.display(), "start load");
    let file = File::open(path)?;
    let value = serde_json::from_reader(BufReader::new(file))?;
    debug!(path = %path.display(), "end load");
    Ok(value)
}

/// Load a JSON document if the file exists
pub fn load_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    Ok(Some(serde_json::from_reader(BufReader::new(file))?))
}

/// Atomically rewrite a JSON document
pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    debug!(path = %path.display(), "start save");

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = temp_path(path);
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    debug!(path = %path.display(), "end save");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
