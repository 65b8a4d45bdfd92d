//! Logging setup

use crate::error::{Result, SieveError};
use std::str::FromStr;
use tracing::Level;

/// Parse a level name such as `info` or `DEBUG`
pub fn parse_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| SieveError::Config(format!("unknown log level '{}'", level)))
}

/// Install a global fmt subscriber at `level`. Returns false when a
/// subscriber was already installed.
pub fn init_tracing(level: &str) -> Result<bool> {
    let level = parse_level(level)?;
    Ok(tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok())
}
