//! Error types for Sieve

use crate::transform::Operation;
use crate::types::{DatasetId, UserId, ViewId};
use thiserror::Error;

/// Failure of a single transform against a table
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("{transform} does not support the {operation} operation")]
    UnsupportedOperation {
        transform: String,
        operation: Operation,
    },

    #[error("resource unavailable: {0}")]
    Resource(String),
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum SieveError {
    #[error("unknown transform type '{0}'")]
    UnknownTransformType(String),

    #[error("malformed transform {transform}: {reason}")]
    MalformedTransform { transform: String, reason: String },

    #[error("output label '{label}' is produced by both {first} and {second}")]
    DuplicateOutputLabel {
        label: String,
        first: String,
        second: String,
    },

    #[error("view {view_id}: transform {transform} failed: {source}")]
    TransformApplication {
        view_id: ViewId,
        transform: String,
        #[source]
        source: TransformError,
    },

    #[error("view {view_id}: {source}")]
    Query {
        view_id: ViewId,
        #[source]
        source: TransformError,
    },

    #[error("view {0} not found")]
    ViewNotFound(ViewId),

    #[error("dataset {0} not found")]
    DatasetNotFound(DatasetId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("user {0} has no associated datasets")]
    NoDataset(UserId),

    #[error("transform {0} is not part of the view")]
    RemoveNonexistentTransform(String),

    #[error("failed to load dataset '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SieveError>;
