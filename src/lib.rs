//! Sieve - Rust Core
//!
//! View engine for a survey-response analyzer. A view is an ordered list of
//! filter and enrichment transforms applied to one dataset; views are
//! deduplicated by their canonical key and their tables are cached and
//! reused as starting points for other views.
//!
//! # Architecture
//!
//! - Transform Layer: closed set of transforms with a registry and wire form
//! - Dependency Layer: transform trees for validation and cascading removal
//! - View Layer: view store with dedup, mutation engine, label sequences
//! - Resolution Layer: table cache with best-base selection and the resolver
//! - Records Layer: users, datasets, view history and tag maps as JSON files
//! - Session: facade over all of the above

pub mod types;
pub mod error;
pub mod table;

// Transform modules
pub mod transform;
pub mod registry;
pub mod tree;

// View modules
pub mod label;
pub mod view;
pub mod mutation;
pub mod view_store;

// Resolution modules
pub mod cache;
pub mod resolver;
pub mod loader;

// Records and persistence
pub mod persistence;
pub mod records;
pub mod tags;

// Configuration, logging and metrics
pub mod config;
pub mod telemetry;
pub mod metrics;

pub mod analytics;
pub mod session;

pub use error::{Result, SieveError, TransformError};
pub use types::{DatasetId, UserId, Value, ViewId};
pub use table::{SortKey, Table};

// Transform exports
pub use transform::{DateSpan, Operation, Transform, TransformContext, WireTransform};
pub use registry::{registry, ParameterDef, TransformDef, TransformRegistry};
pub use tree::TransformTree;

// View exports
pub use label::{Label, LabelSequence, LabelType};
pub use view::{CanonicalKey, SkippedTransform, TransformList, View, ViewRecord};
pub use mutation::{apply_mutation, MutationResult, ViewMutation};
pub use view_store::{LoadReport, ViewOutcome, ViewStore};

// Resolution exports
pub use cache::{BaseCandidate, CacheStats, TableCache};
pub use resolver::Resolver;
pub use loader::{CsvLoader, MemoryLoader, TableLoader};

// Records exports
pub use records::{Dataset, DatasetStore, User, UserStore, ViewHistory, DEFAULT_USER_ID};
pub use tags::{TagMap, TagStore};

pub use analytics::WordHistory;
pub use config::Config;
pub use metrics::{ResolutionSource, SieveMetrics};
pub use session::Session;
