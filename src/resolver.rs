//! Best-base resolver
//!
//! Produces the table for a view with as little recomputation as possible:
//! a cached table for the view itself, else the cheapest cached view whose
//! transforms are a subset of the requested ones plus the missing
//! transforms, else the raw dataset plus every transform. Transforms run
//! without holding the cache lock; the result is committed in one insert.

use crate::cache::TableCache;
use crate::error::{Result, SieveError};
use crate::loader::TableLoader;
use crate::metrics::{ResolutionSource, SieveMetrics};
use crate::records::Dataset;
use crate::table::Table;
use crate::tags::TagStore;
use crate::transform::{Transform, TransformContext};
use crate::view::View;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct Resolver {
    cache: TableCache,
    loader: Arc<dyn TableLoader>,
    tags: Arc<TagStore>,
    metrics: Option<Arc<SieveMetrics>>,
}

impl Resolver {
    pub fn new(loader: Arc<dyn TableLoader>, tags: Arc<TagStore>) -> Self {
        Resolver {
            cache: TableCache::new(),
            loader,
            tags,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SieveMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &TableCache {
        &self.cache
    }

    /// Table for `view`, whose dataset is `dataset`
    pub fn resolve(&self, view: &View, dataset: &Dataset) -> Result<Arc<Table>> {
        let start = Instant::now();
        match self.resolve_inner(view, dataset) {
            Ok((table, source)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_resolution(source, start.elapsed().as_secs_f64());
                }
                Ok(table)
            }
            Err(e) => {
                warn!(view = %view.id, error = %e, "resolution failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure();
                }
                Err(e)
            }
        }
    }

    fn resolve_inner(&self, view: &View, dataset: &Dataset) -> Result<(Arc<Table>, ResolutionSource)> {
        let dataset_id = view.dataset_id;

        if let Some(table) = self.cache.get(dataset_id, view.id) {
            debug!(view = %view.id, "loading cached view");
            return Ok((table, ResolutionSource::Cache));
        }
        info!(view = %view.id, "view not in cache");

        let base = self.cache.best_base(dataset_id, &view.transforms).and_then(|candidate| {
            let table = self.cache.get(dataset_id, candidate.view_id)?;
            let transforms = self.cache.transforms_of(dataset_id, candidate.view_id)?;
            Some((candidate, table, transforms))
        });

        let (start, pending, source): (Arc<Table>, Vec<&Transform>, ResolutionSource) = match &base {
            Some((candidate, table, applied)) => {
                info!(view = %view.id, base = %candidate.view_id, remaining = candidate.remaining, "generating view from cached base");
                let applied: HashSet<&Transform> = applied.iter().collect();
                let pending = view
                    .transforms
                    .iter()
                    .filter(|t| !applied.contains(t))
                    .collect();
                (table.clone(), pending, ResolutionSource::Base)
            }
            None => {
                info!(view = %view.id, "generating view from raw dataset");
                let raw = self.raw_table(dataset)?;
                (raw, view.transforms.iter().collect(), ResolutionSource::Raw)
            }
        };

        let table = if pending.is_empty() {
            start
        } else {
            Arc::new(self.apply_all(view, (*start).clone(), &pending)?)
        };

        self.cache
            .insert(dataset_id, view.id, view.transforms.clone(), table.clone());
        Ok((table, source))
    }

    fn apply_all(&self, view: &View, mut table: Table, transforms: &[&Transform]) -> Result<Table> {
        let ctx = TransformContext::new(view.dataset_id, &self.tags);
        for transform in transforms {
            table = transform
                .apply(table, &ctx)
                .map_err(|source| SieveError::TransformApplication {
                    view_id: view.id,
                    transform: transform.canonical(),
                    source,
                })?;
            if let Some(metrics) = &self.metrics {
                metrics.record_transform(transform.operation());
            }
        }
        Ok(table)
    }

    /// Raw dataset table, loaded once per dataset
    pub fn raw_table(&self, dataset: &Dataset) -> Result<Arc<Table>> {
        if let Some(table) = self.cache.raw(dataset.id) {
            return Ok(table);
        }
        let table = Arc::new(self.loader.load(dataset)?);
        self.cache.insert_raw(dataset.id, table.clone());
        Ok(table)
    }
}
