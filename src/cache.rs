//! Materialized table cache
//!
//! Per dataset, maps view id to the table computed for it together with the
//! exact transform list that produced it. Both live in one entry so they are
//! always inserted together. Raw loaded tables are cached per dataset as
//! well. Nothing is ever evicted.

use crate::table::Table;
use crate::types::{DatasetId, ViewId};
use crate::view::TransformList;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

struct CachedTable {
    table: Arc<Table>,
    transforms: TransformList,
    hit_count: usize,
}

/// A cached view usable as the starting point for another view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseCandidate {
    pub view_id: ViewId,
    /// Distinct target transforms the base does not already apply
    pub remaining: usize,
}

#[derive(Default)]
struct CacheState {
    tables: HashMap<DatasetId, BTreeMap<ViewId, CachedTable>>,
    raw: HashMap<DatasetId, Arc<Table>>,
    misses: usize,
}

pub struct TableCache {
    state: Mutex<CacheState>,
}

impl TableCache {
    pub fn new() -> Self {
        TableCache {
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Cached table for a view
    pub fn get(&self, dataset_id: DatasetId, view_id: ViewId) -> Option<Arc<Table>> {
        let mut state = self.state.lock();
        let cached = state
            .tables
            .get_mut(&dataset_id)
            .and_then(|tables| tables.get_mut(&view_id))
            .map(|cached| {
                cached.hit_count += 1;
                cached.table.clone()
            });
        if cached.is_none() {
            state.misses += 1;
        }
        cached
    }

    pub fn contains(&self, dataset_id: DatasetId, view_id: ViewId) -> bool {
        self.state
            .lock()
            .tables
            .get(&dataset_id)
            .map_or(false, |tables| tables.contains_key(&view_id))
    }

    /// Transform list recorded for a cached view
    pub fn transforms_of(&self, dataset_id: DatasetId, view_id: ViewId) -> Option<TransformList> {
        self.state
            .lock()
            .tables
            .get(&dataset_id)
            .and_then(|tables| tables.get(&view_id))
            .map(|cached| cached.transforms.clone())
    }

    /// Record a computed table with the transforms that produced it
    pub fn insert(
        &self,
        dataset_id: DatasetId,
        view_id: ViewId,
        transforms: TransformList,
        table: Arc<Table>,
    ) {
        self.state.lock().tables.entry(dataset_id).or_default().insert(
            view_id,
            CachedTable {
                table,
                transforms,
                hit_count: 0,
            },
        );
    }

    /// Cheapest cached view whose transforms are all part of `target`.
    ///
    /// Cost is the number of distinct target transforms the candidate lacks;
    /// ties go to the lowest view id.
    pub fn best_base(&self, dataset_id: DatasetId, target: &TransformList) -> Option<BaseCandidate> {
        let state = self.state.lock();
        let tables = state.tables.get(&dataset_id)?;
        let target_set = target.transform_set();

        let mut best: Option<BaseCandidate> = None;
        for (&view_id, cached) in tables {
            let candidate_set = cached.transforms.transform_set();
            if !candidate_set.is_subset(&target_set) {
                continue;
            }
            let remaining = target_set.difference(&candidate_set).count();
            // ascending id order: strict comparison keeps the lowest id on ties
            if best.as_ref().map_or(true, |b| remaining < b.remaining) {
                best = Some(BaseCandidate { view_id, remaining });
            }
        }
        best
    }

    pub fn raw(&self, dataset_id: DatasetId) -> Option<Arc<Table>> {
        self.state.lock().raw.get(&dataset_id).cloned()
    }

    pub fn insert_raw(&self, dataset_id: DatasetId, table: Arc<Table>) {
        self.state.lock().raw.insert(dataset_id, table);
    }

    /// Number of cached view tables for a dataset
    pub fn len(&self, dataset_id: DatasetId) -> usize {
        self.state
            .lock()
            .tables
            .get(&dataset_id)
            .map_or(0, BTreeMap::len)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            datasets: state.tables.len(),
            tables: state.tables.values().map(BTreeMap::len).sum(),
            raw_tables: state.raw.len(),
            total_hits: state
                .tables
                .values()
                .flat_map(|tables| tables.values())
                .map(|cached| cached.hit_count)
                .sum(),
            total_misses: state.misses,
        }
    }
}

impl Default for TableCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub datasets: usize,
    pub tables: usize,
    pub raw_tables: usize,
    pub total_hits: usize,
    pub total_misses: usize,
}
