//! View store
//!
//! Holds every view, indexed by id and by canonical key. No two views share a
//! canonical key. New views get `1 + max(id)`. The store is persisted as a
//! JSON array of view records, rewritten wholesale on every creation; the
//! in-memory indexes only change after the rewrite succeeded.

use crate::error::{Result, SieveError};
use crate::label::LabelSequence;
use crate::mutation::{apply_mutation, ViewMutation};
use crate::persistence;
use crate::types::{DatasetId, UserId, ViewId};
use crate::view::{CanonicalKey, SkippedTransform, TransformList, View, ViewRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Transforms dropped while loading persisted views
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub views: usize,
    pub skipped: Vec<(ViewId, SkippedTransform)>,
}

/// A view returned by a create call, and whether it is new
#[derive(Debug, Clone, PartialEq)]
pub struct ViewOutcome {
    pub view: View,
    pub created: bool,
}

#[derive(Default)]
struct ViewIndex {
    views: Vec<View>,
    by_id: HashMap<ViewId, usize>,
    by_key: HashMap<CanonicalKey, ViewId>,
}

impl ViewIndex {
    fn insert(&mut self, view: View) {
        let key = view.canonical_key();
        if let Some(existing) = self.by_key.get(&key) {
            warn!(view = %view.id, existing = %existing, "duplicate canonical key; keeping the earlier view");
        } else {
            self.by_key.insert(key, view.id);
        }
        self.by_id.insert(view.id, self.views.len());
        self.views.push(view);
    }

    fn next_id(&self) -> ViewId {
        let max = self.views.iter().map(|v| v.id.as_u64()).max().unwrap_or(0);
        ViewId::new(max + 1)
    }

    fn get(&self, id: ViewId) -> Option<&View> {
        self.by_id.get(&id).map(|&index| &self.views[index])
    }

    fn records_with(&self, view: &View) -> Vec<ViewRecord> {
        self.views
            .iter()
            .chain(std::iter::once(view))
            .map(View::to_record)
            .collect()
    }
}

pub struct ViewStore {
    path: Option<PathBuf>,
    index: Mutex<ViewIndex>,
}

impl ViewStore {
    /// Store that never touches disk
    pub fn in_memory() -> Self {
        ViewStore {
            path: None,
            index: Mutex::new(ViewIndex::default()),
        }
    }

    /// Load views from `path`, creating an empty file if it is missing.
    /// Transforms that no longer decode are dropped and reported.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, LoadReport)> {
        let path = path.as_ref().to_path_buf();
        let records: Vec<ViewRecord> = persistence::load_or_init(&path, Vec::new)?;

        let mut index = ViewIndex::default();
        let mut report = LoadReport::default();
        for record in records {
            let (view, skipped) = View::from_record(record);
            report
                .skipped
                .extend(skipped.into_iter().map(|s| (view.id, s)));
            index.insert(view);
        }
        report.views = index.views.len();

        info!(path = %path.display(), views = report.views, skipped = report.skipped.len(), "loaded views");

        Ok((
            ViewStore {
                path: Some(path),
                index: Mutex::new(index),
            },
            report,
        ))
    }

    pub fn len(&self) -> usize {
        self.index.lock().views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: ViewId) -> Option<View> {
        self.index.lock().get(id).cloned()
    }

    pub fn by_id(&self, id: ViewId) -> Result<View> {
        self.get(id).ok_or(SieveError::ViewNotFound(id))
    }

    /// View with this canonical key, if any
    pub fn by_key(&self, key: &CanonicalKey) -> Option<View> {
        let index = self.index.lock();
        index.by_key.get(key).and_then(|&id| index.get(id)).cloned()
    }

    /// Views matching the optional user and dataset, in creation order
    pub fn find(&self, user_id: Option<UserId>, dataset_id: Option<DatasetId>) -> Vec<View> {
        self.index
            .lock()
            .views
            .iter()
            .filter(|v| user_id.map_or(true, |u| u == v.user_id))
            .filter(|v| dataset_id.map_or(true, |d| d == v.dataset_id))
            .cloned()
            .collect()
    }

    pub fn find_first(&self, user_id: Option<UserId>, dataset_id: Option<DatasetId>) -> Option<View> {
        self.index
            .lock()
            .views
            .iter()
            .find(|v| {
                user_id.map_or(true, |u| u == v.user_id)
                    && dataset_id.map_or(true, |d| d == v.dataset_id)
            })
            .cloned()
    }

    /// The dataset's root view: no transforms, labels are the raw columns
    pub fn create_root(
        &self,
        user_id: UserId,
        dataset_id: DatasetId,
        labels: LabelSequence,
    ) -> Result<ViewOutcome> {
        self.create(None, user_id, dataset_id, labels, TransformList::new())
    }

    /// Create a view unless one with the same canonical key exists
    pub fn create(
        &self,
        parent_id: Option<ViewId>,
        user_id: UserId,
        dataset_id: DatasetId,
        labels: LabelSequence,
        transforms: TransformList,
    ) -> Result<ViewOutcome> {
        let key = CanonicalKey::new(dataset_id, &transforms);
        let mut index = self.index.lock();

        if let Some(view) = index.by_key.get(&key).and_then(|&id| index.get(id)) {
            info!(view = %view.id, "reusing existing view");
            return Ok(ViewOutcome {
                view: view.clone(),
                created: false,
            });
        }

        let view = View {
            id: index.next_id(),
            parent_id,
            dataset_id,
            user_id,
            labels,
            transforms,
        };

        if let Some(path) = &self.path {
            persistence::save(path, &index.records_with(&view))?;
        }

        info!(view = %view.id, parent = ?view.parent_id, dataset = %dataset_id, "created view");
        index.insert(view.clone());

        Ok(ViewOutcome {
            view,
            created: true,
        })
    }

    /// Derive a view from `view_id` by applying a mutation
    pub fn transform_view(&self, view_id: ViewId, mutation: &ViewMutation) -> Result<ViewOutcome> {
        let base = self.by_id(view_id)?;
        debug!(view = %view_id, add = mutation.add.len(), del = mutation.del.len(), "transforming view");

        let result = apply_mutation(&base, mutation)?;
        self.create(
            Some(base.id),
            base.user_id,
            base.dataset_id,
            result.labels,
            result.transforms,
        )
    }
}

impl Default for ViewStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
