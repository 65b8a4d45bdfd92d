//! Session facade
//!
//! Ties the record stores, the view store, the tag store and the resolver
//! together behind the operations an analyst front end needs.

use crate::analytics::{self, WordHistory};
use crate::cache::CacheStats;
use crate::config::Config;
use crate::error::{Result, SieveError};
use crate::label::{LabelSequence, LabelType};
use crate::loader::TableLoader;
use crate::metrics::SieveMetrics;
use crate::mutation::ViewMutation;
use crate::records::{Dataset, DatasetStore, UserStore, ViewHistory, DEFAULT_USER_ID};
use crate::registry::{registry, TransformDef};
use crate::resolver::Resolver;
use crate::table::Table;
use crate::tags::{PrimaryKey, TagStore};
use crate::transform::Transform;
use crate::types::{DatasetId, UserId, ViewId};
use crate::view::View;
use crate::view_store::{LoadReport, ViewStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Session {
    config: Config,
    users: UserStore,
    datasets: DatasetStore,
    views: ViewStore,
    history: ViewHistory,
    tags: Arc<TagStore>,
    resolver: Resolver,
    metrics: Arc<SieveMetrics>,
    load_report: LoadReport,
}

impl Session {
    /// Open every store under `config` and warm the cache with the default
    /// user's most recent view
    pub fn open(config: Config, loader: Arc<dyn TableLoader>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.config_dir)?;

        let users = UserStore::open(config.users_path())?;
        let datasets = DatasetStore::open(config.datasets_path())?;
        let (views, load_report) = ViewStore::open(config.views_path())?;
        let history = ViewHistory::open(config.view_history_path())?;
        let tags = Arc::new(TagStore::new(config.tag_dir(), config.tag_prefix.clone()));

        for (view_id, skipped) in &load_report.skipped {
            warn!(view = %view_id, reason = %skipped.reason, "dropped persisted transform");
        }

        let session = Self::assemble(config, users, datasets, views, history, tags, loader, load_report)?;
        session.warm_up();
        Ok(session)
    }

    /// Session that keeps everything in memory
    pub fn in_memory(loader: Arc<dyn TableLoader>) -> Result<Self> {
        Self::assemble(
            Config::default(),
            UserStore::in_memory(),
            DatasetStore::in_memory(),
            ViewStore::in_memory(),
            ViewHistory::in_memory(),
            Arc::new(TagStore::in_memory()),
            loader,
            LoadReport::default(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        config: Config,
        users: UserStore,
        datasets: DatasetStore,
        views: ViewStore,
        history: ViewHistory,
        tags: Arc<TagStore>,
        loader: Arc<dyn TableLoader>,
        load_report: LoadReport,
    ) -> Result<Self> {
        let metrics = Arc::new(SieveMetrics::new()?);
        let resolver = Resolver::new(loader, tags.clone()).with_metrics(metrics.clone());
        Ok(Session {
            config,
            users,
            datasets,
            views,
            history,
            tags,
            resolver,
            metrics,
            load_report,
        })
    }

    fn warm_up(&self) {
        let Some(dataset_id) = self.users.last_dataset(DEFAULT_USER_ID) else {
            return;
        };
        let Some(view_id) = self.history.get(DEFAULT_USER_ID, dataset_id) else {
            return;
        };
        match self.table(view_id) {
            Ok(table) => info!(view = %view_id, rows = table.len(), "warmed up most recent view"),
            Err(e) => warn!(view = %view_id, error = %e, "warm-up failed"),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Transforms dropped while loading the view store
    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn datasets(&self) -> &DatasetStore {
        &self.datasets
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    /// Register `filename` if needed and make it the user's current dataset
    pub fn set_most_recent_dataset(&self, user_id: UserId, filename: &str) -> Result<Dataset> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(SieveError::Load {
                path: String::new(),
                reason: "empty filename".to_string(),
            });
        }
        self.users.by_id(user_id)?;

        let dataset = match self.datasets.by_filename(filename) {
            Some(dataset) => dataset,
            None => self.datasets.create(filename)?,
        };
        self.users.set_last_dataset(user_id, dataset.id)?;
        Ok(dataset)
    }

    pub fn most_recent_dataset(&self, user_id: UserId) -> Result<Dataset> {
        let dataset_id = self
            .users
            .last_dataset(user_id)
            .ok_or(SieveError::NoDataset(user_id))?;
        self.datasets.by_id(dataset_id)
    }

    /// The user's last view of a dataset (default: their current dataset).
    /// The first visit creates the dataset's root view.
    pub fn most_recent_view(&self, user_id: UserId, dataset_id: Option<DatasetId>) -> Result<View> {
        let dataset = match dataset_id {
            Some(id) => self.datasets.by_id(id)?,
            None => self.most_recent_dataset(user_id)?,
        };

        if let Some(view) = self
            .history
            .get(user_id, dataset.id)
            .and_then(|id| self.views.get(id))
        {
            return Ok(view);
        }

        let raw = self.resolver.raw_table(&dataset)?;
        let labels = LabelSequence::from_names(raw.columns().iter().cloned());
        let outcome = self.views.create_root(user_id, dataset.id, labels)?;
        self.history.set(user_id, dataset.id, outcome.view.id)?;
        Ok(outcome.view)
    }

    pub fn view(&self, view_id: ViewId) -> Result<View> {
        self.views.by_id(view_id)
    }

    /// Derive a view by adding and removing transforms; the result becomes
    /// the owner's most recent view of the dataset
    pub fn transform_view(
        &self,
        view_id: ViewId,
        add: Vec<Transform>,
        del: Vec<Transform>,
    ) -> Result<View> {
        let outcome = self
            .views
            .transform_view(view_id, &ViewMutation::new(add, del))?;
        self.metrics.record_view(outcome.created);

        let view = outcome.view;
        self.history.set(view.user_id, view.dataset_id, view.id)?;
        Ok(view)
    }

    /// Full resolved table of a view
    pub fn table(&self, view_id: ViewId) -> Result<Arc<Table>> {
        let view = self.views.by_id(view_id)?;
        let dataset = self.datasets.by_id(view.dataset_id)?;
        self.resolver.resolve(&view, &dataset)
    }

    /// Sorted rows of a view, capped at `limit` (default: the configured row
    /// limit). Without a sort label the table's own default sort applies.
    pub fn rows(
        &self,
        view_id: ViewId,
        sort_label: Option<&str>,
        sort_asc: Option<bool>,
        limit: Option<usize>,
    ) -> Result<Table> {
        let resolved = self.table(view_id)?;
        let limit = limit.unwrap_or(self.config.row_limit);

        let sort = match sort_label {
            Some(label) => Some((label.to_string(), sort_asc.unwrap_or(true))),
            None => resolved
                .default_sort()
                .map(|key| (key.column.clone(), key.ascending)),
        };

        let Some((column, ascending)) = sort else {
            return Ok(resolved.head(limit));
        };

        let mut table = (*resolved).clone();
        table
            .sort_by(&column, ascending)
            .map_err(|source| SieveError::Query { view_id, source })?;
        Ok(table.head(limit))
    }

    pub fn labels(&self, view_id: ViewId, label_type: LabelType) -> Result<Vec<String>> {
        let view = self.views.by_id(view_id)?;
        let original = || -> Result<Vec<String>> {
            let dataset = self.datasets.by_id(view.dataset_id)?;
            Ok(self.resolver.raw_table(&dataset)?.columns().to_vec())
        };
        let derived = || -> Vec<String> {
            view.transforms
                .iter()
                .filter(|t| t.is_enrichment())
                .flat_map(Transform::output_labels)
                .collect()
        };

        Ok(match label_type {
            LabelType::Active => view.labels.names(),
            LabelType::Original => original()?,
            LabelType::Derived => derived(),
            LabelType::All => {
                let mut labels = original()?;
                labels.extend(derived());
                labels
            }
        })
    }

    /// Tag responses of the view's dataset, creating its tag map keyed by
    /// `primary_key` when it has none
    pub fn add_tags(
        &self,
        view_id: ViewId,
        tags: &[String],
        keys: &[PrimaryKey],
        primary_key: &str,
    ) -> Result<BTreeMap<String, BTreeSet<PrimaryKey>>> {
        let view = self.views.by_id(view_id)?;
        let tag_map = self.tags.get_or_create(view.dataset_id, primary_key)?;
        let result = tag_map.write().add_tags(tags, keys)?;
        info!(dataset = %view.dataset_id, tags = tags.len(), keys = keys.len(), "added tags");
        Ok(result)
    }

    pub fn remove_tags(
        &self,
        view_id: ViewId,
        tags: &[String],
        keys: &[PrimaryKey],
    ) -> Result<BTreeMap<String, BTreeSet<PrimaryKey>>> {
        let view = self.views.by_id(view_id)?;
        match self.tags.get(view.dataset_id)? {
            Some(tag_map) => {
                let result = tag_map.write().remove_tags(tags, keys)?;
                info!(dataset = %view.dataset_id, tags = tags.len(), keys = keys.len(), "removed tags");
                Ok(result)
            }
            None => Ok(tags.iter().map(|t| (t.clone(), BTreeSet::new())).collect()),
        }
    }

    /// Tags of each key; keys without tags map to an empty set
    pub fn get_tags(
        &self,
        view_id: ViewId,
        keys: &[PrimaryKey],
    ) -> Result<BTreeMap<PrimaryKey, BTreeSet<String>>> {
        let view = self.views.by_id(view_id)?;
        let tag_map = self.tags.get(view.dataset_id)?;
        Ok(keys
            .iter()
            .map(|key| {
                let tags = tag_map
                    .as_ref()
                    .map(|m| m.read().tags_for(key))
                    .unwrap_or_default();
                (key.clone(), tags)
            })
            .collect())
    }

    pub fn unique_counts(&self, view_id: ViewId, column: &str) -> Result<BTreeMap<String, usize>> {
        let table = self.table(view_id)?;
        analytics::unique_counts(&table, column).map_err(|source| SieveError::Query { view_id, source })
    }

    pub fn top_terms(
        &self,
        view_id: ViewId,
        text_column: &str,
        category_column: &str,
        count: usize,
    ) -> Result<BTreeMap<String, Vec<(String, usize)>>> {
        let table = self.table(view_id)?;
        analytics::top_terms_by_category(&table, text_column, category_column, count)
            .map_err(|source| SieveError::Query { view_id, source })
    }

    /// Daily counts of the most used words in `text_column`
    pub fn word_counts_over_time(
        &self,
        view_id: ViewId,
        date_column: &str,
        text_column: &str,
    ) -> Result<WordHistory> {
        let table = self.table(view_id)?;
        analytics::word_history(
            &table,
            date_column,
            text_column,
            analytics::HISTORY_MIN_WORD_LENGTH,
            analytics::HISTORY_TOP_WORDS,
        )
        .map_err(|source| SieveError::Query { view_id, source })
    }

    pub fn transform_defs(&self) -> Vec<TransformDef> {
        registry().list_defs()
    }

    pub fn metrics(&self) -> &SieveMetrics {
        &self.metrics
    }

    pub fn metrics_text(&self) -> Result<String> {
        self.metrics.render()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.resolver.cache().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::metrics::ResolutionSource;
    use crate::types::Value;

    fn feedback() -> Table {
        Table::from_rows(
            vec!["id".to_string(), "score".to_string(), "comment".to_string()],
            vec![
                vec![Value::from(1), Value::from(3), Value::from("search is slow")],
                vec![Value::from(2), Value::from(9), Value::from("love the search")],
                vec![Value::from(3), Value::from(5), Value::Empty],
            ],
        )
    }

    fn session() -> (Session, View) {
        let loader = MemoryLoader::new().with_table(DatasetId::new(1), feedback());
        let session = Session::in_memory(Arc::new(loader)).unwrap();
        session
            .set_most_recent_dataset(DEFAULT_USER_ID, "feedback.csv")
            .unwrap();
        let root = session.most_recent_view(DEFAULT_USER_ID, None).unwrap();
        (session, root)
    }

    fn has_text() -> Transform {
        Transform::HasText {
            column: "comment".to_string(),
            text: "search".to_string(),
        }
    }

    #[test]
    fn test_root_view_uses_raw_columns() {
        let (session, root) = session();
        assert!(root.is_root());
        assert_eq!(root.labels.names(), vec!["id", "score", "comment"]);

        let again = session.most_recent_view(DEFAULT_USER_ID, None).unwrap();
        assert_eq!(again.id, root.id);
    }

    #[test]
    fn test_no_dataset() {
        let loader = MemoryLoader::new();
        let session = Session::in_memory(Arc::new(loader)).unwrap();
        assert!(matches!(
            session.most_recent_view(DEFAULT_USER_ID, None),
            Err(SieveError::NoDataset(_))
        ));
        assert!(session.set_most_recent_dataset(DEFAULT_USER_ID, " ").is_err());
    }

    #[test]
    fn test_transform_view_updates_history() {
        let (session, root) = session();
        let child = session.transform_view(root.id, vec![has_text()], vec![]).unwrap();
        assert_eq!(child.parent_id, Some(root.id));

        let recent = session.most_recent_view(DEFAULT_USER_ID, None).unwrap();
        assert_eq!(recent.id, child.id);
        assert_eq!(session.table(child.id).unwrap().len(), 2);
    }

    #[test]
    fn test_rows_sort_and_limit() {
        let (session, root) = session();
        let rows = session.rows(root.id, Some("score"), Some(false), Some(2)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.get(0, "score"), Some(&Value::from(9)));

        assert!(matches!(
            session.rows(root.id, Some("nope"), None, None),
            Err(SieveError::Query { .. })
        ));
    }

    #[test]
    fn test_labels_by_type() {
        let (session, root) = session();
        let merge = Transform::MergeColumnText {
            name: "merged".to_string(),
            columns: vec!["id".to_string(), "comment".to_string()],
            separator: " ".to_string(),
        };
        let child = session.transform_view(root.id, vec![merge], vec![]).unwrap();

        assert_eq!(session.labels(child.id, LabelType::Derived).unwrap(), vec!["merged"]);
        assert_eq!(session.labels(child.id, LabelType::Original).unwrap().len(), 3);
        assert_eq!(session.labels(child.id, LabelType::All).unwrap().len(), 4);
        assert_eq!(session.labels(child.id, LabelType::Active).unwrap()[0], "merged");
    }

    #[test]
    fn test_tags_round_trip() {
        let (session, root) = session();
        let tags = vec!["slow".to_string()];
        let keys = vec!["1".to_string(), "3".to_string()];

        let added = session.add_tags(root.id, &tags, &keys, "id").unwrap();
        assert_eq!(added["slow"].len(), 2);

        let current = session.get_tags(root.id, &keys).unwrap();
        assert!(current["3"].contains("slow"));

        session.remove_tags(root.id, &tags, &keys[..1]).unwrap();
        let current = session.get_tags(root.id, &keys).unwrap();
        assert!(current["1"].is_empty());
        assert!(current["3"].contains("slow"));
    }

    #[test]
    fn test_analytics_and_metrics() {
        let (session, root) = session();
        let counts = session.unique_counts(root.id, "score").unwrap();
        assert_eq!(counts.len(), 3);
        assert!(session.unique_counts(root.id, "missing").is_err());

        let top = session.top_terms(root.id, "comment", "score", 1).unwrap();
        assert_eq!(top["3"], vec![("search".to_string(), 1)]);

        // no date column in this dataset
        assert!(matches!(
            session.word_counts_over_time(root.id, "date", "comment"),
            Err(SieveError::Query { .. })
        ));

        assert_eq!(session.metrics().resolutions(ResolutionSource::Raw), 1);
        assert!(session.metrics_text().unwrap().contains("sieve_resolutions_total"));
        assert_eq!(session.transform_defs().len(), registry().len());
    }

    #[test]
    fn test_reopen_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        let loader: Arc<dyn TableLoader> =
            Arc::new(MemoryLoader::new().with_table(DatasetId::new(1), feedback()));

        let child_id = {
            let session = Session::open(config.clone(), loader.clone()).unwrap();
            session
                .set_most_recent_dataset(DEFAULT_USER_ID, "feedback.csv")
                .unwrap();
            let root = session.most_recent_view(DEFAULT_USER_ID, None).unwrap();
            session.transform_view(root.id, vec![has_text()], vec![]).unwrap().id
        };

        let session = Session::open(config, loader).unwrap();
        // warm-up resolved the most recent view
        assert_eq!(session.cache_stats().tables, 1);
        let recent = session.most_recent_view(DEFAULT_USER_ID, None).unwrap();
        assert_eq!(recent.id, child_id);
        assert_eq!(recent.transforms.as_slice(), &[has_text()]);
    }
}
