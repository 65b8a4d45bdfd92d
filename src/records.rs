//! Users, datasets and view history
//!
//! Small JSON-backed record stores. Each one is loaded eagerly and rewritten
//! wholesale on change; a change becomes visible only after it was written.

use crate::error::{Result, SieveError};
use crate::persistence;
use crate::types::{DatasetId, UserId, ViewId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One loaded survey file, persisted as `[id, filename, name]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(DatasetId, String, String)", into = "(DatasetId, String, String)")]
pub struct Dataset {
    pub id: DatasetId,
    pub filename: String,
    pub name: String,
}

impl Dataset {
    pub fn new(id: DatasetId, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Dataset {
            id,
            name: filename.clone(),
            filename,
        }
    }
}

impl From<(DatasetId, String, String)> for Dataset {
    fn from((id, filename, name): (DatasetId, String, String)) -> Self {
        Dataset { id, filename, name }
    }
}

impl From<Dataset> for (DatasetId, String, String) {
    fn from(dataset: Dataset) -> Self {
        (dataset.id, dataset.filename, dataset.name)
    }
}

pub struct DatasetStore {
    path: Option<PathBuf>,
    datasets: RwLock<Vec<Dataset>>,
}

impl DatasetStore {
    pub fn in_memory() -> Self {
        DatasetStore {
            path: None,
            datasets: RwLock::new(Vec::new()),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let datasets: Vec<Dataset> = persistence::load_or_init(&path, Vec::new)?;
        info!(path = %path.display(), datasets = datasets.len(), "loaded datasets");
        Ok(DatasetStore {
            path: Some(path),
            datasets: RwLock::new(datasets),
        })
    }

    /// Register a file; an already registered filename returns its dataset
    pub fn create(&self, filename: &str) -> Result<Dataset> {
        let mut datasets = self.datasets.write();
        if let Some(existing) = datasets.iter().find(|d| d.filename == filename) {
            warn!(filename, "dataset already exists");
            return Ok(existing.clone());
        }

        let next = datasets.iter().map(|d| d.id.as_u64()).max().unwrap_or(0) + 1;
        let dataset = Dataset::new(DatasetId::new(next), filename);

        let mut updated = datasets.clone();
        updated.push(dataset.clone());
        if let Some(path) = &self.path {
            persistence::save(path, &updated)?;
        }
        *datasets = updated;

        info!(dataset = %dataset.id, filename, "created dataset");
        Ok(dataset)
    }

    pub fn by_id(&self, dataset_id: DatasetId) -> Result<Dataset> {
        self.datasets
            .read()
            .iter()
            .find(|d| d.id == dataset_id)
            .cloned()
            .ok_or(SieveError::DatasetNotFound(dataset_id))
    }

    pub fn by_filename(&self, filename: &str) -> Option<Dataset> {
        self.datasets
            .read()
            .iter()
            .find(|d| d.filename == filename)
            .cloned()
    }

    pub fn has_filename(&self, filename: &str) -> bool {
        self.by_filename(filename).is_some()
    }

    /// Datasets whose name or filename contains `text`
    pub fn find(&self, text: &str) -> Vec<Dataset> {
        self.datasets
            .read()
            .iter()
            .filter(|d| d.name.contains(text) || d.filename.contains(text))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Dataset> {
        self.datasets.read().clone()
    }
}

/// An analyst, persisted as `[id, name]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(UserId, String)", into = "(UserId, String)")]
pub struct User {
    pub id: UserId,
    pub name: String,
}

impl From<(UserId, String)> for User {
    fn from((id, name): (UserId, String)) -> Self {
        User { id, name }
    }
}

impl From<User> for (UserId, String) {
    fn from(user: User) -> Self {
        (user.id, user.name)
    }
}

pub const DEFAULT_USER_ID: UserId = UserId(1);
pub const DEFAULT_USER_NAME: &str = "owner";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserFile {
    users: Vec<User>,
    #[serde(default)]
    history: BTreeMap<UserId, DatasetId>,
}

impl Default for UserFile {
    fn default() -> Self {
        UserFile {
            users: vec![User {
                id: DEFAULT_USER_ID,
                name: DEFAULT_USER_NAME.to_string(),
            }],
            history: BTreeMap::new(),
        }
    }
}

/// Users and the dataset each one used last
pub struct UserStore {
    path: Option<PathBuf>,
    state: RwLock<UserFile>,
}

impl UserStore {
    /// Store holding only the default user
    pub fn in_memory() -> Self {
        UserStore {
            path: None,
            state: RwLock::new(UserFile::default()),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state: UserFile = persistence::load_or_init(&path, UserFile::default)?;
        info!(path = %path.display(), users = state.users.len(), "loaded users");
        Ok(UserStore {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    pub fn by_id(&self, user_id: UserId) -> Result<User> {
        self.state
            .read()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or(SieveError::UserNotFound(user_id))
    }

    /// Users whose name contains `name`
    pub fn find(&self, name: &str) -> Vec<User> {
        self.state
            .read()
            .users
            .iter()
            .filter(|u| u.name.contains(name))
            .cloned()
            .collect()
    }

    pub fn last_dataset(&self, user_id: UserId) -> Option<DatasetId> {
        self.state.read().history.get(&user_id).copied()
    }

    pub fn set_last_dataset(&self, user_id: UserId, dataset_id: DatasetId) -> Result<()> {
        let mut state = self.state.write();
        if !state.users.iter().any(|u| u.id == user_id) {
            return Err(SieveError::UserNotFound(user_id));
        }

        let mut updated = state.clone();
        updated.history.insert(user_id, dataset_id);
        if let Some(path) = &self.path {
            persistence::save(path, &updated)?;
        }
        *state = updated;
        Ok(())
    }
}

/// Most recent view per `(user, dataset)`, persisted with `"{user}_{dataset}"` keys
pub struct ViewHistory {
    path: Option<PathBuf>,
    history: RwLock<BTreeMap<(UserId, DatasetId), ViewId>>,
}

impl ViewHistory {
    pub fn in_memory() -> Self {
        ViewHistory {
            path: None,
            history: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw: BTreeMap<String, ViewId> = persistence::load_or_init(&path, BTreeMap::new)?;

        let mut history = BTreeMap::new();
        for (key, view_id) in raw {
            match parse_history_key(&key) {
                Some(pair) => {
                    history.insert(pair, view_id);
                }
                None => warn!(key, "skipping malformed view history key"),
            }
        }

        Ok(ViewHistory {
            path: Some(path),
            history: RwLock::new(history),
        })
    }

    pub fn get(&self, user_id: UserId, dataset_id: DatasetId) -> Option<ViewId> {
        self.history.read().get(&(user_id, dataset_id)).copied()
    }

    pub fn set(&self, user_id: UserId, dataset_id: DatasetId, view_id: ViewId) -> Result<()> {
        let mut history = self.history.write();
        let mut updated = history.clone();
        updated.insert((user_id, dataset_id), view_id);

        if let Some(path) = &self.path {
            let raw: BTreeMap<String, ViewId> = updated
                .iter()
                .map(|((user, dataset), view)| (format!("{}_{}", user, dataset), *view))
                .collect();
            persistence::save(path, &raw)?;
        }
        *history = updated;
        Ok(())
    }

    /// Most recent views of one user across datasets
    pub fn views_of(&self, user_id: UserId) -> Vec<ViewId> {
        self.history
            .read()
            .iter()
            .filter(|((user, _), _)| *user == user_id)
            .map(|(_, view)| *view)
            .collect()
    }
}

fn parse_history_key(key: &str) -> Option<(UserId, DatasetId)> {
    let (user, dataset) = key.split_once('_')?;
    Some((
        UserId::new(user.parse().ok()?),
        DatasetId::new(dataset.parse().ok()?),
    ))
}
