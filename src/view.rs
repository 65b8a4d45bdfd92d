//! Views and transform lists
//!
//! A view is an immutable `(dataset, transforms, labels)` tuple with lineage.
//! Changing a view always goes through the view store and yields another
//! (possibly existing) view id.

use crate::error::Result;
use crate::label::LabelSequence;
use crate::transform::{Transform, WireTransform};
use crate::types::{DatasetId, UserId, ViewId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

/// Ordered transforms of a view
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TransformList(Vec<Transform>);

/// A persisted transform that could not be decoded
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTransform {
    pub wire: WireTransform,
    pub reason: String,
}

impl TransformList {
    pub fn new() -> Self {
        TransformList(Vec::new())
    }

    pub fn push(&mut self, transform: Transform) {
        self.0.push(transform);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transform> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Transform] {
        &self.0
    }

    pub fn contains(&self, transform: &Transform) -> bool {
        self.0.contains(transform)
    }

    pub fn position(&self, transform: &Transform) -> Option<usize> {
        self.0.iter().position(|t| t == transform)
    }

    /// Keep only the transforms whose index passes `keep`
    pub fn retain_indexed<F>(&mut self, mut keep: F)
    where
        F: FnMut(usize) -> bool,
    {
        let mut index = 0;
        self.0.retain(|_| {
            let kept = keep(index);
            index += 1;
            kept
        });
    }

    /// Set view of the list, for subset tests
    pub fn transform_set(&self) -> HashSet<&Transform> {
        self.0.iter().collect()
    }

    /// True when every transform here also appears in `other`
    pub fn is_subset_of(&self, other: &TransformList) -> bool {
        let other = other.transform_set();
        self.0.iter().all(|t| other.contains(t))
    }

    pub fn to_wire(&self) -> Vec<WireTransform> {
        self.0.iter().map(Transform::to_wire).collect()
    }

    /// Canonical JSON text of the whole list
    pub fn serialize(&self) -> String {
        Json::Array(self.0.iter().map(|t| Json::Array(t.to_wire())).collect()).to_string()
    }

    /// Decode every entry; the first undecodable one fails the whole list
    pub fn deserialize(wire: &[WireTransform]) -> Result<Self> {
        wire.iter()
            .map(|w| Transform::from_wire(w))
            .collect::<Result<Vec<_>>>()
            .map(TransformList)
    }

    /// Decode what can be decoded and return the rest alongside the list
    pub fn deserialize_lenient(wire: &[WireTransform]) -> (Self, Vec<SkippedTransform>) {
        let mut transforms = Vec::with_capacity(wire.len());
        let mut skipped = Vec::new();

        for w in wire {
            match Transform::from_wire(w) {
                Ok(transform) => transforms.push(transform),
                Err(e) => {
                    warn!(transform = %Json::Array(w.clone()), error = %e, "skipping transform");
                    skipped.push(SkippedTransform {
                        wire: w.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        (TransformList(transforms), skipped)
    }
}

impl From<Vec<Transform>> for TransformList {
    fn from(transforms: Vec<Transform>) -> Self {
        TransformList(transforms)
    }
}

impl FromIterator<Transform> for TransformList {
    fn from_iter<T: IntoIterator<Item = Transform>>(iter: T) -> Self {
        TransformList(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a TransformList {
    type Item = &'a Transform;
    type IntoIter = std::slice::Iter<'a, Transform>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for TransformList {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TransformList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = Vec::<WireTransform>::deserialize(deserializer)?;
        TransformList::deserialize(&wire).map_err(serde::de::Error::custom)
    }
}

/// Dedup key: dataset id plus the serialized transform list
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn new(dataset_id: DatasetId, transforms: &TransformList) -> Self {
        CanonicalKey(format!("[{},{}]", dataset_id.as_u64(), transforms.serialize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One node in a dataset's view lineage
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub id: ViewId,
    pub parent_id: Option<ViewId>,
    pub dataset_id: DatasetId,
    pub user_id: UserId,
    pub labels: LabelSequence,
    pub transforms: TransformList,
}

impl View {
    pub fn canonical_key(&self) -> CanonicalKey {
        CanonicalKey::new(self.dataset_id, &self.transforms)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn to_record(&self) -> ViewRecord {
        ViewRecord {
            id: self.id,
            parent_id: self.parent_id,
            dataset_id: self.dataset_id,
            user_id: self.user_id,
            column_labels: self.labels.clone(),
            transforms: self.transforms.to_wire(),
        }
    }

    /// Rebuild a view from its record, skipping undecodable transforms
    pub fn from_record(record: ViewRecord) -> (View, Vec<SkippedTransform>) {
        let (transforms, skipped) = TransformList::deserialize_lenient(&record.transforms);
        let view = View {
            id: record.id,
            parent_id: record.parent_id,
            dataset_id: record.dataset_id,
            user_id: record.user_id,
            labels: record.column_labels,
            transforms,
        };
        (view, skipped)
    }
}

/// On-disk form of a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub id: ViewId,
    pub parent_id: Option<ViewId>,
    pub dataset_id: DatasetId,
    pub user_id: UserId,
    pub column_labels: LabelSequence,
    pub transforms: Vec<WireTransform>,
}
