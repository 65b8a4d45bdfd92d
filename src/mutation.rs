//! View mutation
//!
//! Computes the transform and label lists of a view after adding and
//! removing transforms. Removal cascades through the dependency graph of the
//! pre-mutation list; additions are layered on afterwards. Nothing here
//! touches the view store.

use crate::error::{Result, SieveError};
use crate::label::{Label, LabelSequence};
use crate::transform::Transform;
use crate::tree::TransformTree;
use crate::view::{TransformList, View};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Requested change to a view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewMutation {
    pub add: Vec<Transform>,
    pub del: Vec<Transform>,
}

impl ViewMutation {
    pub fn new(add: Vec<Transform>, del: Vec<Transform>) -> Self {
        ViewMutation { add, del }
    }

    pub fn add(transform: Transform) -> Self {
        ViewMutation {
            add: vec![transform],
            del: Vec::new(),
        }
    }

    pub fn remove(transform: Transform) -> Self {
        ViewMutation {
            add: Vec::new(),
            del: vec![transform],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.del.is_empty()
    }
}

/// Working copy of a view's lists while a mutation is applied
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult {
    pub transforms: TransformList,
    pub labels: LabelSequence,
    /// Transforms dropped by deletion, including cascaded dependents
    pub removed: Vec<Transform>,
}

/// Nodes that go away when `target` is removed: the target and everything
/// transitively reading its outputs.
pub fn removal_closure(tree: &TransformTree, target: &Transform) -> Result<Vec<usize>> {
    let node = tree
        .node_of(target)
        .ok_or_else(|| SieveError::RemoveNonexistentTransform(target.canonical()))?;
    Ok(tree.descendants_of(node))
}

/// Remove `target` and its dependents from the working lists
pub fn remove_transform(
    transforms: &mut TransformList,
    labels: &mut LabelSequence,
    target: &Transform,
) -> Result<Vec<Transform>> {
    let tree = TransformTree::build(transforms.as_slice())?;
    let nodes: BTreeSet<usize> = removal_closure(&tree, target)?.into_iter().collect();
    Ok(drop_nodes(&tree, &nodes, transforms, labels))
}

/// Append a transform; enrichment outputs are prepended to the labels
pub fn add_transform(transforms: &mut TransformList, labels: &mut LabelSequence, transform: Transform) {
    if transform.is_enrichment() {
        labels.prepend(transform.output_labels().into_iter().map(Label::new));
    }
    debug!(transform = %transform, "adding transform");
    transforms.push(transform);
}

/// Apply deletions, then additions, to a copy of the view's lists
pub fn apply_mutation(view: &View, mutation: &ViewMutation) -> Result<MutationResult> {
    let mut transforms = view.transforms.clone();
    let mut labels = view.labels.clone();
    let mut removed = Vec::new();

    if !mutation.del.is_empty() {
        let tree = TransformTree::build(view.transforms.as_slice())?;
        let mut nodes = BTreeSet::new();

        for target in &mutation.del {
            match removal_closure(&tree, target) {
                Ok(closure) => {
                    info!(view = %view.id, transform = %target, cascaded = closure.len() - 1, "removing transform");
                    nodes.extend(closure);
                }
                Err(e @ SieveError::RemoveNonexistentTransform(_)) => {
                    warn!(view = %view.id, error = %e, "ignoring removal");
                }
                Err(e) => return Err(e),
            }
        }

        removed = drop_nodes(&tree, &nodes, &mut transforms, &mut labels);
    }

    for transform in &mutation.add {
        add_transform(&mut transforms, &mut labels, transform.clone());
    }

    // Rejects additions that collide with an existing output label
    TransformTree::build(transforms.as_slice())?;

    Ok(MutationResult {
        transforms,
        labels,
        removed,
    })
}

fn drop_nodes(
    tree: &TransformTree,
    nodes: &BTreeSet<usize>,
    transforms: &mut TransformList,
    labels: &mut LabelSequence,
) -> Vec<Transform> {
    let mut removed = Vec::with_capacity(nodes.len());
    for &node in nodes {
        if let Some(transform) = tree.transform(node) {
            for label in transform.output_labels() {
                labels.remove_by_name(&label);
            }
            removed.push(transform.clone());
        }
    }
    transforms.retain_indexed(|index| !nodes.contains(&index));
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DatasetId, UserId, ViewId};

    fn exact(column: &str) -> Transform {
        Transform::ExactMatch {
            column: column.to_string(),
            value: "yes".to_string(),
        }
    }

    fn merge(name: &str, columns: &[&str]) -> Transform {
        Transform::MergeColumnText {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            separator: " ".to_string(),
        }
    }

    fn root() -> View {
        View {
            id: ViewId::new(1),
            parent_id: None,
            dataset_id: DatasetId::new(1),
            user_id: UserId::new(1),
            labels: LabelSequence::from_names(["Q1", "Q2"]),
            transforms: TransformList::new(),
        }
    }

    fn with(view: &View, mutation: ViewMutation) -> View {
        let result = apply_mutation(view, &mutation).unwrap();
        View {
            id: ViewId::new(view.id.as_u64() + 1),
            parent_id: Some(view.id),
            labels: result.labels,
            transforms: result.transforms,
            ..view.clone()
        }
    }

    #[test]
    fn test_add_enrichment_prepends_labels() {
        let view = with(&root(), ViewMutation::add(merge("merged", &["Q1", "Q2"])));
        assert_eq!(view.labels.names(), vec!["merged", "Q1", "Q2"]);
        assert_eq!(view.transforms.len(), 1);
    }

    #[test]
    fn test_remove_cascades_to_dependents() {
        let view = with(
            &root(),
            ViewMutation::new(
                vec![
                    merge("a", &["Q1"]),
                    merge("b", &["a", "Q2"]),
                    exact("b"),
                    exact("Q2"),
                ],
                vec![],
            ),
        );
        assert_eq!(view.labels.names(), vec!["b", "a", "Q1", "Q2"]);

        let result = apply_mutation(&view, &ViewMutation::remove(merge("a", &["Q1"]))).unwrap();
        assert_eq!(result.removed.len(), 3);
        assert_eq!(result.transforms.as_slice(), &[exact("Q2")]);
        assert_eq!(result.labels.names(), vec!["Q1", "Q2"]);
    }

    #[test]
    fn test_remove_filter_leaves_enrichments() {
        let view = with(
            &root(),
            ViewMutation::new(vec![exact("Q1"), merge("merged", &["Q1", "Q2"])], vec![]),
        );
        let result = apply_mutation(&view, &ViewMutation::remove(exact("Q1"))).unwrap();
        assert_eq!(result.transforms.as_slice(), &[merge("merged", &["Q1", "Q2"])]);
        assert!(result.labels.contains("merged"));
    }

    #[test]
    fn test_remove_missing_is_a_no_op() {
        let view = with(&root(), ViewMutation::add(exact("Q1")));
        let result = apply_mutation(&view, &ViewMutation::remove(exact("Q9"))).unwrap();
        assert_eq!(result.transforms, view.transforms);
        assert_eq!(result.labels, view.labels);

        let mut transforms = view.transforms.clone();
        let mut labels = view.labels.clone();
        assert!(matches!(
            remove_transform(&mut transforms, &mut labels, &exact("Q9")),
            Err(SieveError::RemoveNonexistentTransform(_))
        ));
    }

    #[test]
    fn test_deletions_run_before_additions() {
        let view = with(&root(), ViewMutation::add(merge("m", &["Q1"])));
        // replacing an enrichment with one reusing its output name
        let result = apply_mutation(
            &view,
            &ViewMutation::new(vec![merge("m", &["Q2"])], vec![merge("m", &["Q1"])]),
        )
        .unwrap();
        assert_eq!(result.transforms.as_slice(), &[merge("m", &["Q2"])]);
        assert_eq!(result.labels.names(), vec!["m", "Q1", "Q2"]);
    }

    #[test]
    fn test_duplicate_output_is_rejected() {
        let view = with(&root(), ViewMutation::add(merge("m", &["Q1"])));
        assert!(matches!(
            apply_mutation(&view, &ViewMutation::add(merge("m", &["Q2"]))),
            Err(SieveError::DuplicateOutputLabel { .. })
        ));
    }

    #[test]
    fn test_remove_transform_helper() {
        let mut transforms = TransformList::from(vec![merge("a", &["Q1"]), exact("a")]);
        let mut labels = LabelSequence::from_names(["a", "Q1"]);
        let removed = remove_transform(&mut transforms, &mut labels, &merge("a", &["Q1"])).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(transforms.is_empty());
        assert_eq!(labels.names(), vec!["Q1"]);
    }
}
