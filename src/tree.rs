//! Transform dependency graph
//!
//! Nodes are the transforms of one list, addressed by their position.
//! There is an edge from an enrichment to every transform that reads one of
//! its output labels. The graph is derived, never persisted.

use crate::error::{Result, SieveError};
use crate::transform::Transform;
use std::collections::{HashMap, HashSet, VecDeque};

pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct TransformTree {
    nodes: Vec<Transform>,
    /// Output label -> producing node
    label_owner: HashMap<String, NodeId>,
    children: Vec<Vec<NodeId>>,
    parents: Vec<Vec<NodeId>>,
}

impl TransformTree {
    /// Build the graph. Fails if two enrichments claim the same output label.
    pub fn build(transforms: &[Transform]) -> Result<Self> {
        let nodes = transforms.to_vec();
        let mut label_owner: HashMap<String, NodeId> = HashMap::new();

        for (node, transform) in nodes.iter().enumerate() {
            for label in transform.output_labels() {
                if let Some(&first) = label_owner.get(&label) {
                    return Err(SieveError::DuplicateOutputLabel {
                        label,
                        first: nodes[first].canonical(),
                        second: transform.canonical(),
                    });
                }
                label_owner.insert(label, node);
            }
        }

        let mut children = vec![Vec::new(); nodes.len()];
        let mut parents = vec![Vec::new(); nodes.len()];
        for (node, transform) in nodes.iter().enumerate() {
            let mut seen = HashSet::new();
            for label in transform.input_labels() {
                if let Some(&owner) = label_owner.get(&label) {
                    if owner != node && seen.insert(owner) {
                        children[owner].push(node);
                        parents[node].push(owner);
                    }
                }
            }
        }

        Ok(TransformTree {
            nodes,
            label_owner,
            children,
            parents,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn transform(&self, node: NodeId) -> Option<&Transform> {
        self.nodes.get(node)
    }

    /// Node of the first transform equal to `transform`
    pub fn node_of(&self, transform: &Transform) -> Option<NodeId> {
        self.nodes.iter().position(|t| t == transform)
    }

    /// Node producing an output label
    pub fn owner_of(&self, label: &str) -> Option<NodeId> {
        self.label_owner.get(label).copied()
    }

    pub fn children_of(&self, node: NodeId) -> &[NodeId] {
        self.children.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parents_of(&self, node: NodeId) -> &[NodeId] {
        self.parents.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Breadth-first closure over children, starting with `node` itself
    pub fn descendants_of(&self, node: NodeId) -> Vec<NodeId> {
        if node >= self.nodes.len() {
            return Vec::new();
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        let mut queue = VecDeque::from([node]);
        visited[node] = true;

        while let Some(current) = queue.pop_front() {
            order.push(current);
            for &child in &self.children[current] {
                if !visited[child] {
                    visited[child] = true;
                    queue.push_back(child);
                }
            }
        }

        order
    }
}
