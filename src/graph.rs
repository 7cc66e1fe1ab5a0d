//! Heterogeneous graph data structures for node-classification flows.
//!
//! A [`HeteroGraph`] tracks per-type node counts and, for the target node type
//! (the *category*), one homogeneous neighbor view per named metapath. The
//! metapath views are what the model aggregates over and what the neighbor
//! sampler traverses; the full typed edge set never needs to be materialized
//! here.

use std::collections::{HashMap, HashSet};
use std::fmt;

use ndarray::{Array1, Array2};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::HgnnError;

/// Node identifier, local to one node type.
pub type NodeIndex = usize;

/// Node type name -> dense feature matrix `[num_nodes, feature_dim]`.
pub type FeatureDict = HashMap<String, Array2<f32>>;

/// Dense class labels indexed by category-node identifier. Entries outside
/// the labeled splits are never read.
pub type LabelVector = Array1<usize>;

/// Named dataset splits over the category node type.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Valid,
    Test,
    Pred,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Valid => write!(f, "valid"),
            Split::Test => write!(f, "test"),
            Split::Pred => write!(f, "pred"),
        }
    }
}

/// Homogeneous neighbor view over the category nodes induced by one metapath.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct MetapathGraph {
    neighbors: Vec<Vec<NodeIndex>>,
}

impl MetapathGraph {
    /// Build the view from `(source, target)` pairs over `num_nodes` category
    /// nodes. Each pair records `target` as a neighbor of `source`.
    pub fn new(num_nodes: usize, edges: &[(NodeIndex, NodeIndex)]) -> Result<Self, HgnnError> {
        let mut neighbors = vec![Vec::new(); num_nodes];
        for &(src, dst) in edges {
            if src >= num_nodes || dst >= num_nodes {
                return Err(HgnnError::InvalidInput(format!(
                    "edge ({src}, {dst}) out of bounds for {num_nodes} nodes"
                )));
            }
            neighbors[src].push(dst);
        }
        Ok(Self { neighbors })
    }

    pub fn num_nodes(&self) -> usize {
        self.neighbors.len()
    }

    pub fn neighbors(&self, node: NodeIndex) -> &[NodeIndex] {
        &self.neighbors[node]
    }

    pub fn max_degree(&self) -> usize {
        self.neighbors.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Heterogeneous graph handle: typed node counts plus the metapath views over
/// the category type. Borrowed read-only by the flows for the lifetime of a
/// training run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct HeteroGraph {
    category: String,
    node_counts: HashMap<String, usize>,
    metapaths: HashMap<String, MetapathGraph>,
}

impl HeteroGraph {
    pub fn new(category: impl Into<String>, node_counts: HashMap<String, usize>) -> Result<Self, HgnnError> {
        let category = category.into();
        if !node_counts.contains_key(&category) {
            return Err(HgnnError::InvalidInput(format!(
                "category node type '{category}' missing from node counts"
            )));
        }
        Ok(Self {
            category,
            node_counts,
            metapaths: HashMap::new(),
        })
    }

    /// Register a metapath view. Its node count must match the category type.
    pub fn add_metapath(
        &mut self,
        name: impl Into<String>,
        view: MetapathGraph,
    ) -> Result<(), HgnnError> {
        let name = name.into();
        if view.num_nodes() != self.num_category_nodes() {
            return Err(HgnnError::DimensionMismatch(format!(
                "metapath '{}' covers {} nodes, expected {} ('{}' nodes)",
                name,
                view.num_nodes(),
                self.num_category_nodes(),
                self.category
            )));
        }
        self.metapaths.insert(name, view);
        Ok(())
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn num_nodes(&self, node_type: &str) -> Option<usize> {
        self.node_counts.get(node_type).copied()
    }

    pub fn num_category_nodes(&self) -> usize {
        self.node_counts[&self.category]
    }

    pub fn metapath(&self, name: &str) -> Result<&MetapathGraph, HgnnError> {
        self.metapaths.get(name).ok_or_else(|| {
            HgnnError::InvalidInput(format!("unknown metapath '{name}'"))
        })
    }

    /// Registered metapath names in deterministic (sorted) order.
    pub fn metapath_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.metapaths.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Train/valid/test/prediction index sets over the category nodes.
///
/// The prediction set is optional; when present it holds unlabeled nodes whose
/// outputs are exported at the end of a run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct SplitIndices {
    pub train: Vec<NodeIndex>,
    pub valid: Vec<NodeIndex>,
    pub test: Vec<NodeIndex>,
    pub pred: Option<Vec<NodeIndex>>,
}

impl SplitIndices {
    /// Check bounds, per-split uniqueness, and pairwise disjointness against
    /// the category node count.
    pub fn validate(&self, num_nodes: usize) -> Result<(), HgnnError> {
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let named: [(&str, &[NodeIndex]); 4] = [
            ("train", &self.train),
            ("valid", &self.valid),
            ("test", &self.test),
            ("pred", self.pred.as_deref().unwrap_or(&[])),
        ];
        for (name, indices) in named {
            for &idx in indices {
                if idx >= num_nodes {
                    return Err(HgnnError::InvalidInput(format!(
                        "{name} index {idx} out of bounds for {num_nodes} nodes"
                    )));
                }
                if !seen.insert(idx) {
                    return Err(HgnnError::InvalidInput(format!(
                        "node {idx} appears in more than one split (or twice in {name})"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, split: Split) -> Result<&[NodeIndex], HgnnError> {
        match split {
            Split::Train => Ok(&self.train),
            Split::Valid => Ok(&self.valid),
            Split::Test => Ok(&self.test),
            Split::Pred => self.pred.as_deref().ok_or_else(|| {
                HgnnError::InvalidConfiguration("no prediction split configured".to_string())
            }),
        }
    }
}
