//! Model adapter surface and a reference metapath model.
//!
//! The flows drive any model through [`HeteroModel`]: forward passes over the
//! whole graph or over sampled blocks, feature lookup for arbitrary node
//! subsets, an explicit train/eval mode switch, analytic backward, and
//! parameter snapshot/restore for checkpointing. [`MetapathLinearModel`] is a
//! complete implementation used by the tests: per-metapath mean aggregation
//! followed by a linear head, with the per-metapath outputs combined by an
//! unweighted semantic mean.

use std::collections::HashMap;

use ndarray::{Array2, Axis};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::HgnnError;
use crate::graph::{FeatureDict, HeteroGraph, MetapathGraph, NodeIndex};
use crate::sampler::MetapathBatch;

/// Whether stochastic regularization (dropout) is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingMode {
    Train,
    Eval,
}

/// Execution target for the run. Placement happens once at run start and a
/// failure is fatal to the run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTarget {
    Cpu,
    Gpu,
}

/// Owned copy of every parameter tensor, in `parameters_mut` order.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    tensors: Vec<Array2<f32>>,
}

impl ModelSnapshot {
    pub fn new(tensors: Vec<Array2<f32>>) -> Self {
        Self { tensors }
    }

    pub fn tensors(&self) -> &[Array2<f32>] {
        &self.tensors
    }
}

/// The learnable model as seen by the training flows.
pub trait HeteroModel {
    /// The node type whose labels are predicted.
    fn category(&self) -> &str;

    fn set_mode(&mut self, mode: TrainingMode);

    fn mode(&self) -> TrainingMode;

    /// Move the model to the execution target. Called exactly once per run,
    /// before any step; an error aborts the run.
    fn place(&mut self, device: DeviceTarget) -> Result<(), HgnnError>;

    /// The full input feature dictionary, one matrix per node type.
    fn input_features(&self) -> Result<FeatureDict, HgnnError>;

    /// Feature rows for a subset of category nodes, in the given order.
    fn features_for(&self, nodes: &[NodeIndex]) -> Result<Array2<f32>, HgnnError>;

    /// Whole-graph forward pass. Returns one output matrix per node type.
    fn forward_full(
        &mut self,
        graph: &HeteroGraph,
        features: &FeatureDict,
    ) -> Result<HashMap<String, Array2<f32>>, HgnnError>;

    /// Forward pass over one sampled batch. `embeddings` holds, per metapath,
    /// the feature rows for that metapath's input nodes.
    fn forward_blocks(
        &mut self,
        batch: &MetapathBatch,
        embeddings: &HashMap<String, Array2<f32>>,
    ) -> Result<HashMap<String, Array2<f32>>, HgnnError>;

    /// Backpropagate a gradient with respect to the category logits of the
    /// most recent train-mode forward pass. Returns parameter gradients in
    /// `parameters_mut` order.
    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<Vec<Array2<f32>>, HgnnError>;

    fn parameters_mut(&mut self) -> Vec<&mut Array2<f32>>;

    fn parameter_count(&self) -> usize;

    fn snapshot(&self) -> ModelSnapshot;

    fn restore(&mut self, snapshot: &ModelSnapshot) -> Result<(), HgnnError>;
}

/// One linear head per metapath.
#[derive(Debug, Clone)]
struct MetapathHead {
    weight: Array2<f32>,
    bias: Array2<f32>,
}

/// Aggregated inputs cached by the last train-mode forward pass, one matrix
/// per metapath, in metapath order.
#[derive(Debug, Clone)]
struct ForwardCache {
    aggregated: Vec<Array2<f32>>,
}

/// Reference model: for each metapath, mean-aggregate the category features
/// over the (sampled or full) neighborhood, project through a linear head,
/// then average the per-metapath logits. Dropout is applied to the
/// aggregated inputs in train mode only.
pub struct MetapathLinearModel {
    category: String,
    metapaths: Vec<String>,
    heads: Vec<MetapathHead>,
    features: FeatureDict,
    in_dim: usize,
    out_dim: usize,
    dropout: f32,
    mode: TrainingMode,
    device: DeviceTarget,
    rng: StdRng,
    cache: Option<ForwardCache>,
}

impl MetapathLinearModel {
    pub fn new(
        category: impl Into<String>,
        metapaths: Vec<String>,
        features: FeatureDict,
        out_dim: usize,
        dropout: f32,
        seed: u64,
    ) -> Result<Self, HgnnError> {
        let category = category.into();
        let category_features = features.get(&category).ok_or_else(|| {
            HgnnError::InvalidInput(format!(
                "feature dictionary has no entry for node type '{category}'"
            ))
        })?;
        if metapaths.is_empty() {
            return Err(HgnnError::InvalidConfiguration(
                "model needs at least one metapath".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&dropout) {
            return Err(HgnnError::InvalidConfiguration(format!(
                "dropout must be in [0, 1), got {dropout}"
            )));
        }
        let in_dim = category_features.ncols();
        let mut rng = StdRng::seed_from_u64(seed);
        let limit = (6.0 / (in_dim + out_dim) as f32).sqrt();
        let heads = metapaths
            .iter()
            .map(|_| MetapathHead {
                weight: Array2::random_using((in_dim, out_dim), Uniform::new(-limit, limit), &mut rng),
                bias: Array2::zeros((1, out_dim)),
            })
            .collect();
        Ok(Self {
            category,
            metapaths,
            heads,
            features,
            in_dim,
            out_dim,
            dropout,
            mode: TrainingMode::Eval,
            device: DeviceTarget::Cpu,
            rng,
            cache: None,
        })
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn device(&self) -> DeviceTarget {
        self.device
    }

    fn category_features(&self) -> &Array2<f32> {
        // presence checked at construction
        &self.features[&self.category]
    }

    /// Mean over each node's neighborhood plus itself.
    fn aggregate_full(&self, x: &Array2<f32>, view: &MetapathGraph) -> Array2<f32> {
        let n = x.nrows();
        let mut out = Array2::<f32>::zeros((n, self.in_dim));
        for i in 0..n {
            let neighbors = view.neighbors(i);
            // neighbors first, then self: the same summation order the block
            // path uses, so a whole-graph block reproduces this exactly
            let mut acc = ndarray::Array1::<f32>::zeros(self.in_dim);
            for &j in neighbors {
                acc += &x.row(j);
            }
            acc += &x.row(i);
            acc /= (neighbors.len() + 1) as f32;
            out.row_mut(i).assign(&acc);
        }
        out
    }

    fn apply_dropout(&mut self, h: &mut Array2<f32>) {
        if self.mode == TrainingMode::Train && self.dropout > 0.0 {
            let p = self.dropout;
            let keep = 1.0 - p;
            let rng = &mut self.rng;
            h.mapv_inplace(|v| if rng.gen::<f32>() < p { 0.0 } else { v / keep });
        }
    }

    /// Project the per-metapath aggregated inputs and combine them by an
    /// unweighted mean, caching the inputs for backward in train mode.
    fn project(
        &mut self,
        aggregated: Vec<Array2<f32>>,
    ) -> Result<HashMap<String, Array2<f32>>, HgnnError> {
        let num_paths = self.heads.len() as f32;
        let mut logits: Option<Array2<f32>> = None;
        for (h, head) in aggregated.iter().zip(&self.heads) {
            let head_logits = h.dot(&head.weight) + &head.bias;
            logits = Some(match logits {
                Some(acc) => acc + head_logits,
                None => head_logits,
            });
        }
        let logits = logits.ok_or_else(|| {
            HgnnError::InvalidConfiguration("model has no metapath heads".to_string())
        })? / num_paths;

        self.cache = if self.mode == TrainingMode::Train {
            Some(ForwardCache { aggregated })
        } else {
            None
        };

        let mut outputs = HashMap::new();
        outputs.insert(self.category.clone(), logits);
        Ok(outputs)
    }
}

impl HeteroModel for MetapathLinearModel {
    fn category(&self) -> &str {
        &self.category
    }

    fn set_mode(&mut self, mode: TrainingMode) {
        self.mode = mode;
    }

    fn mode(&self) -> TrainingMode {
        self.mode
    }

    fn place(&mut self, device: DeviceTarget) -> Result<(), HgnnError> {
        match device {
            DeviceTarget::Cpu => {
                self.device = device;
                Ok(())
            }
            DeviceTarget::Gpu => Err(HgnnError::DeviceError(
                "no GPU backend is available for this model".to_string(),
            )),
        }
    }

    fn input_features(&self) -> Result<FeatureDict, HgnnError> {
        Ok(self.features.clone())
    }

    fn features_for(&self, nodes: &[NodeIndex]) -> Result<Array2<f32>, HgnnError> {
        let x = self.category_features();
        if let Some(&bad) = nodes.iter().find(|&&i| i >= x.nrows()) {
            return Err(HgnnError::InvalidInput(format!(
                "node {bad} out of bounds for {} '{}' nodes",
                x.nrows(),
                self.category
            )));
        }
        Ok(x.select(Axis(0), nodes))
    }

    fn forward_full(
        &mut self,
        graph: &HeteroGraph,
        features: &FeatureDict,
    ) -> Result<HashMap<String, Array2<f32>>, HgnnError> {
        let x = features.get(&self.category).ok_or_else(|| {
            HgnnError::InvalidInput(format!(
                "feature dictionary has no entry for node type '{}'",
                self.category
            ))
        })?;
        if x.ncols() != self.in_dim {
            return Err(HgnnError::DimensionMismatch(format!(
                "feature dim {} does not match model input dim {}",
                x.ncols(),
                self.in_dim
            )));
        }
        let mut aggregated = Vec::with_capacity(self.metapaths.len());
        for name in &self.metapaths {
            let view = graph.metapath(name)?;
            aggregated.push(self.aggregate_full(x, view));
        }
        for h in &mut aggregated {
            self.apply_dropout(h);
        }
        self.project(aggregated)
    }

    fn forward_blocks(
        &mut self,
        batch: &MetapathBatch,
        embeddings: &HashMap<String, Array2<f32>>,
    ) -> Result<HashMap<String, Array2<f32>>, HgnnError> {
        let mut aggregated = Vec::with_capacity(self.metapaths.len());
        for name in &self.metapaths {
            let block = batch.blocks.get(name).ok_or_else(|| {
                HgnnError::InvalidInput(format!("batch has no block for metapath '{name}'"))
            })?;
            let emb = embeddings.get(name).ok_or_else(|| {
                HgnnError::InvalidInput(format!("no embeddings for metapath '{name}'"))
            })?;
            if emb.ncols() != self.in_dim {
                return Err(HgnnError::DimensionMismatch(format!(
                    "embedding dim {} does not match model input dim {}",
                    emb.ncols(),
                    self.in_dim
                )));
            }
            let mut h = Array2::<f32>::zeros((block.num_seeds(), self.in_dim));
            for pos in 0..block.num_seeds() {
                let rows = block.neighbor_rows(pos);
                let mut acc = ndarray::Array1::<f32>::zeros(self.in_dim);
                for &r in rows {
                    acc += &emb.row(r);
                }
                acc /= rows.len() as f32;
                h.row_mut(pos).assign(&acc);
            }
            aggregated.push(h);
        }
        for h in &mut aggregated {
            self.apply_dropout(h);
        }
        self.project(aggregated)
    }

    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<Vec<Array2<f32>>, HgnnError> {
        let cache = self.cache.take().ok_or_else(|| {
            HgnnError::TrainingError(
                "backward requires a preceding train-mode forward pass".to_string(),
            )
        })?;
        let num_paths = cache.aggregated.len() as f32;
        let mut grads = Vec::with_capacity(self.heads.len() * 2);
        for h in &cache.aggregated {
            if h.nrows() != grad_logits.nrows() {
                return Err(HgnnError::DimensionMismatch(format!(
                    "gradient has {} rows, forward pass had {}",
                    grad_logits.nrows(),
                    h.nrows()
                )));
            }
            let grad_weight = h.t().dot(grad_logits) / num_paths;
            let grad_bias = (grad_logits.sum_axis(Axis(0)) / num_paths).insert_axis(Axis(0));
            grads.push(grad_weight);
            grads.push(grad_bias);
        }
        Ok(grads)
    }

    fn parameters_mut(&mut self) -> Vec<&mut Array2<f32>> {
        let mut params = Vec::with_capacity(self.heads.len() * 2);
        for head in &mut self.heads {
            params.push(&mut head.weight);
            params.push(&mut head.bias);
        }
        params
    }

    fn parameter_count(&self) -> usize {
        self.heads
            .iter()
            .map(|h| h.weight.len() + h.bias.len())
            .sum()
    }

    fn snapshot(&self) -> ModelSnapshot {
        let mut tensors = Vec::with_capacity(self.heads.len() * 2);
        for head in &self.heads {
            tensors.push(head.weight.clone());
            tensors.push(head.bias.clone());
        }
        ModelSnapshot::new(tensors)
    }

    fn restore(&mut self, snapshot: &ModelSnapshot) -> Result<(), HgnnError> {
        let tensors = snapshot.tensors();
        if tensors.len() != self.heads.len() * 2 {
            return Err(HgnnError::DimensionMismatch(format!(
                "snapshot has {} tensors, model has {}",
                tensors.len(),
                self.heads.len() * 2
            )));
        }
        let current = self.parameters_mut();
        for (param, saved) in current.into_iter().zip(tensors) {
            if param.dim() != saved.dim() {
                return Err(HgnnError::DimensionMismatch(format!(
                    "snapshot tensor shape {:?} does not match parameter shape {:?}",
                    saved.dim(),
                    param.dim()
                )));
            }
            param.assign(saved);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MetapathGraph;
    use crate::sampler::{BatchSource, FullGraphSource};

    fn line_graph(n: usize) -> HeteroGraph {
        let mut counts = HashMap::new();
        counts.insert("paper".to_string(), n);
        let mut graph = HeteroGraph::new("paper", counts).unwrap();
        let edges: Vec<(usize, usize)> = (0..n - 1)
            .flat_map(|i| [(i, i + 1), (i + 1, i)])
            .collect();
        graph
            .add_metapath("pap", MetapathGraph::new(n, &edges).unwrap())
            .unwrap();
        graph
    }

    fn test_features(n: usize, d: usize) -> FeatureDict {
        let mut features = FeatureDict::new();
        let values: Vec<f32> = (0..n * d).map(|v| v as f32 * 0.1).collect();
        features.insert(
            "paper".to_string(),
            Array2::from_shape_vec((n, d), values).unwrap(),
        );
        features
    }

    fn test_model(n: usize) -> MetapathLinearModel {
        MetapathLinearModel::new(
            "paper",
            vec!["pap".to_string()],
            test_features(n, 3),
            2,
            0.0,
            42,
        )
        .unwrap()
    }

    #[test]
    fn forward_full_produces_category_logits() {
        let graph = line_graph(5);
        let mut model = test_model(5);
        let features = model.input_features().unwrap();
        let outputs = model.forward_full(&graph, &features).unwrap();
        let logits = &outputs["paper"];
        assert_eq!(logits.dim(), (5, 2));
    }

    #[test]
    fn block_forward_over_full_blocks_matches_forward_full() {
        let graph = line_graph(6);
        let mut model = test_model(6);
        let features = model.input_features().unwrap();
        let full = model.forward_full(&graph, &features).unwrap();

        let meta_paths = vec!["pap".to_string()];
        let mut source = FullGraphSource::new(&graph, &meta_paths).unwrap();
        let seeds: Vec<usize> = (0..6).collect();
        let batch = source.batches(&seeds).unwrap().next().unwrap();
        let mut embeddings = HashMap::new();
        for (name, nodes) in &batch.input_nodes {
            embeddings.insert(name.clone(), model.features_for(nodes).unwrap());
        }
        let blocked = model.forward_blocks(&batch, &embeddings).unwrap();

        let a = &full["paper"];
        let b = &blocked["paper"];
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn backward_requires_train_mode_forward() {
        let graph = line_graph(4);
        let mut model = test_model(4);
        let features = model.input_features().unwrap();

        model.set_mode(TrainingMode::Eval);
        model.forward_full(&graph, &features).unwrap();
        let grad = Array2::<f32>::zeros((4, 2));
        assert!(model.backward(&grad).is_err());

        model.set_mode(TrainingMode::Train);
        model.forward_full(&graph, &features).unwrap();
        let grads = model.backward(&grad).unwrap();
        assert_eq!(grads.len(), 2);
        assert_eq!(grads[0].dim(), (3, 2));
        assert_eq!(grads[1].dim(), (1, 2));
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let mut model = test_model(4);
        let saved = model.snapshot();
        for param in model.parameters_mut() {
            param.fill(9.0);
        }
        model.restore(&saved).unwrap();
        let after = model.snapshot();
        for (a, b) in saved.tensors().iter().zip(after.tensors()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn gpu_placement_fails() {
        let mut model = test_model(4);
        assert!(model.place(DeviceTarget::Cpu).is_ok());
        assert!(model.place(DeviceTarget::Gpu).is_err());
        assert_eq!(model.device(), DeviceTarget::Cpu, "failed placement leaves the model put");
    }

    #[test]
    fn dropout_only_in_train_mode() {
        let graph = line_graph(8);
        let mut model = MetapathLinearModel::new(
            "paper",
            vec!["pap".to_string()],
            test_features(8, 3),
            2,
            0.5,
            7,
        )
        .unwrap();
        let features = model.input_features().unwrap();

        model.set_mode(TrainingMode::Eval);
        let a = model.forward_full(&graph, &features).unwrap()["paper"].clone();
        let b = model.forward_full(&graph, &features).unwrap()["paper"].clone();
        assert_eq!(a, b, "evaluation-mode forward is deterministic");

        model.set_mode(TrainingMode::Train);
        let c = model.forward_full(&graph, &features).unwrap()["paper"].clone();
        assert_ne!(a, c, "train-mode dropout perturbs the outputs");
    }
}
