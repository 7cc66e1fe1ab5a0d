//! Flow configuration.

use std::path::PathBuf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::HgnnError;
use crate::model::DeviceTarget;
use crate::optimizers::OptimizerKind;

/// Configuration for one node-classification training run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// The node type whose labels are predicted.
    pub category: String,
    /// Number of label classes for the category type.
    pub num_classes: usize,
    /// Declared model output dimensionality. Reconciled with `num_classes`
    /// during normalization rather than rejected.
    pub out_dim: usize,

    /// Sampled-subgraph execution instead of whole-graph computation.
    pub mini_batch_flag: bool,
    /// Evaluate and report the held-out test split at run end.
    pub test_flag: bool,
    /// Export predictions for the unlabeled prediction split at run end.
    pub prediction_flag: bool,

    pub max_epoch: u32,
    pub patience: u32,
    /// Evaluate (and consult the early stopper) every this many epochs.
    pub evaluate_interval: u32,

    /// Seeds per sampled batch.
    pub batch_size: usize,
    /// Neighbor fan-out per seed per metapath.
    pub num_neighbors: usize,
    /// Metapath names; the adjacency itself lives in the graph handle.
    pub meta_paths: Vec<String>,

    pub optimizer: OptimizerKind,
    pub lr: f32,
    pub weight_decay: f32,
    pub dropout: f32,

    /// Fixed RNG seed for the sampler; `None` draws from entropy.
    pub seed: Option<u64>,
    pub device: DeviceTarget,
    /// Benchmark results file for raw whole-graph logits; only consulted on
    /// the test reporting path.
    pub results_path: Option<PathBuf>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            category: String::new(),
            num_classes: 2,
            out_dim: 2,
            mini_batch_flag: false,
            test_flag: true,
            prediction_flag: false,
            max_epoch: 100,
            patience: 10,
            evaluate_interval: 1,
            batch_size: 32,
            num_neighbors: 20,
            meta_paths: Vec::new(),
            optimizer: OptimizerKind::Adam,
            lr: 0.01,
            weight_decay: 0.0,
            dropout: 0.0,
            seed: None,
            device: DeviceTarget::Cpu,
            results_path: None,
        }
    }
}

impl FlowConfig {
    /// Reconcile and bounds-check the configuration.
    ///
    /// A declared output dimensionality that disagrees with the number of
    /// classes is corrected with a warning, not rejected; everything else
    /// invalid is an error.
    pub fn normalize(&mut self) -> Result<(), HgnnError> {
        if self.out_dim != self.num_classes {
            log::warn!(
                "modifying out_dim from {} to match num_classes {}",
                self.out_dim,
                self.num_classes
            );
            self.out_dim = self.num_classes;
        }
        if self.num_classes < 2 {
            return Err(HgnnError::InvalidConfiguration(format!(
                "num_classes must be at least 2, got {}",
                self.num_classes
            )));
        }
        if self.max_epoch == 0 {
            return Err(HgnnError::InvalidConfiguration(
                "max_epoch must be at least 1".to_string(),
            ));
        }
        if self.patience == 0 {
            return Err(HgnnError::InvalidConfiguration(
                "patience must be at least 1".to_string(),
            ));
        }
        if self.evaluate_interval == 0 {
            return Err(HgnnError::InvalidConfiguration(
                "evaluate_interval must be at least 1".to_string(),
            ));
        }
        if self.mini_batch_flag && self.meta_paths.is_empty() {
            return Err(HgnnError::InvalidConfiguration(
                "mini-batch execution requires at least one metapath".to_string(),
            ));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(HgnnError::InvalidConfiguration(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }
        Ok(())
    }
}
