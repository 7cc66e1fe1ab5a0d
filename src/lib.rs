//! Training and evaluation flows for heterogeneous-graph node classification.
//!
//! This crate orchestrates, over a fixed number of epochs, the forward and
//! backward optimization steps, multi-split metric evaluation, early-stopping
//! decisions, checkpoint restoration, and optional prediction export for a
//! metapath-based heterogeneous graph model. Two execution modes share the
//! same metric semantics: whole-graph computation and sampled-subgraph
//! computation driven by a metapath neighbor sampler.
//!
//! The moving parts are deliberately small and composed explicitly:
//!
//! - [`graph`] holds the heterogeneous graph handle, split index sets, and
//!   label/feature containers;
//! - [`sampler`] produces batches, either one whole-graph batch or a shuffled
//!   partition of a split with fan-out-limited neighborhoods;
//! - [`model`] defines the adapter surface the flows drive, plus a reference
//!   implementation with analytic gradients;
//! - [`losses`], [`metrics`], and [`optimizers`] are the numeric
//!   collaborators;
//! - [`flow`] is the controller: epoch loop, execution strategies, batch
//!   aggregation, and the early-stopping state machine.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use ndarray::{Array1, Array2};
//! use zen_hgnn::{
//!     FlowConfig, HeteroGraph, HgnnTrainer, MetapathGraph, MetapathLinearModel,
//!     RunContext, SplitIndices, DeviceTarget,
//! };
//!
//! # fn main() -> Result<(), zen_hgnn::HgnnError> {
//! let mut counts = HashMap::new();
//! counts.insert("paper".to_string(), 100);
//! let mut graph = HeteroGraph::new("paper", counts)?;
//! graph.add_metapath("pap", MetapathGraph::new(100, &[(0, 1), (1, 0)])?)?;
//!
//! let mut features = HashMap::new();
//! features.insert("paper".to_string(), Array2::<f32>::zeros((100, 16)));
//! let labels = Array1::<usize>::zeros(100);
//! let splits = SplitIndices {
//!     train: (0..60).collect(),
//!     valid: (60..80).collect(),
//!     test: (80..100).collect(),
//!     pred: None,
//! };
//!
//! let config = FlowConfig {
//!     category: "paper".to_string(),
//!     num_classes: 2,
//!     out_dim: 2,
//!     meta_paths: vec!["pap".to_string()],
//!     ..FlowConfig::default()
//! };
//! let model = MetapathLinearModel::new(
//!     "paper", config.meta_paths.clone(), features, config.out_dim, 0.0, 0,
//! )?;
//! let ctx = RunContext {
//!     graph: &graph,
//!     labels: &labels,
//!     splits: &splits,
//!     device: DeviceTarget::Cpu,
//! };
//! let mut trainer = HgnnTrainer::new(config, model, ctx)?;
//! let output = trainer.run()?;
//! # let _ = output;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod flow;
pub mod graph;
pub mod losses;
pub mod metrics;
pub mod model;
pub mod optimizers;
pub mod sampler;

#[cfg(feature = "serde")]
pub mod export;

pub use config::FlowConfig;
pub use errors::HgnnError;
pub use flow::{
    EarlyStopper, ExecutionStrategy, FlowOutput, FullBatchStrategy, HgnnTrainer,
    MetricAggregator, RunContext, SampledStrategy, SplitReport, StopState,
};
pub use graph::{
    FeatureDict, HeteroGraph, LabelVector, MetapathGraph, NodeIndex, Split, SplitIndices,
};
pub use losses::{CrossEntropyLoss, LossFunction};
pub use metrics::{AccuracyEvaluator, Evaluator, F1Evaluator, MetricSet};
pub use model::{
    DeviceTarget, HeteroModel, MetapathLinearModel, ModelSnapshot, TrainingMode,
};
pub use optimizers::{build_optimizer, Adam, AdamW, Optimizer, OptimizerKind, Sgd};
pub use sampler::{BatchSource, Block, FullGraphSource, MetapathBatch, NeighborSampler};
