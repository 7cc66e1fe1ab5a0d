//! The training flow: epoch loop, evaluation cadence, early stopping,
//! checkpoint restoration, and final reporting or prediction export.
//!
//! [`HgnnTrainer`] is the orchestrator. It owns the model, the optimizer, and
//! the execution strategy for the duration of one run, and borrows the graph,
//! labels, and split indices read-only through [`RunContext`]. The run
//! produces either a metric report or an index-aligned prediction set.

use std::collections::HashMap;

use ndarray::Array2;

use crate::config::FlowConfig;
use crate::errors::HgnnError;
use crate::graph::{HeteroGraph, LabelVector, NodeIndex, Split, SplitIndices};
use crate::losses::{CrossEntropyLoss, LossFunction};
use crate::metrics::{render_metrics, Evaluator, F1Evaluator, MetricSet};
use crate::model::{DeviceTarget, HeteroModel, TrainingMode};
use crate::optimizers::{build_optimizer, Optimizer};
use crate::sampler::NeighborSampler;

pub mod aggregate;
pub mod stopping;
pub mod strategy;

pub use aggregate::MetricAggregator;
pub use stopping::{EarlyStopper, StopState};
pub use strategy::{ExecutionStrategy, FullBatchStrategy, SampledStrategy};

/// Read-only run inputs, fixed for the lifetime of a training run. The only
/// mutation associated with a run is the one-time device placement performed
/// on the model at run start.
pub struct RunContext<'a> {
    pub graph: &'a HeteroGraph,
    pub labels: &'a LabelVector,
    pub splits: &'a SplitIndices,
    pub device: DeviceTarget,
}

/// Per-split losses and scores from one evaluation step. Either fully present
/// for a split or absent.
#[derive(Debug, Clone, Default)]
pub struct SplitReport {
    pub losses: HashMap<Split, f32>,
    pub metrics: HashMap<Split, MetricSet>,
}

impl SplitReport {
    fn render(&self) -> String {
        let mut splits: Vec<Split> = self.metrics.keys().copied().collect();
        splits.sort_by_key(|s| format!("{s}"));
        let parts: Vec<String> = splits
            .iter()
            .map(|s| format!("{s}: [{}]", render_metrics(&self.metrics[s])))
            .collect();
        parts.join(", ")
    }
}

/// Final output of a run.
#[derive(Debug, Clone)]
pub enum FlowOutput {
    /// Index-aligned raw outputs for the prediction split (or, in whole-graph
    /// mode, for every category node).
    Predictions {
        indices: Vec<NodeIndex>,
        logits: Array2<f32>,
    },
    /// Metric report for the final (best-checkpoint) model, plus the epoch
    /// the loop stopped at.
    Report {
        metrics: HashMap<Split, MetricSet>,
        epoch: u32,
    },
}

/// Orchestrates training and evaluation for one node-classification run.
pub struct HgnnTrainer<'a, M: HeteroModel> {
    config: FlowConfig,
    model: M,
    optimizer: Box<dyn Optimizer>,
    loss_fn: Box<dyn LossFunction>,
    evaluator: Box<dyn Evaluator>,
    strategy: Box<dyn ExecutionStrategy + 'a>,
    ctx: RunContext<'a>,
}

impl<'a, M: HeteroModel> HgnnTrainer<'a, M> {
    /// Validate the configuration against the run inputs and assemble the
    /// collaborators. The execution strategy is fixed here, once.
    pub fn new(mut config: FlowConfig, model: M, ctx: RunContext<'a>) -> Result<Self, HgnnError> {
        config.normalize()?;

        if config.category != ctx.graph.category() {
            return Err(HgnnError::InvalidConfiguration(format!(
                "config category '{}' does not match graph category '{}'",
                config.category,
                ctx.graph.category()
            )));
        }
        let num_nodes = ctx.graph.num_category_nodes();
        ctx.splits.validate(num_nodes)?;
        if ctx.labels.len() != num_nodes {
            return Err(HgnnError::DimensionMismatch(format!(
                "{} labels for {} '{}' nodes",
                ctx.labels.len(),
                num_nodes,
                ctx.graph.category()
            )));
        }
        if ctx.splits.train.is_empty() {
            return Err(HgnnError::InvalidConfiguration(
                "training split is empty".to_string(),
            ));
        }
        if ctx.splits.valid.is_empty() {
            return Err(HgnnError::InvalidConfiguration(
                "validation split is empty".to_string(),
            ));
        }
        if config.test_flag && ctx.splits.test.is_empty() {
            return Err(HgnnError::InvalidConfiguration(
                "test_flag is set but the test split is missing or empty".to_string(),
            ));
        }
        if config.prediction_flag
            && !config.mini_batch_flag
            && ctx.splits.pred.is_none()
        {
            // whole-graph prediction covers the implicit full range, but the
            // flag still requires the dataset to declare a prediction split
            return Err(HgnnError::InvalidConfiguration(
                "prediction_flag is set but no prediction split is configured".to_string(),
            ));
        }
        if config.prediction_flag
            && config.mini_batch_flag
            && ctx.splits.pred.as_deref().map_or(true, |p| p.is_empty())
        {
            return Err(HgnnError::InvalidConfiguration(
                "prediction_flag is set but the prediction split is missing or empty".to_string(),
            ));
        }
        for name in &config.meta_paths {
            ctx.graph.metapath(name)?;
        }

        let optimizer = build_optimizer(config.optimizer, config.lr, config.weight_decay);
        let strategy: Box<dyn ExecutionStrategy + 'a> = if config.mini_batch_flag {
            let sampler = NeighborSampler::new(
                ctx.graph,
                &config.meta_paths,
                config.batch_size,
                config.num_neighbors,
                config.seed,
            )?;
            Box::new(SampledStrategy::new(sampler))
        } else {
            Box::new(FullBatchStrategy)
        };

        Ok(Self {
            evaluator: Box::new(F1Evaluator::new(config.num_classes)),
            loss_fn: Box::new(CrossEntropyLoss::new()),
            config,
            model,
            optimizer,
            strategy,
            ctx,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Run one evaluation step over the given splits with the current
    /// parameters. Non-mutating apart from the train/eval mode toggle.
    pub fn evaluate(&mut self, splits: &[Split]) -> Result<SplitReport, HgnnError> {
        self.strategy.evaluate(
            &mut self.model,
            &self.ctx,
            splits,
            self.loss_fn.as_ref(),
            self.evaluator.as_ref(),
        )
    }

    /// Execute the full training run and produce the final output.
    pub fn run(&mut self) -> Result<FlowOutput, HgnnError> {
        self.model.place(self.ctx.device)?;
        let shapes: Vec<(usize, usize)> = self
            .model
            .parameters_mut()
            .iter()
            .map(|p| p.dim())
            .collect();
        self.optimizer.initialize(&shapes)?;
        log::info!(
            "starting training: {} epochs max, {} parameters, lr {}",
            self.config.max_epoch,
            self.model.parameter_count(),
            self.config.lr
        );

        let mut stopper = EarlyStopper::new(self.config.patience)?;
        let mut last_epoch = 0;

        for epoch in 0..self.config.max_epoch {
            last_epoch = epoch;
            let train_loss = self.strategy.train_epoch(
                &mut self.model,
                &self.ctx,
                self.loss_fn.as_ref(),
                self.optimizer.as_mut(),
            )?;

            if epoch % self.config.evaluate_interval == 0 {
                let mut splits = vec![Split::Train, Split::Valid];
                if self.config.test_flag {
                    splits.push(Split::Test);
                }
                let report = self.evaluate(&splits)?;
                let val_loss = report.losses[&Split::Valid];
                log::info!(
                    "Epoch {epoch}: train loss {train_loss:.4}, valid loss {val_loss:.4}. {}",
                    report.render()
                );
                if stopper.observe(val_loss, &self.model) {
                    log::info!("early stop at epoch {epoch}");
                    break;
                }
            }
        }

        // final results must come from the best-validation model, not the
        // last-trained one
        if let Some(snapshot) = stopper.best_checkpoint() {
            self.model.restore(snapshot)?;
        }

        if self.config.prediction_flag {
            let (indices, logits) = self.strategy.predict(&mut self.model, &self.ctx)?;
            return Ok(FlowOutput::Predictions { indices, logits });
        }

        if self.config.test_flag {
            if self.config.results_path.is_some() {
                return self.finish_with_results_file(last_epoch);
            }
            let report = self.evaluate(&[Split::Valid, Split::Test])?;
            log::info!("[Test Info] {}", report.render());
            return Ok(FlowOutput::Report {
                metrics: report.metrics,
                epoch: last_epoch,
            });
        }

        let report = self.evaluate(&[Split::Valid])?;
        log::info!("[Final Info] {}", report.render());
        Ok(FlowOutput::Report {
            metrics: report.metrics,
            epoch: last_epoch,
        })
    }

    /// Benchmark reporting path: validation metrics plus a persisted file of
    /// raw whole-graph logits for the full category node set.
    fn finish_with_results_file(&mut self, epoch: u32) -> Result<FlowOutput, HgnnError> {
        let report = self.evaluate(&[Split::Valid])?;
        log::info!("[Test Info] {}", report.render());

        self.model.set_mode(TrainingMode::Eval);
        let features = self.model.input_features()?;
        let outputs = self.model.forward_full(self.ctx.graph, &features)?;
        let logits = strategy::take_category(outputs, self.model.category())?;
        self.save_results(&logits)?;

        Ok(FlowOutput::Report {
            metrics: report.metrics,
            epoch,
        })
    }

    #[cfg(feature = "serde")]
    fn save_results(&self, logits: &Array2<f32>) -> Result<(), HgnnError> {
        // checked in run(): results_path is present on this path
        if let Some(path) = &self.config.results_path {
            crate::export::save_logits(path, self.ctx.graph.category(), logits)?;
            log::info!(
                "saved results for {} nodes to {}",
                logits.nrows(),
                path.display()
            );
        }
        Ok(())
    }

    #[cfg(not(feature = "serde"))]
    fn save_results(&self, _logits: &Array2<f32>) -> Result<(), HgnnError> {
        Err(HgnnError::InvalidConfiguration(
            "results_path requires the `serde` feature".to_string(),
        ))
    }
}
