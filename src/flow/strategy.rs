//! Execution strategies: whole-graph and sampled-subgraph variants of the
//! training, evaluation, and prediction steps.
//!
//! The controller holds exactly one strategy, chosen at construction from the
//! configuration, so the per-step logic never branches on an execution-mode
//! flag.

use std::collections::HashMap;

use ndarray::{concatenate, Array2, ArrayView2, Axis};

use crate::errors::HgnnError;
use crate::graph::{LabelVector, NodeIndex, Split};
use crate::losses::LossFunction;
use crate::metrics::Evaluator;
use crate::model::{HeteroModel, TrainingMode};
use crate::optimizers::Optimizer;
use crate::sampler::{BatchSource, MetapathBatch, NeighborSampler};

use super::aggregate::MetricAggregator;
use super::{RunContext, SplitReport};

/// One execution mode's implementation of the three step kinds.
///
/// `train_epoch` mutates model parameters; `evaluate` and `predict` run in
/// evaluation mode and leave parameters untouched.
pub trait ExecutionStrategy {
    fn train_epoch(
        &mut self,
        model: &mut dyn HeteroModel,
        ctx: &RunContext<'_>,
        loss_fn: &dyn LossFunction,
        optimizer: &mut dyn Optimizer,
    ) -> Result<f32, HgnnError>;

    fn evaluate(
        &mut self,
        model: &mut dyn HeteroModel,
        ctx: &RunContext<'_>,
        splits: &[Split],
        loss_fn: &dyn LossFunction,
        evaluator: &dyn Evaluator,
    ) -> Result<SplitReport, HgnnError>;

    fn predict(
        &mut self,
        model: &mut dyn HeteroModel,
        ctx: &RunContext<'_>,
    ) -> Result<(Vec<NodeIndex>, Array2<f32>), HgnnError>;
}

/// Pull the category output out of a per-type output map.
pub(crate) fn take_category(
    mut outputs: HashMap<String, Array2<f32>>,
    category: &str,
) -> Result<Array2<f32>, HgnnError> {
    outputs.remove(category).ok_or_else(|| {
        HgnnError::InvalidInput(format!("model produced no output for node type '{category}'"))
    })
}

pub(crate) fn gather_labels(labels: &LabelVector, indices: &[NodeIndex]) -> Vec<usize> {
    indices.iter().map(|&i| labels[i]).collect()
}

/// Look up, per metapath, the input-feature rows a batch needs.
fn lookup_embeddings(
    model: &dyn HeteroModel,
    batch: &MetapathBatch,
) -> Result<HashMap<String, Array2<f32>>, HgnnError> {
    let mut embeddings = HashMap::with_capacity(batch.input_nodes.len());
    for (name, nodes) in &batch.input_nodes {
        embeddings.insert(name.clone(), model.features_for(nodes)?);
    }
    Ok(embeddings)
}

/// Whole-graph execution: every step is a single forward pass over the full
/// graph, with split membership applied by row selection afterwards.
pub struct FullBatchStrategy;

impl FullBatchStrategy {
    fn forward_category(
        model: &mut dyn HeteroModel,
        ctx: &RunContext<'_>,
    ) -> Result<Array2<f32>, HgnnError> {
        let features = model.input_features()?;
        let outputs = model.forward_full(ctx.graph, &features)?;
        take_category(outputs, model.category())
    }
}

impl ExecutionStrategy for FullBatchStrategy {
    fn train_epoch(
        &mut self,
        model: &mut dyn HeteroModel,
        ctx: &RunContext<'_>,
        loss_fn: &dyn LossFunction,
        optimizer: &mut dyn Optimizer,
    ) -> Result<f32, HgnnError> {
        model.set_mode(TrainingMode::Train);
        let logits = Self::forward_category(model, ctx)?;

        let train_idx = ctx.splits.get(Split::Train)?;
        let selected = logits.select(Axis(0), train_idx);
        let targets = gather_labels(ctx.labels, train_idx);
        let (loss, grad_selected) = loss_fn.loss_and_grad(&selected, &targets)?;

        // scatter the split gradient back into the full logits layout
        let mut grad_full = Array2::<f32>::zeros(logits.raw_dim());
        for (row, &node) in train_idx.iter().enumerate() {
            grad_full.row_mut(node).assign(&grad_selected.row(row));
        }

        let gradients = model.backward(&grad_full)?;
        optimizer.step(model.parameters_mut(), &gradients)?;
        log::debug!("full-batch step: loss = {loss:.6}");
        Ok(loss)
    }

    fn evaluate(
        &mut self,
        model: &mut dyn HeteroModel,
        ctx: &RunContext<'_>,
        splits: &[Split],
        loss_fn: &dyn LossFunction,
        evaluator: &dyn Evaluator,
    ) -> Result<SplitReport, HgnnError> {
        model.set_mode(TrainingMode::Eval);
        // one shared forward pass serves every requested split
        let logits = Self::forward_category(model, ctx)?;

        let mut report = SplitReport::default();
        for &split in splits {
            let indices = ctx.splits.get(split)?;
            let selected = logits.select(Axis(0), indices);
            let targets = gather_labels(ctx.labels, indices);
            let loss = loss_fn.loss(&selected, &targets)?;
            let metrics = evaluator.evaluate(&selected, &targets)?;
            report.losses.insert(split, loss);
            report.metrics.insert(split, metrics);
        }
        Ok(report)
    }

    fn predict(
        &mut self,
        model: &mut dyn HeteroModel,
        ctx: &RunContext<'_>,
    ) -> Result<(Vec<NodeIndex>, Array2<f32>), HgnnError> {
        model.set_mode(TrainingMode::Eval);
        let logits = Self::forward_category(model, ctx)?;
        // whole-graph prediction covers the implicit full category range
        let indices: Vec<NodeIndex> = (0..logits.nrows()).collect();
        Ok((indices, logits))
    }
}

/// Sampled execution driven by a metapath neighbor sampler. Each step pulls
/// one pass of batches per split; batch order is sampler-determined.
pub struct SampledStrategy<'g> {
    sampler: NeighborSampler<'g>,
}

impl<'g> SampledStrategy<'g> {
    pub fn new(sampler: NeighborSampler<'g>) -> Self {
        Self { sampler }
    }

    fn forward_batch(
        model: &mut dyn HeteroModel,
        batch: &MetapathBatch,
    ) -> Result<Array2<f32>, HgnnError> {
        let embeddings = lookup_embeddings(model, batch)?;
        let outputs = model.forward_blocks(batch, &embeddings)?;
        take_category(outputs, model.category())
    }
}

impl ExecutionStrategy for SampledStrategy<'_> {
    fn train_epoch(
        &mut self,
        model: &mut dyn HeteroModel,
        ctx: &RunContext<'_>,
        loss_fn: &dyn LossFunction,
        optimizer: &mut dyn Optimizer,
    ) -> Result<f32, HgnnError> {
        model.set_mode(TrainingMode::Train);
        let train_idx = ctx.splits.get(Split::Train)?;
        let mut aggregator = MetricAggregator::new();

        for batch in self.sampler.batches(train_idx)? {
            let logits = Self::forward_batch(model, &batch)?;
            let targets = gather_labels(ctx.labels, &batch.seeds);
            let (loss, grad) = loss_fn.loss_and_grad(&logits, &targets)?;
            let gradients = model.backward(&grad)?;
            optimizer.step(model.parameters_mut(), &gradients)?;
            aggregator.observe_loss(loss);
            log::debug!(
                "sampled step: {} seeds, loss = {loss:.6}",
                batch.seeds.len()
            );
        }
        aggregator.mean_loss()
    }

    fn evaluate(
        &mut self,
        model: &mut dyn HeteroModel,
        ctx: &RunContext<'_>,
        splits: &[Split],
        loss_fn: &dyn LossFunction,
        evaluator: &dyn Evaluator,
    ) -> Result<SplitReport, HgnnError> {
        model.set_mode(TrainingMode::Eval);
        let mut report = SplitReport::default();
        for &split in splits {
            let indices = ctx.splits.get(split)?;
            // accumulators are per split; nothing carries across splits
            let mut aggregator = MetricAggregator::new();
            for batch in self.sampler.batches(indices)? {
                let logits = Self::forward_batch(model, &batch)?;
                let targets = gather_labels(ctx.labels, &batch.seeds);
                let loss = loss_fn.loss(&logits, &targets)?;
                aggregator.observe(loss, logits, &targets)?;
            }
            let (loss, metrics) = aggregator.finish(evaluator)?;
            report.losses.insert(split, loss);
            report.metrics.insert(split, metrics);
        }
        Ok(report)
    }

    fn predict(
        &mut self,
        model: &mut dyn HeteroModel,
        ctx: &RunContext<'_>,
    ) -> Result<(Vec<NodeIndex>, Array2<f32>), HgnnError> {
        model.set_mode(TrainingMode::Eval);
        let pred_idx = ctx.splits.get(Split::Pred)?;

        let mut indices: Vec<NodeIndex> = Vec::with_capacity(pred_idx.len());
        let mut chunks: Vec<Array2<f32>> = Vec::new();
        for batch in self.sampler.batches(pred_idx)? {
            let logits = Self::forward_batch(model, &batch)?;
            indices.extend_from_slice(&batch.seeds);
            chunks.push(logits);
        }

        if chunks.is_empty() {
            return Err(HgnnError::EvaluationError(
                "prediction split yielded no batches".to_string(),
            ));
        }
        let views: Vec<ArrayView2<f32>> = chunks.iter().map(Array2::view).collect();
        let logits = concatenate(Axis(0), &views)?;
        Ok((indices, logits))
    }
}
