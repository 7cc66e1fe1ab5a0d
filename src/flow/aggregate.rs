//! Epoch-level aggregation of per-batch results.

use ndarray::{concatenate, Array2, ArrayView2, Axis};

use crate::errors::HgnnError;
use crate::metrics::{Evaluator, MetricSet};

/// Folds one pass over a split into an epoch-level loss and score.
///
/// The loss is the unweighted arithmetic mean of the per-batch losses: batches
/// may have unequal seed counts, and the mean is over batches, not nodes.
/// The score is computed exactly once over the concatenation of all batch
/// outputs, because classification metrics are not separable across batches.
/// One aggregator covers one split in one pass; a fresh one is created per
/// split so no state leaks between splits.
#[derive(Default)]
pub struct MetricAggregator {
    batch_losses: Vec<f32>,
    logits: Vec<Array2<f32>>,
    labels: Vec<usize>,
}

impl MetricAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a training batch, where only the loss matters.
    pub fn observe_loss(&mut self, loss: f32) {
        self.batch_losses.push(loss);
    }

    /// Record an evaluation batch: loss plus the batch's outputs and labels
    /// in yield order.
    pub fn observe(
        &mut self,
        loss: f32,
        logits: Array2<f32>,
        labels: &[usize],
    ) -> Result<(), HgnnError> {
        if logits.nrows() != labels.len() {
            return Err(HgnnError::DimensionMismatch(format!(
                "batch has {} logit rows but {} labels",
                logits.nrows(),
                labels.len()
            )));
        }
        self.batch_losses.push(loss);
        self.logits.push(logits);
        self.labels.extend_from_slice(labels);
        Ok(())
    }

    pub fn num_batches(&self) -> usize {
        self.batch_losses.len()
    }

    /// Unweighted mean of the recorded batch losses.
    pub fn mean_loss(&self) -> Result<f32, HgnnError> {
        if self.batch_losses.is_empty() {
            return Err(HgnnError::EvaluationError(
                "no batches were observed in this pass".to_string(),
            ));
        }
        Ok(self.batch_losses.iter().sum::<f32>() / self.batch_losses.len() as f32)
    }

    /// Finish the pass: mean loss plus a single evaluator invocation over the
    /// concatenated outputs.
    pub fn finish(self, evaluator: &dyn Evaluator) -> Result<(f32, MetricSet), HgnnError> {
        let loss = self.mean_loss()?;
        let views: Vec<ArrayView2<f32>> = self.logits.iter().map(Array2::view).collect();
        let all_logits = concatenate(Axis(0), &views)?;
        let metrics = evaluator.evaluate(&all_logits, &self.labels)?;
        Ok((loss, metrics))
    }
}
