//! Evaluation metrics for node classification.
//!
//! Evaluators consume a full (logits, targets) pair for one split in one
//! call. Scores like F1 are not separable across batches, so the flows
//! concatenate per-batch outputs first and invoke the evaluator exactly once
//! per split per evaluation.

use std::collections::HashMap;

use ndarray::{Array2, Axis};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::errors::HgnnError;

/// Metric name -> value, e.g. `{"macro_f1": 0.91, "micro_f1": 0.93}`.
pub type MetricSet = HashMap<String, f32>;

pub trait Evaluator {
    fn name(&self) -> &'static str;

    fn evaluate(&self, logits: &Array2<f32>, targets: &[usize]) -> Result<MetricSet, HgnnError>;
}

/// Predicted class per row.
pub fn argmax_rows(logits: &Array2<f32>) -> Vec<usize> {
    logits
        .axis_iter(Axis(0))
        .map(|row| {
            let mut best = 0;
            let mut best_value = f32::NEG_INFINITY;
            for (j, &value) in row.iter().enumerate() {
                if value > best_value {
                    best = j;
                    best_value = value;
                }
            }
            best
        })
        .collect()
}

/// Render a metric set with deterministic key order, for log lines.
pub fn render_metrics(metrics: &MetricSet) -> String {
    let mut keys: Vec<&str> = metrics.keys().map(String::as_str).collect();
    keys.sort_unstable();
    let parts: Vec<String> = keys
        .iter()
        .map(|k| format!("{k}: {:.4}", metrics[*k]))
        .collect();
    parts.join(", ")
}

fn check_inputs(logits: &Array2<f32>, targets: &[usize]) -> Result<(), HgnnError> {
    if logits.nrows() == 0 {
        return Err(HgnnError::EvaluationError(
            "cannot evaluate an empty prediction set".to_string(),
        ));
    }
    if logits.nrows() != targets.len() {
        return Err(HgnnError::DimensionMismatch(format!(
            "{} prediction rows vs {} targets",
            logits.nrows(),
            targets.len()
        )));
    }
    Ok(())
}

/// Macro- and micro-averaged F1 over the argmax predictions.
#[derive(Debug, Clone, Copy)]
pub struct F1Evaluator {
    num_classes: usize,
}

impl F1Evaluator {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl Evaluator for F1Evaluator {
    fn name(&self) -> &'static str {
        "f1"
    }

    fn evaluate(&self, logits: &Array2<f32>, targets: &[usize]) -> Result<MetricSet, HgnnError> {
        check_inputs(logits, targets)?;
        let predicted = argmax_rows(logits);

        let count_class = |class: usize| -> (usize, usize, usize) {
            let mut tp = 0;
            let mut fp = 0;
            let mut fn_ = 0;
            for (&pred, &truth) in predicted.iter().zip(targets) {
                match (pred == class, truth == class) {
                    (true, true) => tp += 1,
                    (true, false) => fp += 1,
                    (false, true) => fn_ += 1,
                    (false, false) => {}
                }
            }
            (tp, fp, fn_)
        };

        #[cfg(feature = "parallel")]
        let counts: Vec<(usize, usize, usize)> =
            (0..self.num_classes).into_par_iter().map(count_class).collect();
        #[cfg(not(feature = "parallel"))]
        let counts: Vec<(usize, usize, usize)> =
            (0..self.num_classes).map(count_class).collect();

        let mut macro_sum = 0.0f32;
        let (mut tp_total, mut fp_total, mut fn_total) = (0usize, 0usize, 0usize);
        for &(tp, fp, fn_) in &counts {
            let denom = 2 * tp + fp + fn_;
            // classes absent from both predictions and targets contribute 0
            if denom > 0 {
                macro_sum += 2.0 * tp as f32 / denom as f32;
            }
            tp_total += tp;
            fp_total += fp;
            fn_total += fn_;
        }
        let micro_denom = 2 * tp_total + fp_total + fn_total;
        let micro = if micro_denom > 0 {
            2.0 * tp_total as f32 / micro_denom as f32
        } else {
            0.0
        };

        let mut metrics = MetricSet::new();
        metrics.insert("macro_f1".to_string(), macro_sum / self.num_classes as f32);
        metrics.insert("micro_f1".to_string(), micro);
        Ok(metrics)
    }
}

/// Plain accuracy over the argmax predictions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccuracyEvaluator;

impl Evaluator for AccuracyEvaluator {
    fn name(&self) -> &'static str {
        "accuracy"
    }

    fn evaluate(&self, logits: &Array2<f32>, targets: &[usize]) -> Result<MetricSet, HgnnError> {
        check_inputs(logits, targets)?;
        let predicted = argmax_rows(logits);
        let correct = predicted
            .iter()
            .zip(targets)
            .filter(|(pred, truth)| pred == truth)
            .count();
        let mut metrics = MetricSet::new();
        metrics.insert(
            "accuracy".to_string(),
            correct as f32 / targets.len() as f32,
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn logits_for(predictions: &[usize], num_classes: usize) -> Array2<f32> {
        let mut logits = Array2::<f32>::zeros((predictions.len(), num_classes));
        for (i, &p) in predictions.iter().enumerate() {
            logits[[i, p]] = 1.0;
        }
        logits
    }

    #[test]
    fn perfect_predictions_score_one() {
        let targets = [0usize, 1, 2, 1];
        let logits = logits_for(&targets, 3);
        let scores = F1Evaluator::new(3).evaluate(&logits, &targets).unwrap();
        assert!((scores["macro_f1"] - 1.0).abs() < 1e-6);
        assert!((scores["micro_f1"] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn known_confusion_matrix() {
        // predictions: [0, 0, 1, 1], targets: [0, 1, 1, 0]
        // class 0: tp=1 fp=1 fn=1 -> f1 = 0.5; class 1 likewise
        let logits = logits_for(&[0, 0, 1, 1], 2);
        let targets = [0usize, 1, 1, 0];
        let scores = F1Evaluator::new(2).evaluate(&logits, &targets).unwrap();
        assert!((scores["macro_f1"] - 0.5).abs() < 1e-6);
        assert!((scores["micro_f1"] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn single_class_input_is_not_an_error() {
        let logits = logits_for(&[1, 1, 1], 3);
        let targets = [1usize, 1, 1];
        let scores = F1Evaluator::new(3).evaluate(&logits, &targets).unwrap();
        // only one of three classes has any support
        assert!((scores["macro_f1"] - 1.0 / 3.0).abs() < 1e-6);
        assert!((scores["micro_f1"] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_input_is_an_error() {
        let logits = Array2::<f32>::zeros((0, 2));
        assert!(F1Evaluator::new(2).evaluate(&logits, &[]).is_err());
        assert!(AccuracyEvaluator.evaluate(&logits, &[]).is_err());
    }

    #[test]
    fn accuracy_counts_matches() {
        let logits = array![[0.9, 0.1], [0.2, 0.8], [0.6, 0.4]];
        let scores = AccuracyEvaluator.evaluate(&logits, &[0, 1, 1]).unwrap();
        assert!((scores["accuracy"] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut metrics = MetricSet::new();
        metrics.insert("micro_f1".to_string(), 0.75);
        metrics.insert("macro_f1".to_string(), 0.5);
        assert_eq!(render_metrics(&metrics), "macro_f1: 0.5000, micro_f1: 0.7500");
    }
}
