//! Loss functions for node classification.

use ndarray::{Array2, ArrayView1, Axis};
use num_traits::Float;

use crate::errors::HgnnError;

/// Numerically stable `log(sum(exp(values)))`.
fn log_sum_exp<T: Float>(values: ArrayView1<T>) -> T {
    let max = values.iter().copied().fold(T::neg_infinity(), T::max);
    if max.is_infinite() {
        return max;
    }
    let sum = values
        .iter()
        .fold(T::zero(), |acc, &v| acc + (v - max).exp());
    max + sum.ln()
}

/// Scalar loss over a logits matrix `[num_nodes, num_classes]` and the class
/// index of each row. The gradient is returned with respect to the logits so
/// the model can backpropagate through its own parameters.
pub trait LossFunction {
    fn loss(&self, logits: &Array2<f32>, targets: &[usize]) -> Result<f32, HgnnError>;

    fn loss_and_grad(
        &self,
        logits: &Array2<f32>,
        targets: &[usize],
    ) -> Result<(f32, Array2<f32>), HgnnError>;
}

/// Softmax cross-entropy with mean reduction over the rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self
    }

    fn check(&self, logits: &Array2<f32>, targets: &[usize]) -> Result<(), HgnnError> {
        if logits.nrows() == 0 {
            return Err(HgnnError::InvalidInput(
                "cross entropy over zero rows is undefined".to_string(),
            ));
        }
        if logits.nrows() != targets.len() {
            return Err(HgnnError::DimensionMismatch(format!(
                "{} logit rows vs {} targets",
                logits.nrows(),
                targets.len()
            )));
        }
        if let Some(&bad) = targets.iter().find(|&&t| t >= logits.ncols()) {
            return Err(HgnnError::InvalidInput(format!(
                "target class {bad} out of range for {} classes",
                logits.ncols()
            )));
        }
        Ok(())
    }
}

impl LossFunction for CrossEntropyLoss {
    fn loss(&self, logits: &Array2<f32>, targets: &[usize]) -> Result<f32, HgnnError> {
        self.check(logits, targets)?;
        let mut total = 0.0f32;
        for (row, &target) in logits.axis_iter(Axis(0)).zip(targets) {
            total += log_sum_exp(row) - row[target];
        }
        Ok(total / logits.nrows() as f32)
    }

    fn loss_and_grad(
        &self,
        logits: &Array2<f32>,
        targets: &[usize],
    ) -> Result<(f32, Array2<f32>), HgnnError> {
        self.check(logits, targets)?;
        let n = logits.nrows() as f32;
        let mut grad = Array2::<f32>::zeros(logits.raw_dim());
        let mut total = 0.0f32;
        for (i, (row, &target)) in logits.axis_iter(Axis(0)).zip(targets).enumerate() {
            let lse = log_sum_exp(row);
            total += lse - row[target];
            let mut grad_row = grad.row_mut(i);
            for (j, &logit) in row.iter().enumerate() {
                // softmax minus one-hot, scaled by the mean reduction
                let softmax = (logit - lse).exp();
                grad_row[j] = (softmax - if j == target { 1.0 } else { 0.0 }) / n;
            }
        }
        Ok((total / n, grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn uniform_logits_give_log_num_classes() {
        let logits = array![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]];
        let loss = CrossEntropyLoss.loss(&logits, &[0, 2]).unwrap();
        assert!((loss - (3.0f32).ln()).abs() < 1e-6);
    }

    #[test]
    fn gradient_rows_sum_to_zero() {
        let logits = array![[2.0, -1.0, 0.5], [0.1, 0.2, 0.3]];
        let (_, grad) = CrossEntropyLoss.loss_and_grad(&logits, &[1, 0]).unwrap();
        for row in grad.axis_iter(Axis(0)) {
            let sum: f32 = row.sum();
            assert!(sum.abs() < 1e-6);
        }
    }

    #[test]
    fn gradient_points_downhill() {
        let logits = array![[1.0, -1.0], [-0.5, 0.5]];
        let targets = [0usize, 1usize];
        let (loss, grad) = CrossEntropyLoss.loss_and_grad(&logits, &targets).unwrap();
        let stepped = &logits - &(&grad * 10.0f32);
        let after = CrossEntropyLoss.loss(&stepped, &targets).unwrap();
        assert!(after < loss);
    }

    #[test]
    fn shape_errors_are_reported() {
        let logits = array![[0.0, 1.0]];
        assert!(CrossEntropyLoss.loss(&logits, &[0, 1]).is_err());
        assert!(CrossEntropyLoss.loss(&logits, &[5]).is_err());
        let empty = Array2::<f32>::zeros((0, 2));
        assert!(CrossEntropyLoss.loss(&empty, &[]).is_err());
    }
}
