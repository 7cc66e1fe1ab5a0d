//! Optimizers over the model's parameter tensors.
//!
//! Parameters are visited as an ordered list of `Array2<f32>` tensors; the
//! gradient list passed to [`Optimizer::step`] must align with that order.
//! State buffers are laid out per tensor and created by `initialize`.

use ndarray::Array2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::HgnnError;

pub trait Optimizer {
    /// Allocate state buffers for parameters of the given shapes.
    fn initialize(&mut self, shapes: &[(usize, usize)]) -> Result<(), HgnnError>;

    /// Apply one update. `parameters` and `gradients` must align with the
    /// shapes passed to `initialize`.
    fn step(
        &mut self,
        parameters: Vec<&mut Array2<f32>>,
        gradients: &[Array2<f32>],
    ) -> Result<(), HgnnError>;

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, lr: f32);

    /// Clear all state buffers without reallocating.
    fn reset(&mut self);
}

fn check_aligned(
    parameters: &[&mut Array2<f32>],
    gradients: &[Array2<f32>],
    buffers: usize,
) -> Result<(), HgnnError> {
    if parameters.len() != gradients.len() || parameters.len() != buffers {
        return Err(HgnnError::TrainingError(format!(
            "optimizer saw {} parameters, {} gradients, {} state buffers",
            parameters.len(),
            gradients.len(),
            buffers
        )));
    }
    Ok(())
}

/// Stochastic gradient descent with optional momentum and Nesterov update.
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    weight_decay: f32,
    dampening: f32,
    nesterov: bool,
    momentum_buffers: Vec<Array2<f32>>,
    initialized: bool,
}

impl Sgd {
    pub fn new(learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            weight_decay: 0.0,
            dampening: 0.0,
            nesterov: false,
            momentum_buffers: Vec::new(),
            initialized: false,
        }
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_dampening(mut self, dampening: f32) -> Self {
        self.dampening = dampening;
        self
    }

    pub fn with_nesterov(mut self, nesterov: bool) -> Self {
        self.nesterov = nesterov;
        self
    }
}

impl Optimizer for Sgd {
    fn initialize(&mut self, shapes: &[(usize, usize)]) -> Result<(), HgnnError> {
        self.momentum_buffers = shapes.iter().map(|&s| Array2::zeros(s)).collect();
        self.initialized = true;
        Ok(())
    }

    fn step(
        &mut self,
        parameters: Vec<&mut Array2<f32>>,
        gradients: &[Array2<f32>],
    ) -> Result<(), HgnnError> {
        if !self.initialized {
            return Err(HgnnError::TrainingError(
                "optimizer not initialized".to_string(),
            ));
        }
        check_aligned(&parameters, gradients, self.momentum_buffers.len())?;

        for (i, (param, grad)) in parameters.into_iter().zip(gradients).enumerate() {
            let d_p = if self.weight_decay != 0.0 {
                grad + &(&*param * self.weight_decay)
            } else {
                grad.clone()
            };

            if self.momentum != 0.0 {
                let buf = &mut self.momentum_buffers[i];
                *buf = &*buf * self.momentum + &d_p * (1.0 - self.dampening);
                let update = if self.nesterov {
                    &d_p + &(&*buf * self.momentum)
                } else {
                    buf.clone()
                };
                *param -= &(&update * self.learning_rate);
            } else {
                *param -= &(&d_p * self.learning_rate);
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }

    fn reset(&mut self) {
        for buf in &mut self.momentum_buffers {
            buf.fill(0.0);
        }
    }
}

/// Adam with bias correction. Weight decay is applied to the gradient
/// (the coupled, L2 form).
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    m_buffers: Vec<Array2<f32>>,
    v_buffers: Vec<Array2<f32>>,
    step_count: u64,
    initialized: bool,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
            m_buffers: Vec::new(),
            v_buffers: Vec::new(),
            step_count: 0,
            initialized: false,
        }
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    fn adam_step(
        &mut self,
        parameters: Vec<&mut Array2<f32>>,
        gradients: &[Array2<f32>],
        decoupled_decay: f32,
    ) -> Result<(), HgnnError> {
        if !self.initialized {
            return Err(HgnnError::TrainingError(
                "optimizer not initialized".to_string(),
            ));
        }
        check_aligned(&parameters, gradients, self.m_buffers.len())?;

        self.step_count += 1;
        let t = self.step_count as f32;
        let bias_correction1 = 1.0 - self.beta1.powf(t);
        let bias_correction2 = 1.0 - self.beta2.powf(t);

        for (i, (param, grad)) in parameters.into_iter().zip(gradients).enumerate() {
            if decoupled_decay != 0.0 {
                *param *= 1.0 - self.learning_rate * decoupled_decay;
            }
            let d_p = if self.weight_decay != 0.0 {
                grad + &(&*param * self.weight_decay)
            } else {
                grad.clone()
            };

            let m = &mut self.m_buffers[i];
            *m = &*m * self.beta1 + &d_p * (1.0 - self.beta1);
            let v = &mut self.v_buffers[i];
            *v = &*v * self.beta2 + &(&d_p * &d_p) * (1.0 - self.beta2);

            let m_hat = &self.m_buffers[i] / bias_correction1;
            let v_hat = &self.v_buffers[i] / bias_correction2;
            let update = m_hat / (v_hat.mapv(f32::sqrt) + self.epsilon);
            *param -= &(&update * self.learning_rate);
        }
        Ok(())
    }
}

impl Optimizer for Adam {
    fn initialize(&mut self, shapes: &[(usize, usize)]) -> Result<(), HgnnError> {
        self.m_buffers = shapes.iter().map(|&s| Array2::zeros(s)).collect();
        self.v_buffers = shapes.iter().map(|&s| Array2::zeros(s)).collect();
        self.step_count = 0;
        self.initialized = true;
        Ok(())
    }

    fn step(
        &mut self,
        parameters: Vec<&mut Array2<f32>>,
        gradients: &[Array2<f32>],
    ) -> Result<(), HgnnError> {
        self.adam_step(parameters, gradients, 0.0)
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }

    fn reset(&mut self) {
        for buf in self.m_buffers.iter_mut().chain(self.v_buffers.iter_mut()) {
            buf.fill(0.0);
        }
        self.step_count = 0;
    }
}

/// AdamW: Adam with decoupled weight decay applied directly to the
/// parameters before the adaptive update.
pub struct AdamW {
    inner: Adam,
    weight_decay: f32,
}

impl AdamW {
    pub fn new(learning_rate: f32, weight_decay: f32) -> Self {
        Self {
            inner: Adam::new(learning_rate),
            weight_decay,
        }
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.inner = self.inner.with_betas(beta1, beta2);
        self
    }
}

impl Optimizer for AdamW {
    fn initialize(&mut self, shapes: &[(usize, usize)]) -> Result<(), HgnnError> {
        self.inner.initialize(shapes)
    }

    fn step(
        &mut self,
        parameters: Vec<&mut Array2<f32>>,
        gradients: &[Array2<f32>],
    ) -> Result<(), HgnnError> {
        self.inner.adam_step(parameters, gradients, self.weight_decay)
    }

    fn learning_rate(&self) -> f32 {
        self.inner.learning_rate()
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.inner.set_learning_rate(lr);
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Optimizer selection, as exposed through the flow configuration.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerKind {
    Adam,
    AdamW,
    Sgd { momentum: f32 },
}

pub fn build_optimizer(kind: OptimizerKind, lr: f32, weight_decay: f32) -> Box<dyn Optimizer> {
    match kind {
        OptimizerKind::Adam => Box::new(Adam::new(lr).with_weight_decay(weight_decay)),
        OptimizerKind::AdamW => Box::new(AdamW::new(lr, weight_decay)),
        OptimizerKind::Sgd { momentum } => {
            Box::new(Sgd::new(lr, momentum).with_weight_decay(weight_decay))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn quadratic_grad(param: &Array2<f32>) -> Array2<f32> {
        // gradient of 0.5 * ||param||^2
        param.clone()
    }

    #[test]
    fn sgd_descends_a_quadratic() {
        let mut param = array![[2.0f32, -3.0], [1.5, 0.5]];
        let mut opt = Sgd::new(0.1, 0.0);
        opt.initialize(&[param.dim()]).unwrap();
        for _ in 0..50 {
            let grad = quadratic_grad(&param);
            opt.step(vec![&mut param], &[grad]).unwrap();
        }
        assert!(param.iter().all(|v| v.abs() < 0.1));
    }

    #[test]
    fn adam_descends_a_quadratic() {
        let mut param = array![[2.0f32, -3.0]];
        let mut opt = Adam::new(0.1);
        opt.initialize(&[param.dim()]).unwrap();
        for _ in 0..200 {
            let grad = quadratic_grad(&param);
            opt.step(vec![&mut param], &[grad]).unwrap();
        }
        assert!(param.iter().all(|v| v.abs() < 0.1));
    }

    #[test]
    fn adamw_decays_parameters_without_gradient() {
        let mut param = array![[1.0f32]];
        let mut opt = AdamW::new(0.1, 0.5);
        opt.initialize(&[param.dim()]).unwrap();
        let zero_grad = Array2::<f32>::zeros((1, 1));
        opt.step(vec![&mut param], &[zero_grad]).unwrap();
        assert!(param[[0, 0]] < 1.0);
    }

    #[test]
    fn uninitialized_step_is_an_error() {
        let mut param = array![[1.0f32]];
        let grad = param.clone();
        let mut opt = Adam::new(0.1);
        assert!(opt.step(vec![&mut param], &[grad]).is_err());
    }

    #[test]
    fn misaligned_gradients_are_an_error() {
        let mut param = array![[1.0f32]];
        let mut opt = Sgd::new(0.1, 0.9);
        opt.initialize(&[param.dim()]).unwrap();
        assert!(opt.step(vec![&mut param], &[]).is_err());
    }

    #[test]
    fn momentum_buffers_reset_to_zero() {
        let mut param = array![[1.0f32, 2.0]];
        let mut opt = Sgd::new(0.1, 0.9);
        opt.initialize(&[param.dim()]).unwrap();
        let grad = param.clone();
        opt.step(vec![&mut param], &[grad]).unwrap();
        opt.reset();
        assert!(opt.momentum_buffers[0].iter().all(|&v| v == 0.0));
    }
}
