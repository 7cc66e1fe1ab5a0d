//! Validation-loss early stopping.

use crate::errors::HgnnError;
use crate::model::{HeteroModel, ModelSnapshot};

/// Stopper lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopState {
    Watching,
    Stopped,
}

/// Tracks the best validation loss seen so far, keeps a snapshot of the model
/// that achieved it, and signals termination once `patience` consecutive
/// non-improving observations have accumulated.
///
/// The best checkpoint is handed back through [`EarlyStopper::best_checkpoint`];
/// applying it to the model is the controller's explicit responsibility.
pub struct EarlyStopper {
    patience: u32,
    best_loss: f32,
    counter: u32,
    state: StopState,
    best: Option<ModelSnapshot>,
}

impl EarlyStopper {
    pub fn new(patience: u32) -> Result<Self, HgnnError> {
        if patience == 0 {
            return Err(HgnnError::InvalidConfiguration(
                "patience must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            patience,
            best_loss: f32::INFINITY,
            counter: 0,
            state: StopState::Watching,
            best: None,
        })
    }

    /// Feed one validation-loss observation. On strict improvement the
    /// counter resets and the current model is snapshotted; otherwise the
    /// counter advances and may trip the stop. Returns true once stopped.
    pub fn observe(&mut self, val_loss: f32, model: &dyn HeteroModel) -> bool {
        if val_loss < self.best_loss {
            self.best_loss = val_loss;
            self.counter = 0;
            self.best = Some(model.snapshot());
        } else {
            self.counter += 1;
            if self.counter >= self.patience {
                self.state = StopState::Stopped;
            }
        }
        self.state == StopState::Stopped
    }

    pub fn state(&self) -> StopState {
        self.state
    }

    pub fn best_loss(&self) -> f32 {
        self.best_loss
    }

    /// The snapshot saved at the best observation, if any observation
    /// improved on the initial `+inf`.
    pub fn best_checkpoint(&self) -> Option<&ModelSnapshot> {
        self.best.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FeatureDict;
    use crate::model::{HeteroModel, MetapathLinearModel};
    use ndarray::Array2;

    fn tiny_model() -> MetapathLinearModel {
        let mut features = FeatureDict::new();
        features.insert("paper".to_string(), Array2::<f32>::zeros((3, 2)));
        MetapathLinearModel::new("paper", vec!["pap".to_string()], features, 2, 0.0, 1).unwrap()
    }

    #[test]
    fn stops_after_patience_non_improving_epochs() {
        let mut model = tiny_model();
        let mut stopper = EarlyStopper::new(3).unwrap();

        assert!(!stopper.observe(5.0, &model));
        // mark the model so we can recognize the checkpoint saved at 4.0
        for param in model.parameters_mut() {
            param.fill(4.0);
        }
        assert!(!stopper.observe(4.0, &model));
        for param in model.parameters_mut() {
            param.fill(99.0);
        }
        assert!(!stopper.observe(4.2, &model));
        assert!(!stopper.observe(4.3, &model));
        assert!(stopper.observe(4.1, &model), "third non-improvement stops");

        assert_eq!(stopper.state(), StopState::Stopped);
        assert_eq!(stopper.best_loss(), 4.0);
        let saved = stopper.best_checkpoint().unwrap();
        assert!(saved.tensors()[0].iter().all(|&v| v == 4.0));
    }

    #[test]
    fn equal_loss_does_not_count_as_improvement() {
        let model = tiny_model();
        let mut stopper = EarlyStopper::new(2).unwrap();
        assert!(!stopper.observe(1.0, &model));
        assert!(!stopper.observe(1.0, &model));
        assert!(stopper.observe(1.0, &model));
    }

    #[test]
    fn zero_patience_is_rejected() {
        assert!(EarlyStopper::new(0).is_err());
    }
}
