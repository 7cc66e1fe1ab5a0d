//! Error types shared across the zen-hgnn training flows.

/// Errors produced by graph construction, batch sampling, and the training
/// and evaluation flows.
#[derive(Debug, thiserror::Error)]
pub enum HgnnError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    #[error("Device placement failed: {0}")]
    DeviceError(String),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "serde")]
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
