use thiserror::Error;

/// A result type for local model operations
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when building, fitting or predicting with a local model
#[derive(Error, Debug)]
pub enum GpError {
    /// When LikelihoodComputation computation fails
    #[error("LikelihoodComputation computation error: {0}")]
    LikelihoodComputationError(String),
    #[error(transparent)]
    /// When linear algebra computation fails
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a value is invalid
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When a parameter name is not known by the model
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    /// When a model kind is not registered
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    /// When training data is missing or unusable
    #[error("Data error: {0}")]
    DataError(String),
    /// When a frame operation fails
    #[error(transparent)]
    FrameError(#[from] loxi_frame::FrameError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
}
