use thiserror::Error;

/// A result type for local experts operations
pub type Result<T> = std::result::Result<T, ExpertError>;

/// An error when configuring or running local experts
#[derive(Error, Debug)]
pub enum ExpertError {
    /// When the configuration is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// When the configuration differs from the one of a previous run in the same store
    #[error("Incompatible configuration with previous run at '{path}': {reason}")]
    IncompatibleConfig {
        /// dotted path of the first differing key
        path: String,
        /// difference description
        reason: String,
    },
    /// When a run cannot start
    #[error("Precondition failed: {0}")]
    PreconditionError(String),
    /// When a frame operation fails
    #[error(transparent)]
    FrameError(#[from] loxi_frame::FrameError),
    /// When a store operation fails
    #[error(transparent)]
    StoreError(#[from] loxi_store::StoreError),
    /// When a model operation fails
    #[error(transparent)]
    GpError(#[from] loxi_gp::GpError),
    /// When json (de)serialization fails
    #[error("Json error")]
    JsonError(#[from] serde_json::Error),
    /// When IO fails
    #[error("IO error")]
    IoError(#[from] std::io::Error),
}
