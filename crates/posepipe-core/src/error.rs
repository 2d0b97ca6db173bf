use thiserror::Error;

/// Top-level error type for the posepipe pipeline.
///
/// Backend failures are not retried anywhere in the pipeline. A stage that
/// returns one of these has left its owner in an unusable state, and the
/// caller is expected to drop the pipeline.
#[derive(Debug, Error)]
pub enum PoseError {
    #[error("graphics backend error: {0}")]
    Graphics(String),

    #[error("accelerator error: {0}")]
    Accelerator(String),

    #[error("shared buffer allocation failed: requested {requested} bytes")]
    Allocation { requested: usize },

    #[error("contract violation: {0}")]
    Contract(String),

    #[error("model loading error: {0}")]
    ModelLoad(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PoseError>;
