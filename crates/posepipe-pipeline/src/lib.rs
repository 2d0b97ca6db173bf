pub mod config;
pub mod estimator;
pub mod registry;

pub use config::{MlExecutor, PoseEstimationConfig, Renderer};
pub use estimator::PoseEstimator;
pub use registry::{PipelineHandle, PipelineRegistry};
