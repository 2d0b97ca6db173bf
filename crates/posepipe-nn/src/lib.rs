//! Inference stage: compiles the pose model, plans the output memory layout
//! and negotiates how each run is dispatched (fenced, burst or synchronous).

pub mod assets;
pub mod backend;
pub mod graph;
pub mod host;
pub mod layout;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod runtime;

pub use assets::{BuiltinModel, FileModel, ModelAssetProvider};
pub use backend::{AcceleratorBackend, AcceleratorCapabilities, ExecutionBindings};
pub use graph::{BuiltinCompiler, CompiledGraph, GraphCompiler, LuminanceGraph, LUMINANCE_MODEL};
pub use host::{HostAccelerator, HostConfig, HostStats};
pub use layout::{round_up, ExecutionLayout, MemoryPreference, TensorLayout};
#[cfg(feature = "onnx")]
pub use onnx::OnnxCompiler;
pub use runtime::{ExecutionTier, InferencePass, InferenceStage, OutputTensors};
