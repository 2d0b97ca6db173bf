use posepipe_core::capabilities::FEATURE_LEVEL_5;
use posepipe_core::{Result, SyncFence};
use posepipe_gpu::SharedBufferHandle;

use crate::layout::{ExecutionLayout, MemoryPreference};

/// What an accelerator can do beyond plain synchronous execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceleratorCapabilities {
    /// Executions can start on a sync fence dependency.
    pub sync_fence: bool,
    /// A persistent low-overhead burst context is available.
    pub burst: bool,
    /// An execution can be computed more than once.
    pub reusable_execution: bool,
    /// Preferred alignment and padding can be queried.
    pub memory_preferences: bool,
}

impl AcceleratorCapabilities {
    /// Everything beyond synchronous execution arrived together at feature
    /// level 5. Burst exists earlier but is only worth using from there on.
    pub fn for_feature_level(feature_level: i64) -> Self {
        let modern = feature_level >= FEATURE_LEVEL_5;
        Self {
            sync_fence: modern,
            burst: modern,
            reusable_execution: modern,
            memory_preferences: modern,
        }
    }

    /// Synchronous execution only.
    pub fn baseline() -> Self {
        Self::for_feature_level(0)
    }
}

/// Fixed memory an execution reads from and writes to.
#[derive(Debug, Clone)]
pub struct ExecutionBindings {
    pub input: SharedBufferHandle,
    /// Bytes of `input` the execution may read, padding included.
    pub input_len: usize,
    pub output: SharedBufferHandle,
    pub layout: ExecutionLayout,
}

/// A neural-network accelerator runtime.
///
/// Mirrors the platform accelerator API: a model blob is compiled once,
/// executions are bound to fixed input/output memory, and each execution is
/// computed synchronously, through a burst context, or asynchronously after
/// a fence dependency.
pub trait AcceleratorBackend: Send {
    type Compiled: Send;
    type Execution: Send;
    type Burst: Send;
    /// Completion of a fenced execution.
    type Event: Send;

    fn name(&self) -> &'static str;

    fn capabilities(&self) -> AcceleratorCapabilities;

    fn compile(&mut self, model: &[u8]) -> Result<Self::Compiled>;

    /// Preferred padding for input `index`. Only queried when
    /// [`AcceleratorCapabilities::memory_preferences`] is set.
    fn input_padding(&self, compiled: &Self::Compiled, index: usize) -> Result<usize>;

    /// Preferred placement for output `index`. Only queried when
    /// [`AcceleratorCapabilities::memory_preferences`] is set.
    fn output_preference(&self, compiled: &Self::Compiled, index: usize)
        -> Result<MemoryPreference>;

    fn create_burst(&mut self, compiled: &Self::Compiled) -> Result<Self::Burst>;

    /// Bind a new execution to `bindings`. A non-reusable execution can be
    /// computed once.
    fn create_execution(
        &mut self,
        compiled: &Self::Compiled,
        bindings: &ExecutionBindings,
        reusable: bool,
    ) -> Result<Self::Execution>;

    fn compute(&mut self, execution: &mut Self::Execution) -> Result<()>;

    fn burst_compute(&mut self, execution: &mut Self::Execution, burst: &mut Self::Burst)
        -> Result<()>;

    /// Start `execution` once `dependency` fires. Returns without waiting.
    fn start_compute_with_dependency(
        &mut self,
        execution: &mut Self::Execution,
        dependency: SyncFence,
    ) -> Result<Self::Event>;

    /// Block until a fenced execution completes.
    fn wait(&mut self, event: Self::Event) -> Result<()>;
}
