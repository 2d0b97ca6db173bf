use std::ops::Range;

use parking_lot::MappedRwLockReadGuard;

use posepipe_core::{
    PoseError, Result, SyncFence, HEATMAP_LEN, HEATMAP_OUTPUT_INDEX, MODEL_INPUT_BYTES,
    OFFSETS_LEN, OFFSETS_OUTPUT_INDEX, OUTPUT_TENSOR_BYTES,
};
use posepipe_gpu::{BufferUsage, SharedBuffer, SharedBufferAllocator, SharedBufferHandle};

use crate::backend::{AcceleratorBackend, AcceleratorCapabilities, ExecutionBindings};
use crate::layout::{round_up, ExecutionLayout, MemoryPreference};

/// How one inference run was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionTier {
    /// Started on the compute fence; only the execution's own event was waited on.
    Fenced,
    Burst,
    Sync,
}

/// CPU view of the heatmap and offsets tensors after a run.
pub struct OutputTensors<'a> {
    region: MappedRwLockReadGuard<'a, [f32]>,
    heatmap: Range<usize>,
    offsets: Range<usize>,
}

impl OutputTensors<'_> {
    /// `[9, 9, 17]` keypoint logits.
    pub fn heatmap(&self) -> &[f32] {
        &self.region[self.heatmap.clone()]
    }

    /// `[9, 9, 34]`: 17 y offsets then 17 x offsets per cell, in pixels.
    pub fn offsets(&self) -> &[f32] {
        &self.region[self.offsets.clone()]
    }
}

/// Object-safe view of an inference stage, used by the orchestrator.
pub trait InferencePass: Send {
    fn name(&self) -> &'static str;

    /// Bytes the accelerator wants for the input tensor, padding included.
    fn required_input_size(&self) -> usize;

    /// Bind the shared input buffer. Must be called exactly once.
    fn set_input(&mut self, input: SharedBufferHandle) -> Result<()>;

    fn supports_sync_fence(&self) -> bool;

    /// Execute once. `signal` is either empty (input ready) or fires when the
    /// input has been written. Returns after all outputs are written.
    fn run(&mut self, signal: SyncFence) -> Result<ExecutionTier>;

    fn outputs(&self) -> Result<OutputTensors<'_>>;
}

pub struct InferenceStage<A: AcceleratorBackend> {
    accelerator: A,
    capabilities: AcceleratorCapabilities,
    compiled: A::Compiled,
    input_size: usize,
    layout: ExecutionLayout,
    output: SharedBuffer,
    input: Option<SharedBufferHandle>,
    burst: Option<A::Burst>,
    execution: Option<A::Execution>,
    runs: u64,
}

impl<A: AcceleratorBackend> InferenceStage<A> {
    /// Compile `model`, plan the memory layout and allocate the output buffer.
    pub fn new(
        mut accelerator: A,
        allocator: &dyn SharedBufferAllocator,
        model: &[u8],
    ) -> Result<Self> {
        let capabilities = accelerator.capabilities();
        let compiled = accelerator.compile(model)?;

        // Single input at offset 0, so only its padding matters.
        let input_padding = if capabilities.memory_preferences {
            accelerator.input_padding(&compiled, 0)?
        } else {
            1
        };
        let input_size = round_up(MODEL_INPUT_BYTES, input_padding)?;

        let layout = ExecutionLayout::plan(&OUTPUT_TENSOR_BYTES, |index| {
            if capabilities.memory_preferences {
                accelerator.output_preference(&compiled, index)
            } else {
                Ok(MemoryPreference::default())
            }
        })?;

        let mut output = allocator.allocate(layout.total_size(), BufferUsage::CPU_READ_OFTEN)?;
        output.lock()?;

        let burst = if capabilities.burst {
            Some(accelerator.create_burst(&compiled)?)
        } else {
            None
        };

        tracing::info!(
            accelerator = accelerator.name(),
            input_size,
            output_size = layout.total_size(),
            fence = capabilities.sync_fence,
            burst = burst.is_some(),
            reusable = capabilities.reusable_execution,
            "inference stage created"
        );

        Ok(Self {
            accelerator,
            capabilities,
            compiled,
            input_size,
            layout,
            output,
            input: None,
            burst,
            execution: None,
            runs: 0,
        })
    }

    pub fn layout(&self) -> &ExecutionLayout {
        &self.layout
    }

    pub fn accelerator(&self) -> &A {
        &self.accelerator
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Reusable executions are built once; otherwise a fresh one per run.
    fn prepare_execution(&mut self) -> Result<()> {
        if self.capabilities.reusable_execution && self.execution.is_some() {
            return Ok(());
        }
        let input = self.input.clone().ok_or_else(|| {
            PoseError::Contract("inference run before input buffer was bound".into())
        })?;
        let bindings = ExecutionBindings {
            input,
            input_len: self.input_size,
            output: self.output.handle(),
            layout: self.layout.clone(),
        };
        let execution = self.accelerator.create_execution(
            &self.compiled,
            &bindings,
            self.capabilities.reusable_execution,
        )?;
        self.execution = Some(execution);
        Ok(())
    }
}

impl<A: AcceleratorBackend> InferencePass for InferenceStage<A> {
    fn name(&self) -> &'static str {
        self.accelerator.name()
    }

    fn required_input_size(&self) -> usize {
        self.input_size
    }

    fn set_input(&mut self, input: SharedBufferHandle) -> Result<()> {
        if self.input.is_some() {
            return Err(PoseError::Contract("inference input already bound".into()));
        }
        if input.size() < self.input_size {
            return Err(PoseError::InvalidInput(format!(
                "input buffer of {} bytes is smaller than the required {}",
                input.size(),
                self.input_size
            )));
        }
        tracing::debug!(buffer = input.id(), "inference input bound");
        self.input = Some(input);
        Ok(())
    }

    fn supports_sync_fence(&self) -> bool {
        self.capabilities.sync_fence
    }

    fn run(&mut self, signal: SyncFence) -> Result<ExecutionTier> {
        self.prepare_execution()?;
        let Some(execution) = self.execution.as_mut() else {
            return Err(PoseError::Contract("no execution prepared".into()));
        };

        let tier = if signal.is_valid() && self.capabilities.sync_fence {
            let event = self
                .accelerator
                .start_compute_with_dependency(execution, signal)?;
            self.accelerator.wait(event)?;
            ExecutionTier::Fenced
        } else {
            if signal.is_valid() {
                tracing::debug!("accelerator cannot depend on fences, waiting on the CPU");
                signal.wait()?;
            }
            match self.burst.as_mut() {
                Some(burst) => {
                    self.accelerator.burst_compute(execution, burst)?;
                    ExecutionTier::Burst
                }
                None => {
                    self.accelerator.compute(execution)?;
                    ExecutionTier::Sync
                }
            }
        };

        self.runs += 1;
        tracing::trace!(run = self.runs, ?tier, "inference complete");
        Ok(tier)
    }

    fn outputs(&self) -> Result<OutputTensors<'_>> {
        let missing = |index| PoseError::Contract(format!("layout has no output {index}"));
        let heatmap = self
            .layout
            .output(HEATMAP_OUTPUT_INDEX)
            .ok_or_else(|| missing(HEATMAP_OUTPUT_INDEX))?;
        let offsets = self
            .layout
            .output(OFFSETS_OUTPUT_INDEX)
            .ok_or_else(|| missing(OFFSETS_OUTPUT_INDEX))?;

        const F32: usize = std::mem::size_of::<f32>();
        let region = self.output.read::<f32>(0, self.layout.total_size() / F32)?;
        let heatmap_start = heatmap.offset / F32;
        let offsets_start = offsets.offset / F32;
        Ok(OutputTensors {
            region,
            heatmap: heatmap_start..heatmap_start + HEATMAP_LEN,
            offsets: offsets_start..offsets_start + OFFSETS_LEN,
        })
    }
}
