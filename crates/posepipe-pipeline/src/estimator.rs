use std::time::Duration;

use parking_lot::MappedRwLockReadGuard;

use posepipe_compute::{ComputePass, ComputeStage, SoftwareConfig, SoftwareDevice};
use posepipe_core::{
    Clock, MonotonicClock, PlatformCapabilities, PoseResult, Result, TextureTransform, TimingInfo,
    MODEL_INPUT_LEN,
};
use posepipe_decode::KeypointDecoder;
use posepipe_gpu::{BufferUsage, CameraImage, HostAllocator, SharedBuffer, SharedBufferAllocator};
use posepipe_nn::{
    ExecutionTier, HostAccelerator, HostConfig, InferencePass, InferenceStage, MemoryPreference,
    ModelAssetProvider,
};

use crate::config::{MlExecutor, PoseEstimationConfig, Renderer};

/// One pose-estimation pipeline: compute pass, inference pass and keypoint
/// decoding over a single shared intermediate buffer.
///
/// The compute stage writes the model input tensor into the intermediate
/// buffer and the inference stage reads it from there, so a frame never
/// crosses the CPU between the two. When the accelerator can depend on a
/// completion signal, the compute stage returns one instead of blocking.
pub struct PoseEstimator {
    // Stages drop first: their queues are drained before the buffer goes.
    compute: Box<dyn ComputePass>,
    inference: Box<dyn InferencePass>,
    intermediate: SharedBuffer,
    decoder: KeypointDecoder,
    clock: Box<dyn Clock>,
    last_tier: Option<ExecutionTier>,
    frames: u64,
}

impl PoseEstimator {
    /// Build a pipeline from configuration, selecting the concrete backends.
    pub fn build(
        config: &PoseEstimationConfig,
        capabilities: PlatformCapabilities,
        model: &dyn ModelAssetProvider,
        transform: TextureTransform,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            renderer = ?config.renderer,
            ml_executor = ?config.ml_executor,
            model = %model.describe(),
            "building pose pipeline"
        );

        let capabilities = match config.accelerator_feature_level {
            Some(level) => capabilities.with_feature_level(level),
            None => capabilities,
        };

        let allocator = HostAllocator::new();
        let compute = compute_stage(config, capabilities, transform)?;
        let inference = inference_stage(config, capabilities, model, &allocator)?;
        Self::from_stages(compute, inference, &allocator)
    }

    /// Wire two already-constructed stages together through a freshly
    /// allocated intermediate buffer.
    pub fn from_stages(
        mut compute: Box<dyn ComputePass>,
        mut inference: Box<dyn InferencePass>,
        allocator: &dyn SharedBufferAllocator,
    ) -> Result<Self> {
        let size = inference.required_input_size();
        let mut intermediate = allocator.allocate(
            size,
            BufferUsage::GPU_DATA_BUFFER | BufferUsage::CPU_READ_OFTEN,
        )?;
        intermediate.lock()?;

        compute.set_output_target(intermediate.handle())?;
        inference.set_input(intermediate.handle())?;

        tracing::info!(
            compute = compute.name(),
            inference = inference.name(),
            intermediate_size = size,
            fence_chaining = compute.supports_fence_export() && inference.supports_sync_fence(),
            "pose pipeline ready"
        );

        Ok(Self {
            compute,
            inference,
            intermediate,
            decoder: KeypointDecoder::new(),
            clock: Box::new(MonotonicClock::new()),
            last_tier: None,
            frames: 0,
        })
    }

    /// Replace the clock used for stage timings.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one full pass over `image`.
    pub fn estimate(&mut self, image: &CameraImage) -> Result<PoseResult> {
        let request_fence = self.inference.supports_sync_fence();

        let t0 = self.clock.now();
        let signal = self.compute.run(image, request_fence)?;
        let t1 = self.clock.now();
        let fenced = signal.is_valid();
        let tier = self.inference.run(signal)?;
        let t2 = self.clock.now();

        let keypoints = {
            let outputs = self.inference.outputs()?;
            self.decoder.decode(outputs.heatmap(), outputs.offsets())?
        };

        let timing = TimingInfo {
            render_ms: millis(t1.saturating_sub(t0)),
            ml_ms: millis(t2.saturating_sub(t1)),
        };
        let result = PoseResult::new(keypoints, timing);

        self.frames += 1;
        self.last_tier = Some(tier);
        tracing::debug!(
            frame = self.frames,
            render_ms = timing.render_ms,
            ml_ms = timing.ml_ms,
            fenced,
            ?tier,
            score = result.score,
            "pose estimated"
        );
        Ok(result)
    }

    pub fn compute_name(&self) -> &'static str {
        self.compute.name()
    }

    pub fn inference_name(&self) -> &'static str {
        self.inference.name()
    }

    /// Whether compute output is handed to inference through a completion
    /// signal rather than a blocking wait.
    pub fn chains_fences(&self) -> bool {
        self.compute.supports_fence_export() && self.inference.supports_sync_fence()
    }

    /// Execution tier of the most recent pass.
    pub fn last_tier(&self) -> Option<ExecutionTier> {
        self.last_tier
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The model input tensor as last written by the compute stage.
    pub fn input_tensor(&self) -> Result<MappedRwLockReadGuard<'_, [f32]>> {
        self.intermediate.read::<f32>(0, MODEL_INPUT_LEN)
    }
}

fn millis(d: Duration) -> f32 {
    d.as_secs_f32() * 1000.0
}

fn compute_stage(
    config: &PoseEstimationConfig,
    capabilities: PlatformCapabilities,
    transform: TextureTransform,
) -> Result<Box<dyn ComputePass>> {
    let images = config.max_number_of_camera_images;
    if config.renderer == Renderer::Vulkan {
        if let Some(stage) = vulkan_stage(capabilities, transform, images)? {
            return Ok(stage);
        }
    }
    let device = SoftwareDevice::new(SoftwareConfig::default())?;
    Ok(Box::new(ComputeStage::new(
        device,
        capabilities,
        transform,
        images,
    )?))
}

#[cfg(feature = "wgpu")]
fn vulkan_stage(
    capabilities: PlatformCapabilities,
    transform: TextureTransform,
    images: usize,
) -> Result<Option<Box<dyn ComputePass>>> {
    match posepipe_compute::WgpuDevice::new() {
        Ok(device) => Ok(Some(Box::new(ComputeStage::new(
            device,
            capabilities,
            transform,
            images,
        )?))),
        Err(e) => {
            tracing::info!(reason = %e, "wgpu unavailable, falling back to software compute");
            Ok(None)
        }
    }
}

#[cfg(not(feature = "wgpu"))]
fn vulkan_stage(
    _capabilities: PlatformCapabilities,
    _transform: TextureTransform,
    _images: usize,
) -> Result<Option<Box<dyn ComputePass>>> {
    tracing::info!("built without the wgpu feature, using software compute");
    Ok(None)
}

fn inference_stage(
    config: &PoseEstimationConfig,
    capabilities: PlatformCapabilities,
    model: &dyn ModelAssetProvider,
    allocator: &dyn SharedBufferAllocator,
) -> Result<Box<dyn InferencePass>> {
    match config.ml_executor {
        MlExecutor::NativeNnapi => {
            let defaults = MemoryPreference::default();
            let host = HostConfig {
                preference: MemoryPreference {
                    alignment: config.input_alignment.unwrap_or(defaults.alignment),
                    padding: config.input_padding.unwrap_or(defaults.padding),
                },
                ..HostConfig::for_feature_level(capabilities.accelerator_feature_level)
            };
            let accelerator = HostAccelerator::new(model.graph_compiler(), host)?;
            let blob = model.model_blob()?;
            Ok(Box::new(InferenceStage::new(accelerator, allocator, &blob)?))
        }
    }
}
