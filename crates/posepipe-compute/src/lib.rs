//! Compute stage: converts a camera frame into the model's input tensor.
//!
//! The stage owns a [`GraphicsBackend`], picks the work-group size from the
//! backend's limits, caches imported camera images per buffer identity and
//! writes the 257x257x3 float tensor into a shared buffer bound by the
//! orchestrator.

pub mod backend;
pub mod kernel;
pub mod software;
#[cfg(feature = "wgpu")]
pub mod wgpu_device;
pub mod workgroup;

pub use backend::{DispatchParams, GraphicsBackend};
pub use software::{SoftwareConfig, SoftwareDevice};
#[cfg(feature = "wgpu")]
pub use wgpu_device::WgpuDevice;
pub use workgroup::{WorkGroupLimits, WorkGroupSize};

use posepipe_core::{
    PlatformCapabilities, PoseError, Result, SyncFence, TextureTransform, MODEL_INPUT_BYTES,
};
use posepipe_gpu::{CacheKey, CameraImage, DerivedCache, SharedBufferHandle};

/// Object-safe view of a compute stage, used by the orchestrator.
pub trait ComputePass: Send {
    fn name(&self) -> &'static str;

    /// Bind the tensor output region. Must be called exactly once, before
    /// the first [`ComputePass::run`].
    fn set_output_target(&mut self, target: SharedBufferHandle) -> Result<()>;

    /// Convert one frame. With `request_fence` and a backend that can export
    /// fences, returns a signal that fires when the tensor is written;
    /// otherwise blocks and returns the empty signal.
    fn run(&mut self, image: &CameraImage, request_fence: bool) -> Result<SyncFence>;

    fn supports_fence_export(&self) -> bool;
}

pub struct ComputeStage<B: GraphicsBackend> {
    backend: B,
    capabilities: PlatformCapabilities,
    transform: TextureTransform,
    work_group: WorkGroupSize,
    views: DerivedCache<B::View>,
    output_bound: bool,
    frames: u64,
}

impl<B: GraphicsBackend> ComputeStage<B> {
    /// `max_camera_images` is the expected number of distinct camera buffers
    /// and sizes the import cache.
    pub fn new(
        backend: B,
        capabilities: PlatformCapabilities,
        transform: TextureTransform,
        max_camera_images: usize,
    ) -> Result<Self> {
        let work_group = WorkGroupSize::choose(backend.work_group_limits())?;
        tracing::info!(
            backend = backend.name(),
            work_group = work_group.get(),
            fence_export = backend.supports_fence_export(),
            "compute stage created"
        );
        Ok(Self {
            backend,
            capabilities,
            transform,
            work_group,
            views: DerivedCache::new("camera-image", max_camera_images),
            output_bound: false,
            frames: 0,
        })
    }

    pub fn work_group_size(&self) -> WorkGroupSize {
        self.work_group
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Camera images imported so far, including transient ones.
    pub fn imports(&self) -> u64 {
        self.views.constructions()
    }

    pub fn cached_images(&self) -> usize {
        self.views.keyed_len()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl<B: GraphicsBackend> ComputePass for ComputeStage<B> {
    fn name(&self) -> &'static str {
        self.backend.name()
    }

    fn set_output_target(&mut self, target: SharedBufferHandle) -> Result<()> {
        if self.output_bound {
            return Err(PoseError::Contract(
                "compute output target already bound".into(),
            ));
        }
        if target.size() < MODEL_INPUT_BYTES {
            return Err(PoseError::InvalidInput(format!(
                "output target of {} bytes cannot hold the {MODEL_INPUT_BYTES}-byte input tensor",
                target.size()
            )));
        }
        self.backend.bind_output(target)?;
        self.output_bound = true;
        Ok(())
    }

    fn run(&mut self, image: &CameraImage, request_fence: bool) -> Result<SyncFence> {
        if !self.output_bound {
            return Err(PoseError::Contract(
                "compute stage run before output target was bound".into(),
            ));
        }

        let key = CacheKey::from_identity(image.stable_id(&self.capabilities));
        let backend = &mut self.backend;
        let view = self
            .views
            .get_or_create(key, || backend.import_image(image))?;
        backend.update_view(view, image)?;

        let params = DispatchParams {
            work_group_size: self.work_group.get(),
            group_count: self.work_group.group_count(),
            transform: self.transform,
            export_fence: request_fence && self.backend.supports_fence_export(),
        };
        let fence = self.backend.dispatch(view, &params)?;
        self.frames += 1;

        tracing::trace!(
            frame = self.frames,
            ?key,
            fenced = fence.is_valid(),
            "compute dispatched"
        );
        Ok(fence)
    }

    fn supports_fence_export(&self) -> bool {
        self.backend.supports_fence_export()
    }
}
