use posepipe_core::{Result, SyncFence, TextureTransform};
use posepipe_gpu::{CameraImage, SharedBufferHandle};

use crate::workgroup::WorkGroupLimits;

/// Parameters for one dispatch of the resampling kernel.
#[derive(Debug, Clone, Copy)]
pub struct DispatchParams {
    pub work_group_size: u32,
    pub group_count: (u32, u32),
    pub transform: TextureTransform,
    /// Return a completion signal instead of blocking. Only set when the
    /// backend reported [`GraphicsBackend::supports_fence_export`].
    pub export_fence: bool,
}

/// A graphics API capable of running the resampling kernel.
///
/// The kernel maps output pixel `(x, y)` of the 257x257 tensor to
/// `(transform * vec4(x / 256, y / 256, 0, 1)).xy` in the camera image,
/// samples it with bilinear filtering and clamp-to-edge addressing, rescales
/// each channel from `[0, 1]` to `[-1, 1]` and writes RGB as three
/// consecutive `f32`s at `(y * 257 + x) * 3`.
pub trait GraphicsBackend: Send {
    /// Imported form of a camera buffer: its allocation and bindings.
    /// Expensive to build, so the compute stage caches it per input buffer.
    /// The pixel contents are not part of the cached state.
    type View: Send;

    fn name(&self) -> &'static str;

    fn work_group_limits(&self) -> WorkGroupLimits;

    /// Whether dispatches can return a completion signal without blocking.
    fn supports_fence_export(&self) -> bool;

    /// Bind the tensor output region. Called once.
    fn bind_output(&mut self, target: SharedBufferHandle) -> Result<()>;

    /// Build the view for a new camera buffer.
    fn import_image(&mut self, image: &CameraImage) -> Result<Self::View>;

    /// Make `view` show the frame's current pixels. Called before every
    /// dispatch, since a recycled camera buffer carries a new frame under
    /// the same identity.
    fn update_view(&mut self, view: &mut Self::View, image: &CameraImage) -> Result<()>;

    /// Run the kernel. With `params.export_fence` the call returns a valid
    /// signal immediately; otherwise it blocks until the output is written
    /// and returns the empty signal.
    fn dispatch(&mut self, view: &Self::View, params: &DispatchParams) -> Result<SyncFence>;
}
