use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use posepipe_core::{fence_pair, FenceSignaler, PoseError, Result, SyncFence, MODEL_INPUT_LEN};
use posepipe_gpu::{CameraImage, SharedBufferHandle};

use crate::backend::{DispatchParams, GraphicsBackend};
use crate::kernel::{self, FloatTexture};
use crate::workgroup::WorkGroupLimits;

/// Software device settings.
#[derive(Debug, Clone, Copy)]
pub struct SoftwareConfig {
    pub limits: WorkGroupLimits,
    /// Hand out completion signals instead of blocking in `dispatch`.
    pub fence_export: bool,
}

impl Default for SoftwareConfig {
    fn default() -> Self {
        Self {
            limits: WorkGroupLimits {
                max_size_x: 1024,
                max_size_y: 1024,
                max_invocations: 1024,
            },
            fence_export: true,
        }
    }
}

struct Job {
    work: Box<dyn FnOnce() -> Result<()> + Send>,
    signaler: FenceSignaler,
}

/// Graphics backend that runs the resampling kernel on the CPU.
///
/// Dispatches are executed in submission order on a dedicated queue thread,
/// which plays the role of the GPU queue. Completion is reported through a
/// pipe-backed [`SyncFence`]; a dispatch that fails drops its signaler, so
/// the waiter sees the signal as abandoned.
pub struct SoftwareDevice {
    config: SoftwareConfig,
    output: Option<SharedBufferHandle>,
    queue: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl SoftwareDevice {
    pub fn new(config: SoftwareConfig) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = std::thread::Builder::new()
            .name("posepipe-software-gpu".into())
            .spawn(move || {
                for job in rx {
                    match (job.work)() {
                        Ok(()) => {
                            if let Err(e) = job.signaler.signal() {
                                tracing::error!(error = %e, "failed to signal dispatch completion");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "software dispatch failed");
                        }
                    }
                }
                tracing::debug!("software queue drained");
            })?;

        tracing::info!(
            fence_export = config.fence_export,
            max_invocations = config.limits.max_invocations,
            "software graphics device ready"
        );

        Ok(Self {
            config,
            output: None,
            queue: Some(tx),
            worker: Some(worker),
        })
    }

    fn submit(&self, job: Job) -> Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| PoseError::Graphics("software queue already shut down".into()))?;
        queue
            .send(job)
            .map_err(|_| PoseError::Graphics("software queue thread exited".into()))
    }
}

impl GraphicsBackend for SoftwareDevice {
    type View = Arc<FloatTexture>;

    fn name(&self) -> &'static str {
        "software"
    }

    fn work_group_limits(&self) -> WorkGroupLimits {
        self.config.limits
    }

    fn supports_fence_export(&self) -> bool {
        self.config.fence_export
    }

    fn bind_output(&mut self, target: SharedBufferHandle) -> Result<()> {
        tracing::debug!(buffer = target.id(), size = target.size(), "software output bound");
        self.output = Some(target);
        Ok(())
    }

    fn import_image(&mut self, image: &CameraImage) -> Result<Self::View> {
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            "imported camera image"
        );
        Ok(Arc::new(FloatTexture::new(image.width(), image.height())))
    }

    fn update_view(&mut self, view: &mut Self::View, image: &CameraImage) -> Result<()> {
        let fits = view.width() == image.width() as usize
            && view.height() == image.height() as usize;
        if fits {
            if let Some(texture) = Arc::get_mut(view) {
                texture.write_rgba8(image.pixels());
                return Ok(());
            }
        }
        // Still shared with a queued dispatch, or the buffer changed shape.
        *view = Arc::new(FloatTexture::from_rgba8(
            image.width(),
            image.height(),
            image.pixels(),
        ));
        Ok(())
    }

    fn dispatch(&mut self, view: &Self::View, params: &DispatchParams) -> Result<SyncFence> {
        let output = self
            .output
            .clone()
            .ok_or_else(|| PoseError::Contract("dispatch before output bind".into()))?;
        let texture = Arc::clone(view);
        let params = *params;

        let (signaler, fence) = fence_pair()?;
        self.submit(Job {
            work: Box::new(move || {
                let mut tensor = output.write::<f32>(0, MODEL_INPUT_LEN)?;
                kernel::dispatch(
                    &texture,
                    &params.transform,
                    params.work_group_size,
                    params.group_count,
                    &mut tensor,
                );
                Ok(())
            }),
            signaler,
        })?;

        if params.export_fence {
            tracing::trace!(fd = ?fence.raw_fd(), "exported dispatch fence");
            Ok(fence)
        } else {
            fence.wait()?;
            Ok(SyncFence::none())
        }
    }
}

impl Drop for SoftwareDevice {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish queued jobs and exit.
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("software queue thread panicked");
            }
        }
    }
}
