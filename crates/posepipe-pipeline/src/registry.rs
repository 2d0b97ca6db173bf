use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use posepipe_core::{PlatformCapabilities, PoseError, PoseResult, Result, TextureTransform};
use posepipe_gpu::CameraImage;
use posepipe_nn::ModelAssetProvider;

use crate::config::PoseEstimationConfig;
use crate::estimator::PoseEstimator;

/// Opaque reference to a pipeline owned by a [`PipelineRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineHandle(u64);

impl PipelineHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Owns pipelines on behalf of callers that can only hold integers.
///
/// Handles are never reused. A pipeline that returned an error from
/// `estimate` should be destroyed; it is not retried.
///
/// Each pipeline has its own lock. The map lock is only held to look a
/// handle up, so frames on different pipelines run concurrently and
/// create/destroy never wait for a frame.
pub struct PipelineRegistry {
    capabilities: PlatformCapabilities,
    pipelines: Mutex<HashMap<u64, Arc<Mutex<PoseEstimator>>>>,
    next_handle: AtomicU64,
}

impl PipelineRegistry {
    pub fn new(capabilities: PlatformCapabilities) -> Self {
        Self {
            capabilities,
            pipelines: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    pub fn create_pipeline(
        &self,
        config: &PoseEstimationConfig,
        model: &dyn ModelAssetProvider,
        transform: TextureTransform,
    ) -> Result<PipelineHandle> {
        let estimator = PoseEstimator::build(config, self.capabilities, model, transform)?;
        Ok(self.insert(estimator))
    }

    /// Take ownership of an already-built pipeline.
    pub fn insert(&self, estimator: PoseEstimator) -> PipelineHandle {
        let handle = PipelineHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.pipelines
            .lock()
            .insert(handle.0, Arc::new(Mutex::new(estimator)));
        tracing::debug!(handle = handle.0, "pipeline registered");
        handle
    }

    pub fn estimate(&self, handle: PipelineHandle, image: &CameraImage) -> Result<PoseResult> {
        let estimator = self
            .pipelines
            .lock()
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| unknown(handle))?;
        let mut estimator = estimator.lock();
        estimator.estimate(image)
    }

    pub fn destroy_pipeline(&self, handle: PipelineHandle) -> Result<()> {
        let removed = self.pipelines.lock().remove(&handle.0);
        match removed {
            Some(estimator) => {
                // A frame still running on this pipeline keeps it alive until
                // it returns; teardown joins worker threads outside the map lock.
                tracing::debug!(
                    handle = handle.0,
                    in_flight = Arc::strong_count(&estimator) > 1,
                    "pipeline destroyed"
                );
                drop(estimator);
                Ok(())
            }
            None => Err(unknown(handle)),
        }
    }

    pub fn len(&self) -> usize {
        self.pipelines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn unknown(handle: PipelineHandle) -> PoseError {
    PoseError::Contract(format!("unknown pipeline handle {}", handle.0))
}
