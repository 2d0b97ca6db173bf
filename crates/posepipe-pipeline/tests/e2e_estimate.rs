//! End-to-end tests: one full pass through compute, inference and decode.
//!
//! The accelerator runs a spike graph with a known heatmap, so the decoded
//! keypoints are exact and the tests only depend on how the stages are wired.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use posepipe_compute::ComputePass;
use posepipe_core::capabilities::{FEATURE_LEVEL_4, FEATURE_LEVEL_5};
use posepipe_core::{
    fence_pair, BodyPart, ManualClock, PlatformCapabilities, PoseError, Result, SyncFence,
    TextureTransform, DISPLACEMENTS_LEN, HEATMAP_LEN, HEATMAP_SIZE, MODEL_INPUT_LEN,
    NUM_KEYPOINTS, OFFSETS_LEN,
};
use posepipe_decode::sigmoid;
use posepipe_gpu::{CameraImage, HostAllocator, SharedBufferHandle};
use posepipe_nn::{
    BuiltinModel, CompiledGraph, ExecutionTier, FileModel, GraphCompiler, HostAccelerator,
    HostConfig, InferenceStage, ModelAssetProvider,
};
use posepipe_pipeline::{PoseEstimationConfig, PoseEstimator, Renderer};

const OUTPUT_LENS: [usize; 4] = [DISPLACEMENTS_LEN, DISPLACEMENTS_LEN, HEATMAP_LEN, OFFSETS_LEN];
const SPIKE: f32 = 10.0;

/// Heatmap of zeros with a single spike at cell (4, 4) for keypoint 0.
/// All offsets are zero.
struct SpikeGraph;

impl CompiledGraph for SpikeGraph {
    fn input_len(&self) -> usize {
        MODEL_INPUT_LEN
    }

    fn output_lens(&self) -> &[usize] {
        &OUTPUT_LENS
    }

    fn run(&self, _input: &[f32], outputs: &mut [&mut [f32]]) -> Result<()> {
        for out in outputs.iter_mut() {
            out.fill(0.0);
        }
        outputs[2][(4 * HEATMAP_SIZE + 4) * NUM_KEYPOINTS] = SPIKE;
        Ok(())
    }
}

struct SpikeCompiler;

impl GraphCompiler for SpikeCompiler {
    fn name(&self) -> &'static str {
        "spike"
    }

    fn compile(&self, _model: &[u8]) -> Result<Arc<dyn CompiledGraph>> {
        Ok(Arc::new(SpikeGraph))
    }
}

struct SpikeModel;

impl ModelAssetProvider for SpikeModel {
    fn model_blob(&self) -> Result<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(b"spike"))
    }

    fn graph_compiler(&self) -> Box<dyn GraphCompiler> {
        Box::new(SpikeCompiler)
    }

    fn describe(&self) -> String {
        "spike test graph".into()
    }
}

fn gray_frame() -> CameraImage {
    CameraImage::solid(257, 257, [128, 128, 128, 255]).unwrap()
}

fn software_config() -> PoseEstimationConfig {
    PoseEstimationConfig {
        renderer: Renderer::Gles,
        ..PoseEstimationConfig::default()
    }
}

fn assert_spike_pose(keypoints: &[posepipe_core::Keypoint]) {
    let nose = keypoints[BodyPart::Nose.index()];
    assert!((nose.x - 0.5).abs() < 1e-6, "x = {}", nose.x);
    assert!((nose.y - 0.5).abs() < 1e-6, "y = {}", nose.y);
    assert!((nose.score - sigmoid(SPIKE)).abs() < 1e-6);
    assert!((nose.score - 0.99995).abs() < 1e-4);

    // Flat planes resolve to the first cell.
    for k in &keypoints[1..] {
        assert_eq!((k.x, k.y), (0.0, 0.0));
        assert!((k.score - 0.5).abs() < 1e-6);
    }
}

#[test]
fn test_spike_on_gray_frame() {
    let mut estimator = PoseEstimator::build(
        &software_config(),
        PlatformCapabilities::host(),
        &SpikeModel,
        TextureTransform::identity(),
    )
    .unwrap();

    let pose = estimator.estimate(&gray_frame()).unwrap();
    assert_eq!(pose.keypoints.len(), NUM_KEYPOINTS);
    assert_spike_pose(&pose.keypoints);

    // The compute stage wrote the normalized gray into the shared buffer.
    let expected = 128.0 / 255.0 * 2.0 - 1.0;
    let tensor = estimator.input_tensor().unwrap();
    assert!(tensor.iter().all(|v| (v - expected).abs() < 1e-5));
}

#[test]
fn test_host_capabilities_chain_fences() {
    let mut estimator = PoseEstimator::build(
        &software_config(),
        PlatformCapabilities::host(),
        &SpikeModel,
        TextureTransform::identity(),
    )
    .unwrap();
    assert!(estimator.chains_fences());

    for _ in 0..3 {
        let pose = estimator.estimate(&gray_frame()).unwrap();
        assert_spike_pose(&pose.keypoints);
        assert_eq!(estimator.last_tier(), Some(ExecutionTier::Fenced));
    }
    assert_eq!(estimator.frames(), 3);
}

#[test]
fn test_feature_level_override_falls_back_to_sync() {
    let config = PoseEstimationConfig {
        accelerator_feature_level: Some(FEATURE_LEVEL_4),
        ..software_config()
    };
    let mut estimator = PoseEstimator::build(
        &config,
        PlatformCapabilities::host(),
        &SpikeModel,
        TextureTransform::identity(),
    )
    .unwrap();
    assert!(!estimator.chains_fences());

    let pose = estimator.estimate(&gray_frame()).unwrap();
    assert_spike_pose(&pose.keypoints);
    assert_eq!(estimator.last_tier(), Some(ExecutionTier::Sync));
}

#[test]
fn test_padded_layout_decodes_the_same() {
    let config = PoseEstimationConfig {
        input_alignment: Some(64),
        input_padding: Some(32),
        ..software_config()
    };
    let mut estimator = PoseEstimator::build(
        &config,
        PlatformCapabilities::host(),
        &SpikeModel,
        TextureTransform::identity(),
    )
    .unwrap();
    let pose = estimator.estimate(&gray_frame()).unwrap();
    assert_spike_pose(&pose.keypoints);
}

/// Compute stub standing in for a GPU: blocking costs `gpu_time` on the
/// shared clock, exporting a signal costs nothing on the calling thread.
struct ClockedCompute {
    clock: ManualClock,
    gpu_time: Duration,
    fence_export: bool,
    requests: Arc<Mutex<Vec<bool>>>,
    target: Option<SharedBufferHandle>,
}

impl ComputePass for ClockedCompute {
    fn name(&self) -> &'static str {
        "clocked"
    }

    fn set_output_target(&mut self, target: SharedBufferHandle) -> Result<()> {
        self.target = Some(target);
        Ok(())
    }

    fn run(&mut self, _image: &CameraImage, request_fence: bool) -> Result<SyncFence> {
        if self.target.is_none() {
            return Err(PoseError::Contract("no output target".into()));
        }
        self.requests.lock().push(request_fence);
        if request_fence && self.fence_export {
            let (signaler, fence) = fence_pair()?;
            signaler.signal()?;
            Ok(fence)
        } else {
            self.clock.advance(self.gpu_time);
            Ok(SyncFence::none())
        }
    }

    fn supports_fence_export(&self) -> bool {
        self.fence_export
    }
}

fn clocked_estimator(
    feature_level: i64,
    clock: &ManualClock,
) -> (PoseEstimator, Arc<Mutex<Vec<bool>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let compute = ClockedCompute {
        clock: clock.clone(),
        gpu_time: Duration::from_millis(12),
        fence_export: true,
        requests: Arc::clone(&requests),
        target: None,
    };

    let allocator = HostAllocator::new();
    let accelerator = HostAccelerator::new(
        Box::new(SpikeCompiler),
        HostConfig::for_feature_level(feature_level),
    )
    .unwrap();
    let inference = InferenceStage::new(accelerator, &allocator, b"spike").unwrap();

    let estimator = PoseEstimator::from_stages(Box::new(compute), Box::new(inference), &allocator)
        .unwrap()
        .with_clock(Box::new(clock.clone()));
    (estimator, requests)
}

#[test]
fn test_fence_unsupported_blocks_in_compute() {
    let clock = ManualClock::new();
    let (mut estimator, requests) = clocked_estimator(FEATURE_LEVEL_4, &clock);

    let pose = estimator.estimate(&gray_frame()).unwrap();

    // No fence was requested, so the compute stage blocked for the GPU.
    assert_eq!(requests.lock().as_slice(), &[false]);
    assert!((pose.timing.render_ms - 12.0).abs() < 1e-3);
    assert_eq!(pose.timing.ml_ms, 0.0);
    assert_eq!(estimator.last_tier(), Some(ExecutionTier::Sync));
    assert_spike_pose(&pose.keypoints);
}

#[test]
fn test_fence_supported_returns_without_blocking() {
    let clock = ManualClock::new();
    let (mut estimator, requests) = clocked_estimator(FEATURE_LEVEL_5, &clock);

    let pose = estimator.estimate(&gray_frame()).unwrap();

    assert_eq!(requests.lock().as_slice(), &[true]);
    assert_eq!(pose.timing.render_ms, 0.0);
    assert_eq!(estimator.last_tier(), Some(ExecutionTier::Fenced));
    assert_spike_pose(&pose.keypoints);
}

/// Dark 257x257 frame with a white 9x9 patch centred on pixel `(cx, cy)`.
fn patch_frame(cx: usize, cy: usize, buffer_id: u64) -> CameraImage {
    let mut pixels = vec![0u8; 257 * 257 * 4];
    for px in pixels.chunks_exact_mut(4) {
        px[3] = 255;
    }
    for y in cy - 4..=cy + 4 {
        for x in cx - 4..=cx + 4 {
            let i = (y * 257 + x) * 4;
            pixels[i..i + 3].fill(255);
        }
    }
    CameraImage::from_rgba(257, 257, pixels)
        .unwrap()
        .with_buffer_id(buffer_id)
}

fn builtin_estimator() -> PoseEstimator {
    PoseEstimator::build(
        &PoseEstimationConfig::default(),
        PlatformCapabilities::host(),
        &BuiltinModel,
        TextureTransform::identity(),
    )
    .unwrap()
}

fn assert_all_keypoints_near(keypoints: &[posepipe_core::Keypoint], x: f32, y: f32) {
    for k in keypoints {
        assert!((k.x - x).abs() < 0.02, "x = {}, expected {x}", k.x);
        assert!((k.y - y).abs() < 0.02, "y = {}, expected {y}", k.y);
    }
}

#[test]
fn test_builtin_model_finds_bright_patch() {
    // Pixel (x=160, y=96) is heatmap cell (row 3, col 5).
    let image = patch_frame(160, 96, 7);
    let mut estimator = builtin_estimator();

    for _ in 0..2 {
        let pose = estimator.estimate(&image).unwrap();
        assert_all_keypoints_near(&pose.keypoints, 5.0 / 8.0, 3.0 / 8.0);
    }
}

#[test]
fn test_recycled_camera_buffer_sees_new_frame() {
    // Both frames arrive on camera buffer 7 with the patch in different places.
    let first = patch_frame(160, 96, 7);
    let second = patch_frame(64, 192, 7);
    let mut estimator = builtin_estimator();

    let pose = estimator.estimate(&first).unwrap();
    assert_all_keypoints_near(&pose.keypoints, 5.0 / 8.0, 3.0 / 8.0);

    let pose = estimator.estimate(&second).unwrap();
    assert_all_keypoints_near(&pose.keypoints, 2.0 / 8.0, 6.0 / 8.0);
    {
        let tensor = estimator.input_tensor().unwrap();
        let at = |x: usize, y: usize| tensor[(y * 257 + x) * 3];
        assert!((at(64, 192) - 1.0).abs() < 1e-3);
        assert!((at(160, 96) + 1.0).abs() < 1e-3);
    }

    // And back again on the same buffer.
    let pose = estimator.estimate(&first).unwrap();
    assert_all_keypoints_near(&pose.keypoints, 5.0 / 8.0, 3.0 / 8.0);
}

#[test]
fn test_model_errors_propagate() {
    let missing = FileModel::new("/nonexistent/posepipe/model.bin");
    let result = PoseEstimator::build(
        &software_config(),
        PlatformCapabilities::host(),
        &missing,
        TextureTransform::identity(),
    );
    assert!(matches!(result, Err(PoseError::ModelLoad(_))));

    let invalid = PoseEstimationConfig {
        max_number_of_camera_images: 0,
        ..software_config()
    };
    let result = PoseEstimator::build(
        &invalid,
        PlatformCapabilities::host(),
        &BuiltinModel,
        TextureTransform::identity(),
    );
    assert!(matches!(result, Err(PoseError::Config(_))));
}
