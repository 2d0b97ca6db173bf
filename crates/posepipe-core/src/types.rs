use serde::{Deserialize, Serialize};

/// Width of the tensor written by the compute stage (and read by the model).
pub const MODEL_INPUT_WIDTH: usize = 257;
/// Height of the tensor written by the compute stage.
pub const MODEL_INPUT_HEIGHT: usize = 257;
/// RGB, interleaved per pixel.
pub const MODEL_INPUT_CHANNELS: usize = 3;
/// Number of f32 elements in the model input tensor.
pub const MODEL_INPUT_LEN: usize = MODEL_INPUT_WIDTH * MODEL_INPUT_HEIGHT * MODEL_INPUT_CHANNELS;
/// Unpadded byte size of the model input tensor.
pub const MODEL_INPUT_BYTES: usize = MODEL_INPUT_LEN * std::mem::size_of::<f32>();

/// Side length of the square heatmap grid produced by the model.
pub const HEATMAP_SIZE: usize = 9;
pub const NUM_KEYPOINTS: usize = 17;
pub const NUM_DISPLACEMENTS: usize = 32;

pub const HEATMAP_LEN: usize = HEATMAP_SIZE * HEATMAP_SIZE * NUM_KEYPOINTS;
pub const OFFSETS_LEN: usize = HEATMAP_SIZE * HEATMAP_SIZE * NUM_KEYPOINTS * 2;
pub const DISPLACEMENTS_LEN: usize = HEATMAP_SIZE * HEATMAP_SIZE * NUM_DISPLACEMENTS;

/// Byte sizes of the four model outputs, in output-index order:
/// forward displacements, backward displacements, heatmap, offsets.
pub const OUTPUT_TENSOR_BYTES: [usize; 4] = [
    DISPLACEMENTS_LEN * 4,
    DISPLACEMENTS_LEN * 4,
    HEATMAP_LEN * 4,
    OFFSETS_LEN * 4,
];
pub const HEATMAP_OUTPUT_INDEX: usize = 2;
pub const OFFSETS_OUTPUT_INDEX: usize = 3;

/// Keypoints scoring below this are treated as not visible.
pub const KEYPOINT_SCORE_THRESHOLD: f32 = 0.5;

/// A single detected body keypoint in normalized image coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, score: f32) -> Self {
        Self { x, y, score }
    }

    pub fn is_visible(&self) -> bool {
        self.score >= KEYPOINT_SCORE_THRESHOLD
    }
}

/// Body parts in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyPart {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl BodyPart {
    pub const ALL: [BodyPart; NUM_KEYPOINTS] = [
        BodyPart::Nose,
        BodyPart::LeftEye,
        BodyPart::RightEye,
        BodyPart::LeftEar,
        BodyPart::RightEar,
        BodyPart::LeftShoulder,
        BodyPart::RightShoulder,
        BodyPart::LeftElbow,
        BodyPart::RightElbow,
        BodyPart::LeftWrist,
        BodyPart::RightWrist,
        BodyPart::LeftHip,
        BodyPart::RightHip,
        BodyPart::LeftKnee,
        BodyPart::RightKnee,
        BodyPart::LeftAnkle,
        BodyPart::RightAnkle,
    ];

    /// Channel index of this part in the heatmap and offset tensors.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            BodyPart::Nose => "nose",
            BodyPart::LeftEye => "left_eye",
            BodyPart::RightEye => "right_eye",
            BodyPart::LeftEar => "left_ear",
            BodyPart::RightEar => "right_ear",
            BodyPart::LeftShoulder => "left_shoulder",
            BodyPart::RightShoulder => "right_shoulder",
            BodyPart::LeftElbow => "left_elbow",
            BodyPart::RightElbow => "right_elbow",
            BodyPart::LeftWrist => "left_wrist",
            BodyPart::RightWrist => "right_wrist",
            BodyPart::LeftHip => "left_hip",
            BodyPart::RightHip => "right_hip",
            BodyPart::LeftKnee => "left_knee",
            BodyPart::RightKnee => "right_knee",
            BodyPart::LeftAnkle => "left_ankle",
            BodyPart::RightAnkle => "right_ankle",
        }
    }
}

/// Skeleton edges connecting keypoints.
pub const BODY_JOINTS: [(BodyPart, BodyPart); 12] = [
    (BodyPart::LeftWrist, BodyPart::LeftElbow),
    (BodyPart::LeftElbow, BodyPart::LeftShoulder),
    (BodyPart::LeftShoulder, BodyPart::RightShoulder),
    (BodyPart::RightShoulder, BodyPart::RightElbow),
    (BodyPart::RightElbow, BodyPart::RightWrist),
    (BodyPart::LeftShoulder, BodyPart::LeftHip),
    (BodyPart::LeftHip, BodyPart::RightHip),
    (BodyPart::RightHip, BodyPart::RightShoulder),
    (BodyPart::LeftHip, BodyPart::LeftKnee),
    (BodyPart::LeftKnee, BodyPart::LeftAnkle),
    (BodyPart::RightHip, BodyPart::RightKnee),
    (BodyPart::RightKnee, BodyPart::RightAnkle),
];

/// Timing information for one pipeline pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    /// Time spent in the compute stage, including any blocking GPU wait.
    pub render_ms: f32,
    /// Time spent in the inference stage.
    pub ml_ms: f32,
}

impl TimingInfo {
    pub fn total_ms(&self) -> f32 {
        self.render_ms + self.ml_ms
    }
}

/// Result of one pose estimation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseResult {
    /// One keypoint per [`BodyPart`], in [`BodyPart::ALL`] order.
    pub keypoints: Vec<Keypoint>,
    /// Mean keypoint score.
    pub score: f32,
    pub timing: TimingInfo,
}

impl PoseResult {
    pub fn new(keypoints: Vec<Keypoint>, timing: TimingInfo) -> Self {
        let score = if keypoints.is_empty() {
            0.0
        } else {
            keypoints.iter().map(|k| k.score).sum::<f32>() / keypoints.len() as f32
        };
        Self {
            keypoints,
            score,
            timing,
        }
    }

    pub fn keypoint(&self, part: BodyPart) -> Option<&Keypoint> {
        self.keypoints.get(part.index())
    }

    /// Keypoints scoring at or above [`KEYPOINT_SCORE_THRESHOLD`].
    pub fn visible_keypoints(&self) -> impl Iterator<Item = (BodyPart, &Keypoint)> {
        BodyPart::ALL
            .iter()
            .zip(self.keypoints.iter())
            .filter(|(_, k)| k.is_visible())
            .map(|(part, k)| (*part, k))
    }

    /// Skeleton edges whose endpoints are both visible.
    pub fn visible_joints(&self) -> impl Iterator<Item = (&Keypoint, &Keypoint)> {
        BODY_JOINTS.iter().filter_map(|(a, b)| {
            let first = self.keypoint(*a)?;
            let second = self.keypoint(*b)?;
            (first.is_visible() && second.is_visible()).then_some((first, second))
        })
    }
}
