use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use posepipe_core::capabilities::FEATURE_LEVEL_8;
use posepipe_core::{BodyPart, PlatformCapabilities, PoseResult, PreviewGeometry, Size, TimingInfo};
use posepipe_gpu::CameraImage;
use posepipe_pipeline::{PoseEstimationConfig, PoseEstimator, Renderer};

#[derive(Parser)]
#[command(name = "posepipe", about = "Single-person pose estimation from camera frames")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to pipeline config file (JSON).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Platform API level. Up to 30 the accelerator feature level equals it.
    #[arg(long, default_value = "34", global = true)]
    pub api_level: u32,

    /// Accelerator feature level reported by the runtime on API 31 and later.
    #[arg(long, global = true)]
    pub feature_level: Option<i64>,

    /// Model file. Without it the built-in luminance-centroid graph is used.
    #[arg(long, global = true)]
    pub model: Option<PathBuf>,

    /// Override the configured renderer.
    #[arg(long, global = true)]
    pub renderer: Option<RendererArg>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Estimate the pose in one image and print the keypoints.
    Estimate {
        /// Input image (PNG or JPEG).
        #[arg(required_unless_present = "synthetic")]
        input: Option<PathBuf>,
        /// Use a synthetic gray frame instead of an image file.
        #[arg(long, conflicts_with = "input")]
        synthetic: bool,
        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Run many frames through one pipeline and report mean stage timings.
    BenchFrames {
        /// Input image. Defaults to a synthetic gray frame.
        input: Option<PathBuf>,
        /// Number of measured frames.
        #[arg(long, default_value = "100")]
        frames: usize,
        /// Frames run before measuring.
        #[arg(long, default_value = "5")]
        warmup: usize,
        /// Distinct camera buffer ids to cycle through.
        #[arg(long, default_value = "3")]
        buffers: u64,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Print resolved capabilities and the backends and tiers in use.
    Info,
}

/// How the camera frame is oriented relative to the display.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct ViewArgs {
    /// Clockwise rotation of the frame relative to the display (0, 90, 180, 270).
    #[arg(long, default_value = "0")]
    pub rotation: i32,
    /// Mirror the frame horizontally (front-facing camera).
    #[arg(long)]
    pub mirror: bool,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Jsonl,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum RendererArg {
    Vulkan,
    Gles,
}

impl From<RendererArg> for Renderer {
    fn from(arg: RendererArg) -> Self {
        match arg {
            RendererArg::Vulkan => Renderer::Vulkan,
            RendererArg::Gles => Renderer::Gles,
        }
    }
}

const SYNTHETIC_SIZE: u32 = 257;

impl Cli {
    pub fn capabilities(&self) -> PlatformCapabilities {
        let reported = self.feature_level.unwrap_or(FEATURE_LEVEL_8);
        PlatformCapabilities::resolve(self.api_level, || reported)
    }

    pub fn pipeline_config(&self) -> anyhow::Result<PoseEstimationConfig> {
        let mut config = match &self.config {
            Some(path) => PoseEstimationConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => PoseEstimationConfig::default(),
        };
        if let Some(renderer) = self.renderer {
            config.renderer = renderer.into();
        }
        Ok(config)
    }
}

/// Load an image file as an RGBA camera frame.
pub fn load_image(path: &Path) -> anyhow::Result<CameraImage> {
    let rgba = image::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    tracing::debug!(path = %path.display(), width, height, "loaded image");
    Ok(CameraImage::from_rgba(width, height, rgba.into_raw())?)
}

pub fn synthetic_image() -> anyhow::Result<CameraImage> {
    Ok(CameraImage::solid(
        SYNTHETIC_SIZE,
        SYNTHETIC_SIZE,
        [128, 128, 128, 255],
    )?)
}

/// Texture transform for a square preview of `image`.
pub fn texture_transform(
    image: &CameraImage,
    view: &ViewArgs,
) -> anyhow::Result<posepipe_core::TextureTransform> {
    let side = image.width().min(image.height());
    let geometry = PreviewGeometry {
        display_size: Size::new(side, side),
        camera_size: Size::new(image.width(), image.height()),
        rotation: view.rotation,
        flip_horizontally: view.mirror,
    };
    Ok(geometry.texture_transform()?)
}

#[derive(Serialize)]
struct KeypointRecord {
    part: BodyPart,
    x: f32,
    y: f32,
    score: f32,
    visible: bool,
}

fn records(pose: &PoseResult) -> Vec<KeypointRecord> {
    BodyPart::ALL
        .iter()
        .zip(pose.keypoints.iter())
        .map(|(part, k)| KeypointRecord {
            part: *part,
            x: k.x,
            y: k.y,
            score: k.score,
            visible: k.is_visible(),
        })
        .collect()
}

pub fn print_pose(pose: &PoseResult, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            for record in records(pose) {
                println!(
                    "{:<15} x={:.4} y={:.4} score={:.4}{}",
                    record.part.name(),
                    record.x,
                    record.y,
                    record.score,
                    if record.visible { "" } else { "  (hidden)" }
                );
            }
            println!(
                "pose score {:.4}, {} joints visible",
                pose.score,
                pose.visible_joints().count()
            );
            eprintln!(
                "\n[{:.2}ms total | render:{:.2}ms ml:{:.2}ms]",
                pose.timing.total_ms(),
                pose.timing.render_ms,
                pose.timing.ml_ms
            );
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "keypoints": records(pose),
                "score": pose.score,
                "timing": pose.timing,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Jsonl => {
            for record in records(pose) {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }
    Ok(())
}

/// Mean, min and max stage timings over a run of frames.
#[derive(Debug, Default, Serialize)]
pub struct FrameStats {
    pub frames: usize,
    pub mean: TimingInfo,
    pub min_total_ms: f32,
    pub max_total_ms: f32,
}

impl FrameStats {
    pub fn from_timings(timings: &[TimingInfo]) -> Self {
        if timings.is_empty() {
            return Self::default();
        }
        let n = timings.len() as f32;
        let totals = timings.iter().map(TimingInfo::total_ms);
        Self {
            frames: timings.len(),
            mean: TimingInfo {
                render_ms: timings.iter().map(|t| t.render_ms).sum::<f32>() / n,
                ml_ms: timings.iter().map(|t| t.ml_ms).sum::<f32>() / n,
            },
            min_total_ms: totals.clone().fold(f32::INFINITY, f32::min),
            max_total_ms: totals.fold(0.0, f32::max),
        }
    }
}

pub fn bench_frames(
    estimator: &mut PoseEstimator,
    image: &CameraImage,
    frames: usize,
    warmup: usize,
    buffers: u64,
) -> anyhow::Result<FrameStats> {
    let buffers = buffers.max(1);
    let frame = |i: usize| image.clone().with_buffer_id(i as u64 % buffers);

    for i in 0..warmup {
        estimator.estimate(&frame(i))?;
    }
    tracing::info!(warmup, frames, buffers, "measuring");

    let mut timings = Vec::with_capacity(frames);
    for i in 0..frames {
        let pose = estimator.estimate(&frame(warmup + i))?;
        timings.push(pose.timing);
    }
    Ok(FrameStats::from_timings(&timings))
}

pub fn print_info(
    capabilities: &PlatformCapabilities,
    config: &PoseEstimationConfig,
    estimator: &PoseEstimator,
) {
    println!("api level:               {}", capabilities.api_level);
    println!("accelerator feature:     {}", capabilities.accelerator_feature_level);
    println!("stable buffer ids:       {}", capabilities.supports_buffer_id());
    println!("renderer:                {:?}", config.renderer);
    println!("compute backend:         {}", estimator.compute_name());
    println!("inference backend:       {}", estimator.inference_name());
    println!("fence chaining:          {}", estimator.chains_fences());
    match estimator.last_tier() {
        Some(tier) => println!("execution tier:          {tier:?}"),
        None => println!("execution tier:          (no frame run)"),
    }
}
