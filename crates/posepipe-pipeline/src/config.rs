use std::path::Path;

use serde::{Deserialize, Serialize};

use posepipe_core::{PoseError, Result};

/// Graphics API used for the camera-to-tensor compute pass.
///
/// The raw values match the platform's renderer enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Renderer {
    /// Vulkan compute through wgpu when the `wgpu` feature is enabled and an
    /// adapter is found. Falls back to the software device otherwise.
    #[default]
    Vulkan = 0,
    /// GLES compute. Served by the software device.
    Gles = 1,
}

impl TryFrom<i32> for Renderer {
    type Error = PoseError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Vulkan),
            1 => Ok(Self::Gles),
            other => Err(PoseError::Config(format!("unknown renderer {other}"))),
        }
    }
}

/// Neural-network executor for the inference pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MlExecutor {
    /// Native accelerator runtime, capability-gated by feature level.
    #[default]
    NativeNnapi = 0,
}

impl TryFrom<i32> for MlExecutor {
    type Error = PoseError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::NativeNnapi),
            other => Err(PoseError::Config(format!("unknown ML executor {other}"))),
        }
    }
}

/// Full pipeline configuration.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseEstimationConfig {
    /// Compute backend selection.
    pub renderer: Renderer,

    /// Inference backend selection.
    pub ml_executor: MlExecutor,

    /// Number of distinct camera buffers expected in flight. Sizes the
    /// imported-image cache and the backend's resource pools.
    /// Default: 4 (three swapchain images plus one).
    pub max_number_of_camera_images: usize,

    /// Override for the detected accelerator feature level.
    pub accelerator_feature_level: Option<i64>,

    /// Byte alignment the accelerator reports for every tensor. Must be a
    /// power of two and at least 4. `None` keeps natural alignment.
    pub input_alignment: Option<usize>,

    /// Byte padding the accelerator reports for every tensor. Must be a
    /// power of two. `None` means no padding.
    pub input_padding: Option<usize>,
}

impl Default for PoseEstimationConfig {
    fn default() -> Self {
        Self {
            renderer: Renderer::default(),
            ml_executor: MlExecutor::default(),
            max_number_of_camera_images: 4,
            accelerator_feature_level: None,
            input_alignment: None,
            input_padding: None,
        }
    }
}

impl PoseEstimationConfig {
    /// Build from the raw integers handed over by the platform layer.
    pub fn from_raw(
        renderer: i32,
        ml_executor: i32,
        max_number_of_camera_images: i32,
    ) -> Result<Self> {
        let max_number_of_camera_images = usize::try_from(max_number_of_camera_images)
            .map_err(|_| {
                PoseError::Config(format!(
                    "max_number_of_camera_images must be positive, got {max_number_of_camera_images}"
                ))
            })?;
        let config = Self {
            renderer: Renderer::try_from(renderer)?,
            ml_executor: MlExecutor::try_from(ml_executor)?,
            max_number_of_camera_images,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PoseError::Config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        tracing::info!(path = %path.display(), "loaded pipeline config");
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_number_of_camera_images == 0 {
            return Err(PoseError::Config(
                "max_number_of_camera_images must be at least 1".into(),
            ));
        }
        if let Some(alignment) = self.input_alignment {
            // Tensors are read back as f32, so alignment below 4 is unusable.
            if !alignment.is_power_of_two() || alignment < 4 {
                return Err(PoseError::Config(format!(
                    "input_alignment must be a power of two >= 4, got {alignment}"
                )));
            }
        }
        if let Some(padding) = self.input_padding {
            if !padding.is_power_of_two() {
                return Err(PoseError::Config(format!(
                    "input_padding must be a power of two, got {padding}"
                )));
            }
        }
        if let Some(level) = self.accelerator_feature_level {
            if level <= 0 {
                return Err(PoseError::Config(format!(
                    "accelerator_feature_level must be positive, got {level}"
                )));
            }
        }
        Ok(())
    }
}
