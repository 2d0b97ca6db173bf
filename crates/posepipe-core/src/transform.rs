//! Texture coordinate transform fed to the compute stage.
//!
//! The compute kernel maps each output pixel `(x, y)` to
//! `(M * vec4(x / 256, y / 256, 0, 1)).xy` in the camera texture. `M` is a
//! column-major 4x4 matrix that crops, rotates and optionally mirrors the
//! camera frame to match what the display shows.

use serde::{Deserialize, Serialize};

use crate::error::{PoseError, Result};

/// Integer width/height pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Swap width and height for 90/270 degree rotations.
    pub fn rotated(self, rotation: i32) -> Result<Self> {
        match rotation.rem_euclid(180) {
            0 => Ok(self),
            90 => Ok(Size::new(self.height, self.width)),
            _ => Err(PoseError::InvalidInput(format!(
                "unexpected rotation: {rotation}"
            ))),
        }
    }

    /// Largest size with this aspect ratio that fits inside `target`.
    pub fn scale_to_fit(self, target: Size) -> Size {
        let source_ratio = self.aspect_ratio();
        if source_ratio > target.aspect_ratio() {
            Size::new(target.width, (target.width as f32 / source_ratio) as u32)
        } else {
            Size::new((target.height as f32 * source_ratio) as u32, target.height)
        }
    }

    /// Smallest size with this aspect ratio that covers `target`.
    pub fn scale_to_fill(self, target: Size) -> Size {
        let source_ratio = self.aspect_ratio();
        if source_ratio > target.aspect_ratio() {
            Size::new((target.height as f32 * source_ratio) as u32, target.height)
        } else {
            Size::new(target.width, (target.width as f32 / source_ratio) as u32)
        }
    }
}

/// Column-major 4x4 matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextureTransform(pub [f32; 16]);

impl TextureTransform {
    pub fn identity() -> Self {
        let mut m = [0.0; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        Self(m)
    }

    pub fn from_column_major(m: [f32; 16]) -> Self {
        Self(m)
    }

    pub fn as_array(&self) -> &[f32; 16] {
        &self.0
    }

    /// Post-multiply by a translation.
    pub fn translate(mut self, x: f32, y: f32, z: f32) -> Self {
        let m = &mut self.0;
        for i in 0..4 {
            m[12 + i] += m[i] * x + m[4 + i] * y + m[8 + i] * z;
        }
        self
    }

    /// Post-multiply by a scale.
    pub fn scale(mut self, x: f32, y: f32, z: f32) -> Self {
        let m = &mut self.0;
        for i in 0..4 {
            m[i] *= x;
            m[4 + i] *= y;
            m[8 + i] *= z;
        }
        self
    }

    /// Post-multiply by a rotation of `degrees` about the z axis.
    pub fn rotate_z(mut self, degrees: f32) -> Self {
        let (s, c) = degrees.to_radians().sin_cos();
        let m = &mut self.0;
        for i in 0..4 {
            let a = m[i];
            let b = m[4 + i];
            m[i] = a * c + b * s;
            m[4 + i] = b * c - a * s;
        }
        self
    }

    /// Transform the point `(x, y, 0, 1)` and return its `xy`.
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.0;
        (m[0] * x + m[4] * y + m[12], m[1] * x + m[5] * y + m[13])
    }
}

impl Default for TextureTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Camera preview setup used to derive the texture transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviewGeometry {
    pub display_size: Size,
    pub camera_size: Size,
    /// Clockwise rotation of the camera frame relative to the display, in degrees.
    pub rotation: i32,
    /// Mirror the frame horizontally (front-facing cameras).
    pub flip_horizontally: bool,
}

impl PreviewGeometry {
    /// Build the crop/rotate/flip transform for this preview.
    pub fn texture_transform(&self) -> Result<TextureTransform> {
        let rotated_display = self.display_size.rotated(self.rotation)?;
        let scaled = rotated_display.scale_to_fit(self.camera_size);
        let x_crop = scaled.width as f32 / self.camera_size.width as f32;
        let y_crop = scaled.height as f32 / self.camera_size.height as f32;

        let mut m = TextureTransform::identity()
            .translate(0.5, 0.5, 0.0)
            .scale(x_crop, y_crop, 1.0)
            .rotate_z(-(self.rotation as f32));
        if self.flip_horizontally {
            m = m.scale(-1.0, 1.0, 1.0);
        }
        Ok(m.translate(-0.5, -0.5, 0.0))
    }
}
