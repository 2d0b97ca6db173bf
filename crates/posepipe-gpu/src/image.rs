use std::sync::Arc;

use posepipe_core::{PlatformCapabilities, PoseError, Result};

/// A camera frame handed to the pipeline.
///
/// Pixels are RGBA8, row-major, tightly packed. The frame may carry a stable
/// 64-bit identity assigned by the camera's buffer queue; the identity is a
/// cache key only and says nothing about ownership.
#[derive(Clone)]
pub struct CameraImage {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
    buffer_id: Option<u64>,
}

impl CameraImage {
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 {
            return Err(PoseError::InvalidInput(format!(
                "camera image must be non-empty, got {width}x{height}"
            )));
        }
        if pixels.len() != expected {
            return Err(PoseError::InvalidInput(format!(
                "expected {expected} RGBA bytes for {width}x{height}, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels: pixels.into(),
            buffer_id: None,
        })
    }

    /// A frame filled with one color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::from_rgba(width, height, pixels)
    }

    /// Attach the buffer queue's identity for this frame.
    pub fn with_buffer_id(mut self, id: u64) -> Self {
        self.buffer_id = Some(id);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Query the stable identity. Platforms that cannot report buffer ids
    /// yield `None` even when the frame carries one.
    pub fn stable_id(&self, capabilities: &PlatformCapabilities) -> Option<u64> {
        if capabilities.supports_buffer_id() {
            self.buffer_id
        } else {
            None
        }
    }
}

impl std::fmt::Debug for CameraImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("buffer_id", &self.buffer_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_image() {
        let image = CameraImage::solid(3, 2, [1, 2, 3, 4]).unwrap();
        assert_eq!(image.pixels().len(), 24);
        assert_eq!(&image.pixels()[20..24], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_pixel_count_checked() {
        assert!(CameraImage::from_rgba(2, 2, vec![0; 15]).is_err());
        assert!(CameraImage::from_rgba(0, 2, vec![]).is_err());
    }

    #[test]
    fn test_stable_id_gated_by_platform() {
        let image = CameraImage::solid(1, 1, [0; 4]).unwrap().with_buffer_id(7);
        let modern = PlatformCapabilities::resolve(31, || 31);
        let legacy = PlatformCapabilities::resolve(30, || 30);
        assert_eq!(image.stable_id(&modern), Some(7));
        assert_eq!(image.stable_id(&legacy), None);
    }
}
