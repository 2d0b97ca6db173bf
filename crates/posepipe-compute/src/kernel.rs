//! CPU execution of the resampling kernel.

use rayon::prelude::*;

use posepipe_core::{TextureTransform, MODEL_INPUT_CHANNELS, MODEL_INPUT_HEIGHT, MODEL_INPUT_WIDTH};

const ROW_STRIDE: usize = MODEL_INPUT_WIDTH * MODEL_INPUT_CHANNELS;
const STEP: f32 = 1.0 / (MODEL_INPUT_WIDTH - 1) as f32;

/// RGBA texture with channels normalized to `[0, 1]`.
pub struct FloatTexture {
    width: usize,
    height: usize,
    texels: Vec<[f32; 4]>,
}

impl FloatTexture {
    /// A black, fully transparent texture.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as usize,
            height: height as usize,
            texels: vec![[0.0; 4]; width as usize * height as usize],
        }
    }

    /// Convert tightly packed RGBA8 pixels.
    pub fn from_rgba8(width: u32, height: u32, pixels: &[u8]) -> Self {
        let mut texture = Self::new(width, height);
        texture.write_rgba8(pixels);
        texture
    }

    /// Overwrite the texels in place. `pixels` must hold one RGBA8 quad per
    /// texel; extra bytes are ignored.
    pub fn write_rgba8(&mut self, pixels: &[u8]) {
        for (texel, p) in self.texels.iter_mut().zip(pixels.chunks_exact(4)) {
            *texel = [
                p[0] as f32 / 255.0,
                p[1] as f32 / 255.0,
                p[2] as f32 / 255.0,
                p[3] as f32 / 255.0,
            ];
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn texel(&self, x: isize, y: isize) -> [f32; 4] {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.texels[y * self.width + x]
    }

    /// Bilinear sample at normalized coordinates with clamp-to-edge.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        let fx = u * self.width as f32 - 0.5;
        let fy = v * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as isize, y0 as isize);

        let a = self.texel(x0, y0);
        let b = self.texel(x0 + 1, y0);
        let c = self.texel(x0, y0 + 1);
        let d = self.texel(x0 + 1, y0 + 1);

        let mut out = [0.0; 4];
        for i in 0..4 {
            let top = a[i] + (b[i] - a[i]) * tx;
            let bottom = c[i] + (d[i] - c[i]) * tx;
            out[i] = top + (bottom - top) * ty;
        }
        out
    }
}

/// Run the kernel over the whole output grid, one rayon task per row of
/// work groups. Invocations outside the 257x257 grid are skipped.
pub fn dispatch(
    texture: &FloatTexture,
    transform: &TextureTransform,
    work_group_size: u32,
    group_count: (u32, u32),
    output: &mut [f32],
) {
    let wg = work_group_size as usize;
    let (groups_x, groups_y) = (group_count.0 as usize, group_count.1 as usize);

    output
        .par_chunks_mut(wg * ROW_STRIDE)
        .take(groups_y)
        .enumerate()
        .for_each(|(gy, rows)| {
            for gx in 0..groups_x {
                for ly in 0..wg {
                    let y = gy * wg + ly;
                    if y >= MODEL_INPUT_HEIGHT {
                        break;
                    }
                    for lx in 0..wg {
                        let x = gx * wg + lx;
                        if x >= MODEL_INPUT_WIDTH {
                            break;
                        }
                        let (u, v) = transform.apply(x as f32 * STEP, y as f32 * STEP);
                        let color = texture.sample(u, v);
                        let index = (ly * MODEL_INPUT_WIDTH + x) * MODEL_INPUT_CHANNELS;
                        rows[index] = color[0] * 2.0 - 1.0;
                        rows[index + 1] = color[1] * 2.0 - 1.0;
                        rows[index + 2] = color[2] * 2.0 - 1.0;
                    }
                }
            }
        });
}
