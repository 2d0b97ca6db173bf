//! Executable model graphs for the host accelerator.

use std::sync::Arc;

use posepipe_core::{
    PoseError, Result, DISPLACEMENTS_LEN, HEATMAP_LEN, HEATMAP_SIZE, MODEL_INPUT_CHANNELS,
    MODEL_INPUT_HEIGHT, MODEL_INPUT_LEN, MODEL_INPUT_WIDTH, NUM_KEYPOINTS, OFFSETS_LEN,
};

/// A compiled model: one float input, several float outputs.
pub trait CompiledGraph: Send + Sync {
    /// Number of input elements.
    fn input_len(&self) -> usize;

    /// Number of elements in each output, in output order.
    fn output_lens(&self) -> &[usize];

    /// Run the graph. `outputs[i]` has exactly `output_lens()[i]` elements.
    fn run(&self, input: &[f32], outputs: &mut [&mut [f32]]) -> Result<()>;
}

/// Turns an opaque model blob into a [`CompiledGraph`].
pub trait GraphCompiler: Send {
    fn name(&self) -> &'static str;

    fn compile(&self, model: &[u8]) -> Result<Arc<dyn CompiledGraph>>;
}

/// Model blob understood by [`BuiltinCompiler`].
pub const LUMINANCE_MODEL: &[u8] = b"posepipe:luminance-centroid:v1";

const OUTPUT_LENS: [usize; 4] = [DISPLACEMENTS_LEN, DISPLACEMENTS_LEN, HEATMAP_LEN, OFFSETS_LEN];

/// Pixels between heatmap cell centres.
const CELL_STRIDE: usize = (MODEL_INPUT_WIDTH - 1) / (HEATMAP_SIZE - 1);
/// Heatmap logit for a fully white cell.
const LOGIT_SCALE: f32 = 8.0;

/// Reference graph that needs no model file.
///
/// Every keypoint channel gets the same heatmap: the mean brightness of the
/// window around each cell centre, scaled to a logit. Offsets point at the
/// brightness centroid of that window, so the decoded keypoints land on the
/// brightest region of the frame.
#[derive(Debug, Default)]
pub struct LuminanceGraph;

impl LuminanceGraph {
    /// Mean luminance in `[-1, 1]` and brightness centroid `(dy, dx)` in
    /// pixels, for the window around cell `(row, col)`.
    fn cell_stats(input: &[f32], row: usize, col: usize) -> (f32, f32, f32) {
        let half = CELL_STRIDE / 2;
        let (cy, cx) = (row * CELL_STRIDE, col * CELL_STRIDE);
        let y_range = cy.saturating_sub(half)..(cy + half + 1).min(MODEL_INPUT_HEIGHT);
        let x_range = cx.saturating_sub(half)..(cx + half + 1).min(MODEL_INPUT_WIDTH);

        let mut sum = 0.0;
        let mut weight = 0.0;
        let mut wy = 0.0;
        let mut wx = 0.0;
        let mut count = 0usize;
        for y in y_range {
            for x in x_range.clone() {
                let i = (y * MODEL_INPUT_WIDTH + x) * MODEL_INPUT_CHANNELS;
                let luma = 0.299 * input[i] + 0.587 * input[i + 1] + 0.114 * input[i + 2];
                sum += luma;
                count += 1;
                // Shift to [0, 1] so dark pixels pull nothing.
                let w = (luma + 1.0) * 0.5;
                weight += w;
                wy += w * (y as f32 - cy as f32);
                wx += w * (x as f32 - cx as f32);
            }
        }

        let mean = sum / count as f32;
        if weight > f32::EPSILON {
            (mean, wy / weight, wx / weight)
        } else {
            (mean, 0.0, 0.0)
        }
    }
}

impl CompiledGraph for LuminanceGraph {
    fn input_len(&self) -> usize {
        MODEL_INPUT_LEN
    }

    fn output_lens(&self) -> &[usize] {
        &OUTPUT_LENS
    }

    fn run(&self, input: &[f32], outputs: &mut [&mut [f32]]) -> Result<()> {
        if input.len() < MODEL_INPUT_LEN {
            return Err(PoseError::Accelerator(format!(
                "input has {} elements, graph needs {MODEL_INPUT_LEN}",
                input.len()
            )));
        }
        let [fwd, bwd, heatmap, offsets] = outputs else {
            return Err(PoseError::Accelerator(format!(
                "graph has 4 outputs, {} bound",
                outputs.len()
            )));
        };
        fwd.fill(0.0);
        bwd.fill(0.0);

        for row in 0..HEATMAP_SIZE {
            for col in 0..HEATMAP_SIZE {
                let (mean, dy, dx) = Self::cell_stats(input, row, col);
                let cell = row * HEATMAP_SIZE + col;
                for k in 0..NUM_KEYPOINTS {
                    heatmap[cell * NUM_KEYPOINTS + k] = mean * LOGIT_SCALE;
                    let y_index = cell * NUM_KEYPOINTS * 2 + k;
                    offsets[y_index] = dy;
                    offsets[y_index + NUM_KEYPOINTS] = dx;
                }
            }
        }
        Ok(())
    }
}

/// Compiler for graphs that ship with the crate.
#[derive(Debug, Default)]
pub struct BuiltinCompiler;

impl GraphCompiler for BuiltinCompiler {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn compile(&self, model: &[u8]) -> Result<Arc<dyn CompiledGraph>> {
        if model == LUMINANCE_MODEL {
            Ok(Arc::new(LuminanceGraph))
        } else {
            Err(PoseError::ModelLoad(format!(
                "unrecognised model blob of {} bytes",
                model.len()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let mut fwd = vec![1.0; DISPLACEMENTS_LEN];
        let mut bwd = vec![1.0; DISPLACEMENTS_LEN];
        let mut heatmap = vec![0.0; HEATMAP_LEN];
        let mut offsets = vec![0.0; OFFSETS_LEN];
        LuminanceGraph
            .run(
                input,
                &mut [&mut fwd, &mut bwd, &mut heatmap, &mut offsets],
            )
            .unwrap();
        assert!(fwd.iter().chain(bwd.iter()).all(|&v| v == 0.0));
        (heatmap, offsets)
    }

    #[test]
    fn test_bright_spot_peaks_heatmap() {
        let mut input = vec![-1.0; MODEL_INPUT_LEN];
        // White 9x9 patch centred on pixel (y=96, x=160): cell (3, 5).
        for y in 92..=100 {
            for x in 156..=164 {
                let i = (y * MODEL_INPUT_WIDTH + x) * 3;
                input[i..i + 3].fill(1.0);
            }
        }
        let (heatmap, offsets) = run(&input);

        let best = (0..HEATMAP_SIZE * HEATMAP_SIZE)
            .max_by(|&a, &b| heatmap[a * NUM_KEYPOINTS].total_cmp(&heatmap[b * NUM_KEYPOINTS]))
            .unwrap();
        assert_eq!(best, 3 * HEATMAP_SIZE + 5);

        // The patch is centred on the cell, so the centroid is too.
        let y_index = best * NUM_KEYPOINTS * 2;
        assert!(offsets[y_index].abs() < 1e-3);
        assert!(offsets[y_index + NUM_KEYPOINTS].abs() < 1e-3);
    }

    #[test]
    fn test_centroid_offset_direction() {
        let mut input = vec![-1.0; MODEL_INPUT_LEN];
        // Bright pixels right of and below the centre of cell (4, 4).
        for y in 130..=136 {
            for x in 134..=140 {
                let i = (y * MODEL_INPUT_WIDTH + x) * 3;
                input[i..i + 3].fill(1.0);
            }
        }
        let (_, offsets) = run(&input);
        let y_index = (4 * HEATMAP_SIZE + 4) * NUM_KEYPOINTS * 2;
        assert!(offsets[y_index] > 0.0);
        assert!(offsets[y_index + NUM_KEYPOINTS] > 0.0);
    }

    #[test]
    fn test_builtin_compiler_rejects_unknown_blob() {
        let compiler = BuiltinCompiler;
        assert!(compiler.compile(LUMINANCE_MODEL).is_ok());
        assert!(matches!(
            compiler.compile(b"not a model"),
            Err(PoseError::ModelLoad(_))
        ));
    }
}
