//! Keypoint decoding from the pose model's heatmap and offset tensors.

use posepipe_core::{
    Keypoint, PoseError, Result, HEATMAP_LEN, HEATMAP_SIZE, MODEL_INPUT_HEIGHT, MODEL_INPUT_WIDTH,
    NUM_KEYPOINTS, OFFSETS_LEN,
};

/// Decodes `[9, 9, 17]` heatmaps and `[9, 9, 34]` offsets into 17 keypoints.
///
/// For each keypoint the heatmap plane is scanned row by row for its
/// maximum; the first cell seen wins ties. The position is the cell's grid
/// coordinate normalized by `HEATMAP_SIZE - 1`, corrected by the offset at
/// that cell divided by the model input size. The score is the sigmoid of
/// the maximum.
#[derive(Debug, Clone, Copy)]
pub struct KeypointDecoder {
    grid: usize,
    keypoints: usize,
}

impl Default for KeypointDecoder {
    fn default() -> Self {
        Self {
            grid: HEATMAP_SIZE,
            keypoints: NUM_KEYPOINTS,
        }
    }
}

impl KeypointDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&self, heatmap: &[f32], offsets: &[f32]) -> Result<Vec<Keypoint>> {
        if heatmap.len() < HEATMAP_LEN || offsets.len() < OFFSETS_LEN {
            return Err(PoseError::InvalidInput(format!(
                "decode needs {HEATMAP_LEN} heatmap and {OFFSETS_LEN} offset values, got {} and {}",
                heatmap.len(),
                offsets.len()
            )));
        }

        let k_count = self.keypoints;
        let last_cell = (self.grid - 1) as f32;
        let keypoints = (0..k_count)
            .map(|k| {
                let mut max_value = heatmap[k];
                let (mut max_row, mut max_col) = (0, 0);
                for row in 0..self.grid {
                    for col in 0..self.grid {
                        let value = heatmap[(row * self.grid + col) * k_count + k];
                        if value > max_value {
                            max_value = value;
                            max_row = row;
                            max_col = col;
                        }
                    }
                }

                let y_index = (max_row * self.grid + max_col) * k_count * 2 + k;
                let x_index = y_index + k_count;
                let x = max_col as f32 / last_cell + offsets[x_index] / MODEL_INPUT_WIDTH as f32;
                let y = max_row as f32 / last_cell + offsets[y_index] / MODEL_INPUT_HEIGHT as f32;
                Keypoint::new(x, y, sigmoid(max_value))
            })
            .collect();
        Ok(keypoints)
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heatmap_index(row: usize, col: usize, k: usize) -> usize {
        (row * HEATMAP_SIZE + col) * NUM_KEYPOINTS + k
    }

    fn offset_indices(row: usize, col: usize, k: usize) -> (usize, usize) {
        let y = (row * HEATMAP_SIZE + col) * NUM_KEYPOINTS * 2 + k;
        (y, y + NUM_KEYPOINTS)
    }

    #[test]
    fn test_spike_decodes_to_cell_centre() {
        let mut heatmap = vec![0.0; HEATMAP_LEN];
        heatmap[heatmap_index(4, 4, 0)] = 10.0;
        let offsets = vec![0.0; OFFSETS_LEN];

        let keypoints = KeypointDecoder::new().decode(&heatmap, &offsets).unwrap();
        assert_eq!(keypoints.len(), NUM_KEYPOINTS);
        let nose = keypoints[0];
        assert!((nose.x - 0.5).abs() < 1e-6);
        assert!((nose.y - 0.5).abs() < 1e-6);
        assert!((nose.score - 0.999_954_6).abs() < 1e-6);

        // All-zero planes: cell (0, 0) with score 0.5.
        assert_eq!(keypoints[1], Keypoint::new(0.0, 0.0, 0.5));
    }

    #[test]
    fn test_offsets_applied() {
        let mut heatmap = vec![0.0; HEATMAP_LEN];
        heatmap[heatmap_index(2, 6, 3)] = 1.0;
        let mut offsets = vec![0.0; OFFSETS_LEN];
        let (y, x) = offset_indices(2, 6, 3);
        offsets[y] = 25.7;
        offsets[x] = -12.85;

        let kp = KeypointDecoder::new().decode(&heatmap, &offsets).unwrap()[3];
        assert!((kp.x - (0.75 - 0.05)).abs() < 1e-5);
        assert!((kp.y - (0.25 + 0.1)).abs() < 1e-5);
    }

    #[test]
    fn test_ties_resolve_row_major() {
        let mut heatmap = vec![0.0; HEATMAP_LEN];
        heatmap[heatmap_index(5, 2, 7)] = 3.0;
        heatmap[heatmap_index(2, 5, 7)] = 3.0;
        let offsets = vec![0.0; OFFSETS_LEN];

        let kp = KeypointDecoder::new().decode(&heatmap, &offsets).unwrap()[7];
        assert!((kp.x - 5.0 / 8.0).abs() < 1e-6);
        assert!((kp.y - 2.0 / 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_is_idempotent() {
        let heatmap: Vec<f32> = (0..HEATMAP_LEN).map(|i| ((i * 37) % 101) as f32 * 0.1).collect();
        let offsets: Vec<f32> = (0..OFFSETS_LEN).map(|i| ((i * 13) % 29) as f32 - 14.0).collect();
        let decoder = KeypointDecoder::new();

        let first = decoder.decode(&heatmap, &offsets).unwrap();
        let second = decoder.decode(&heatmap, &offsets).unwrap();
        let bits = |kps: &[Keypoint]| -> Vec<[u32; 3]> {
            kps.iter()
                .map(|k| [k.x.to_bits(), k.y.to_bits(), k.score.to_bits()])
                .collect()
        };
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn test_short_tensors_rejected() {
        let decoder = KeypointDecoder::new();
        assert!(decoder.decode(&[0.0; 10], &[0.0; OFFSETS_LEN]).is_err());
    }
}
