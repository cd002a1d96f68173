//! YuNet output decoding.
//!
//! The detector emits twelve tensors, four per stride (8, 16, 32), in the
//! order `cls_*`, `obj_*`, `bbox_*`, `kps_*`. Each holds one row per grid
//! cell of a square `input_size / stride` grid. Decoding is anchor-free:
//!
//! ```text
//! cx = (col + dx) * stride        w = exp(dw) * stride
//! cy = (row + dy) * stride        h = exp(dh) * stride
//! score = sqrt(clamp(cls) * clamp(obj))
//! ```
//!
//! All decoded coordinates are pixels on the square detector canvas.

use anyhow::{bail, Result};
use ndarray::{Array2, ArrayView2};

pub const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // eyes, nose tip, mouth corners as (x, y) pairs
}

/// Per-cell predictions for one stride.
#[derive(Debug, Clone)]
pub struct ScaleMaps {
    pub stride: usize,
    pub scores: Vec<f32>,
    pub boxes: Array2<f32>,
    pub landmarks: Array2<f32>,
}

impl ScaleMaps {
    fn grid(&self, input_size: usize) -> usize {
        input_size / self.stride
    }

    fn decode_into(&self, score_threshold: f32, input_size: usize, out: &mut Vec<RawDetection>) {
        let grid = self.grid(input_size);
        let stride = self.stride as f32;

        for (idx, &score) in self.scores.iter().enumerate() {
            if score < score_threshold {
                continue;
            }
            let row = (idx / grid) as f32;
            let col = (idx % grid) as f32;
            let b = self.boxes.row(idx);

            let cx = (col + b[0]) * stride;
            let cy = (row + b[1]) * stride;
            let w = b[2].exp() * stride;
            let h = b[3].exp() * stride;

            let kps = self.landmarks.row(idx);
            let mut landmarks = [0.0f32; 10];
            for (k, point) in landmarks.chunks_exact_mut(2).enumerate() {
                point[0] = (col + kps[k * 2]) * stride;
                point[1] = (row + kps[k * 2 + 1]) * stride;
            }

            out.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }
}

/// Detections above `score_threshold` across all strides, unsorted.
pub fn decode(maps: &[ScaleMaps], score_threshold: f32, input_size: usize) -> Vec<RawDetection> {
    let mut out = Vec::new();
    for scale in maps {
        scale.decode_into(score_threshold, input_size, &mut out);
    }
    out
}

fn tensor<'a>(
    outputs: &'a [(&[i64], &[f32])],
    index: usize,
    cells: usize,
    width: usize,
    name: &str,
) -> Result<ArrayView2<'a, f32>> {
    let Some((shape, data)) = outputs.get(index) else {
        bail!("missing {} output at index {}", name, index);
    };
    let expected = [1, cells as i64, width as i64];
    if *shape != expected {
        bail!(
            "unexpected {} shape at index {}: {:?}, expected {:?}",
            name,
            index,
            shape,
            expected
        );
    }
    Ok(ArrayView2::from_shape((cells, width), *data)?)
}

/// Split the raw detector outputs into one [`ScaleMaps`] per stride.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<ScaleMaps>> {
    if outputs.len() < 12 {
        bail!("expected 12 detector outputs, got {}", outputs.len());
    }

    STRIDES
        .iter()
        .enumerate()
        .map(|(scale, &stride)| {
            let grid = input_size / stride;
            let cells = grid * grid;

            let cls = tensor(outputs, scale, cells, 1, "cls")?;
            let obj = tensor(outputs, scale + 3, cells, 1, "obj")?;
            let boxes = tensor(outputs, scale + 6, cells, 4, "bbox")?;
            let landmarks = tensor(outputs, scale + 9, cells, 10, "kps")?;

            let scores = cls
                .iter()
                .zip(obj.iter())
                .map(|(&c, &o)| (c.clamp(0.0, 1.0) * o.clamp(0.0, 1.0)).sqrt())
                .collect();

            Ok(ScaleMaps {
                stride,
                scores,
                boxes: boxes.to_owned(),
                landmarks: landmarks.to_owned(),
            })
        })
        .collect()
}
