//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: every grid cell of the three feature maps (strides 8,
//! 16 and 32) predicts one face. The model emits twelve tensors in the order
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, .., kps_8, ..`, each
//! shaped `[1, H*W, C]` with `C` = 1, 1, 4 and 10 respectively.
//!
//! Decoding per cell `(row, col)`:
//! - score = sqrt(cls * obj)
//! - cx = (col + dx) * stride, cy = (row + dy) * stride
//! - w = exp(dw) * stride, h = exp(dh) * stride
//! - landmark k = ((col + lx_k) * stride, (row + ly_k) * stride)

use anyhow::{bail, Result};
use ndarray::ArrayView2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// A decoded detection in input-canvas pixels.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// One stride's worth of output tensors, borrowed from the session outputs.
struct Head<'a> {
    stride: usize,
    cls: ArrayView2<'a, f32>,
    obj: ArrayView2<'a, f32>,
    bbox: ArrayView2<'a, f32>,
    kps: ArrayView2<'a, f32>,
}

fn view<'a>(
    outputs: &'a [(Vec<i64>, Vec<f32>)],
    idx: usize,
    cells: usize,
    channels: usize,
) -> Result<ArrayView2<'a, f32>> {
    let Some((shape, data)) = outputs.get(idx) else {
        bail!("missing YuNet output {idx}");
    };
    if shape.len() != 3 || shape[1] as usize != cells || shape[2] as usize != channels {
        bail!("YuNet output {idx} has shape {shape:?}, expected [1, {cells}, {channels}]");
    }
    Ok(ArrayView2::from_shape((cells, channels), data.as_slice())?)
}

/// Decode the raw output tensors of a square `input_size` YuNet model,
/// keeping detections scoring at least `score_threshold`.
pub fn decode(
    outputs: &[(Vec<i64>, Vec<f32>)],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<RawDetection>> {
    let mut heads = Vec::with_capacity(STRIDES.len());
    for (i, &stride) in STRIDES.iter().enumerate() {
        let side = input_size / stride;
        let cells = side * side;
        heads.push(Head {
            stride,
            cls: view(outputs, i, cells, 1)?,
            obj: view(outputs, i + 3, cells, 1)?,
            bbox: view(outputs, i + 6, cells, 4)?,
            kps: view(outputs, i + 9, cells, 10)?,
        });
    }

    let mut detections = Vec::new();
    for head in &heads {
        let side = input_size / head.stride;
        let stride = head.stride as f32;
        for idx in 0..side * side {
            let score = (head.cls[[idx, 0]] * head.obj[[idx, 0]]).clamp(0.0, 1.0).sqrt();
            if score < score_threshold {
                continue;
            }
            let row = (idx / side) as f32;
            let col = (idx % side) as f32;

            let cx = (col + head.bbox[[idx, 0]]) * stride;
            let cy = (row + head.bbox[[idx, 1]]) * stride;
            let w = head.bbox[[idx, 2]].exp() * stride;
            let h = head.bbox[[idx, 3]].exp() * stride;

            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = (col + head.kps[[idx, k * 2]]) * stride;
                landmarks[k * 2 + 1] = (row + head.kps[[idx, k * 2 + 1]]) * stride;
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    Ok(detections)
}
