use crate::model::{ModelName, EMBEDDING_DIM};
use crate::yunet;
use anyhow::{bail, Result};
use image::{imageops, DynamicImage, GenericImageView};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// Side of the square canvas the detector runs on.
const DETECTOR_INPUT: u32 = 640;

/// Detection result from YuNet, in source-image pixels
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

impl Detection {
    pub fn area(&self) -> f32 {
        self.bbox[2].max(0.0) * self.bbox[3].max(0.0)
    }
}

/// Detect faces in an image using the YuNet detector
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    // Letterbox onto a square canvas so faces keep their aspect ratio
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == 0 || orig_h == 0 {
        bail!("image has no pixels");
    }
    let scale = DETECTOR_INPUT as f32 / orig_w.max(orig_h) as f32;
    let new_w = ((orig_w as f32 * scale) as u32).max(1);
    let new_h = ((orig_h as f32 * scale) as u32).max(1);
    let resized = img.resize_exact(new_w, new_h, imageops::FilterType::Triangle);

    let mut canvas = DynamicImage::new_rgb8(DETECTOR_INPUT, DETECTOR_INPUT);
    let offset_x = (DETECTOR_INPUT - new_w) / 2;
    let offset_y = (DETECTOR_INPUT - new_h) / 2;
    imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    // YuNet expects [1, 3, H, W] in BGR order with raw 0..255 values
    let side = DETECTOR_INPUT as usize;
    let rgb = canvas.to_rgb8();
    let input = Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        rgb.get_pixel(x as u32, y as u32)[2 - c] as f32
    });
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;

    let mut tensors = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        tensors.push((shape.iter().copied().collect::<Vec<i64>>(), data.to_vec()));
    }

    let raw = yunet::decode(&tensors, side, score_threshold)?;

    // Undo the letterbox: canvas pixels -> source pixels
    let unmap = |v: f32, offset: u32| (v - offset as f32) / scale;
    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = unmap(d.landmarks[k * 2], offset_x);
                landmarks[k * 2 + 1] = unmap(d.landmarks[k * 2 + 1], offset_y);
            }
            Detection {
                bbox: [
                    unmap(d.bbox[0], offset_x),
                    unmap(d.bbox[1], offset_y),
                    d.bbox[2] / scale,
                    d.bbox[3] / scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    log::debug!("detector kept {} raw faces", detections.len());

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Cut the detected face out of the source image, clamped to its bounds.
pub fn crop_face(img: &DynamicImage, detection: &Detection) -> Result<DynamicImage> {
    let (w, h) = img.dimensions();
    let x0 = detection.bbox[0].max(0.0).floor() as u32;
    let y0 = detection.bbox[1].max(0.0).floor() as u32;
    let x1 = ((detection.bbox[0] + detection.bbox[2]).ceil().max(0.0) as u32).min(w);
    let y1 = ((detection.bbox[1] + detection.bbox[3]).ceil().max(0.0) as u32).min(h);
    if x1 <= x0 || y1 <= y0 {
        bail!("face box {:?} lies outside the {}x{} image", detection.bbox, w, h);
    }
    Ok(img.crop_imm(x0, y0, x1 - x0, y1 - y0))
}

/// Horizontally mirrored copy of a face crop.
pub fn mirror(face: &DynamicImage) -> DynamicImage {
    face.fliph()
}

/// Encode a face crop into an L2-normalized embedding with the given model.
///
/// Both models take NHWC RGB input. ArcFace scales pixels to roughly [-1, 1];
/// Facenet512 standardizes each image to zero mean and unit variance.
pub fn encode_face(
    session: &mut Session,
    model: ModelName,
    face_img: &DynamicImage,
) -> Result<Array1<f32>> {
    let size = model.input_size();
    let rgb = face_img
        .resize_exact(size, size, imageops::FilterType::Triangle)
        .to_rgb8();
    let side = size as usize;

    let mut input = Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
        rgb.get_pixel(x as u32, y as u32)[c] as f32
    });
    match model {
        ModelName::ArcFace => input.mapv_inplace(|v| (v - 127.5) / 128.0),
        ModelName::Facenet512 => {
            let mean = input.mean().unwrap_or(0.0);
            let std = input.std(0.0).max(1.0 / (input.len() as f32).sqrt());
            input.mapv_inplace(|v| (v - mean) / std);
        }
    }

    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
    let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    if data.len() < EMBEDDING_DIM {
        bail!(
            "{model} produced {} values, expected {EMBEDDING_DIM}",
            data.len()
        );
    }

    Ok(l2_normalize(Array1::from(data[..EMBEDDING_DIM].to_vec())))
}

pub fn l2_normalize(mut v: Array1<f32>) -> Array1<f32> {
    let norm = v.dot(&v).sqrt();
    if norm > 0.0 {
        v.mapv_inplace(|x| x / norm);
    }
    v
}
