//! Identify the faces in an image: detect, embed with every model (plus a
//! mirrored crop), query each index and fuse the votes.

use std::collections::BTreeMap;
use std::io::Cursor;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use facefuse_vision::{face, Detection, EmbeddingProvider, ModelName};
use image::{DynamicImage, ImageFormat};
use ndarray::Array1;
use serde::Serialize;

use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::fusion::EnsembleFusion;
use crate::normalize;
use crate::types::{IdentityMatch, ModelPrediction};

/// One detected face with its ranked identities.
#[derive(Debug, Clone, Serialize)]
pub struct FaceResult {
    /// Base64 JPEG of the face crop.
    pub image: String,
    /// Detector confidence.
    #[serde(serialize_with = "normalize::scalar")]
    pub confidence: f32,
    pub performers: Vec<IdentityMatch>,
}

/// Decode a base64 image, accepting an optional `data:` URL prefix.
pub fn decode_image(encoded: &str) -> Result<DynamicImage> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::validation(format!("image is not valid base64: {e}")))?;
    image::load_from_memory(&bytes)
        .map_err(|e| Error::validation(format!("image could not be decoded: {e}")))
}

pub fn encode_jpeg(img: &DynamicImage) -> Result<String> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .context("encoding face crop")?;
    Ok(STANDARD.encode(buf))
}

/// Average of the embeddings of a face and its mirror image.
pub fn embed_mirrored(
    provider: &mut dyn EmbeddingProvider,
    model: ModelName,
    face_img: &DynamicImage,
) -> Result<Array1<f32>> {
    let original = provider.embed(model, face_img)?;
    let mirrored = provider.embed(model, &face::mirror(face_img))?;
    if original.len() != mirrored.len() {
        return Err(anyhow::anyhow!(
            "{model} returned embeddings of different lengths ({} and {})",
            original.len(),
            mirrored.len()
        )
        .into());
    }
    Ok((original + mirrored) / 2.0)
}

/// Rank identities for one cropped face.
pub fn predict_face(
    ctx: &ServiceContext,
    provider: &mut dyn EmbeddingProvider,
    face_img: &DynamicImage,
    results: usize,
) -> Result<Vec<IdentityMatch>> {
    let k = results.max(ctx.fusion.candidate_floor);

    let mut predictions: BTreeMap<ModelName, ModelPrediction<String>> = BTreeMap::new();
    for model in ModelName::ALL {
        let embedding = embed_mirrored(provider, model, face_img)?;
        let neighbors = ctx.index(model).query(embedding.view(), k)?;
        let by_identity =
            neighbors.filter_map_ids(|id| ctx.registry.external_id(id).map(str::to_string));
        predictions.insert(model, by_identity);
    }

    let fused = EnsembleFusion::from_config(&ctx.fusion).fuse(&predictions);
    Ok(fused
        .iter()
        .filter_map(|f| ctx.registry.identity_match(&f.identity, f.score))
        .take(results)
        .collect())
}

fn detect(provider: &mut dyn EmbeddingProvider, img: &DynamicImage) -> Result<Vec<Detection>> {
    let faces = provider.detect(img)?;
    if faces.is_empty() {
        return Err(Error::NoFaceDetected);
    }
    Ok(faces)
}

/// Ranked identities for the most prominent face (largest box).
pub fn predict_best_face(
    ctx: &ServiceContext,
    provider: &mut dyn EmbeddingProvider,
    img: &DynamicImage,
    threshold: f32,
    results: usize,
) -> Result<Vec<IdentityMatch>> {
    let faces = detect(provider, img)?;
    let best = faces
        .iter()
        .max_by(|a, b| a.area().total_cmp(&b.area()))
        .ok_or(Error::NoFaceDetected)?;
    if best.score < threshold {
        log::info!(
            "largest face scored {:.3}, below threshold {:.3}",
            best.score,
            threshold
        );
        return Err(Error::NoFaceDetected);
    }

    let crop = face::crop_face(img, best)?;
    predict_face(ctx, provider, &crop, results)
}

/// One entry per face at or above `threshold`.
pub fn predict_all_faces(
    ctx: &ServiceContext,
    provider: &mut dyn EmbeddingProvider,
    img: &DynamicImage,
    threshold: f32,
    results: usize,
) -> Result<Vec<FaceResult>> {
    let faces = detect(provider, img)?;
    let mut out = Vec::new();
    for detection in faces.iter().filter(|d| d.score >= threshold) {
        let crop = face::crop_face(img, detection)?;
        let performers = predict_face(ctx, provider, &crop, results)?;
        out.push(FaceResult {
            image: encode_jpeg(&crop)?,
            confidence: detection.score,
            performers,
        });
    }
    log::info!("identified {} of {} detected faces", out.len(), faces.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        calls: usize,
    }

    impl EmbeddingProvider for Counting {
        fn detect(&mut self, _img: &DynamicImage) -> anyhow::Result<Vec<Detection>> {
            Ok(Vec::new())
        }

        fn embed(&mut self, _model: ModelName, _face: &DynamicImage) -> anyhow::Result<Array1<f32>> {
            self.calls += 1;
            // first call sees the original, second the mirror
            Ok(if self.calls == 1 {
                Array1::from(vec![1.0, 0.0])
            } else {
                Array1::from(vec![0.0, 1.0])
            })
        }
    }

    #[test]
    fn test_embed_mirrored_averages() {
        let mut provider = Counting { calls: 0 };
        let img = DynamicImage::new_rgb8(4, 4);
        let v = embed_mirrored(&mut provider, ModelName::ArcFace, &img).unwrap();
        assert_eq!(provider.calls, 2);
        assert_eq!(v, Array1::from(vec![0.5, 0.5]));
    }

    #[test]
    fn test_decode_image_round_trip_with_data_url() {
        let img = DynamicImage::new_rgb8(8, 6);
        let encoded = encode_jpeg(&img).unwrap();
        let decoded = decode_image(&format!("data:image/jpeg;base64,{encoded}")).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        assert!(matches!(
            decode_image("not an image!"),
            Err(Error::Validation { .. })
        ));
    }
}
