use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;
use ndarray::Array1;
use ort::session::Session;

use crate::face::{self, Detection};
use crate::model::{self, ModelName};

/// Source of face detections and per-model embeddings.
///
/// The recognition core only talks to this trait, so anything that can find
/// faces and embed them can drive identification.
pub trait EmbeddingProvider: Send {
    /// Find faces in `img`, most confident first.
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>>;

    /// Embed an already cropped face with one recognition model.
    fn embed(&mut self, model: ModelName, face: &DynamicImage) -> Result<Array1<f32>>;
}

/// ONNX pipeline: YuNet detector plus the ArcFace and Facenet512 encoders
pub struct Pipeline {
    pub detector: Session,
    pub arcface: Session,
    pub facenet: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Pipeline {
    pub fn new(detector: &Path, arcface: &Path, facenet: &Path) -> Result<Self> {
        Ok(Self {
            detector: model::load_session(detector).context("load detector model")?,
            arcface: model::load_session(arcface).context("load arcface model")?,
            facenet: model::load_session(facenet).context("load facenet model")?,
            // Low floor: callers apply their own confidence threshold
            score_threshold: 0.3,
            nms_threshold: 0.3,
        })
    }

    fn session(&mut self, model: ModelName) -> &mut Session {
        match model {
            ModelName::ArcFace => &mut self.arcface,
            ModelName::Facenet512 => &mut self.facenet,
        }
    }
}

impl EmbeddingProvider for Pipeline {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let mut detections = face::detect_faces(
            &mut self.detector,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")?;
        detections.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(detections)
    }

    fn embed(&mut self, model: ModelName, face_img: &DynamicImage) -> Result<Array1<f32>> {
        face::encode_face(self.session(model), model, face_img)
            .with_context(|| format!("encoding face with {model}"))
    }
}
