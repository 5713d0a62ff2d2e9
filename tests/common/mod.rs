//! Shared fixtures: a six-vector population in two 4-d spaces and a stub
//! embedding provider.
#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::Result;
use facefuse::config::{FusionConfig, SearchConfig};
use facefuse::index::{FlatIndex, SimilarityIndex};
use facefuse::registry::{IdentityRecord, Registry};
use facefuse::types::{FaceVectorId, ModelPrediction};
use facefuse::{Detection, EmbeddingProvider, Error, ModelName, ServiceContext};
use image::DynamicImage;
use ndarray::{Array1, ArrayView1};

pub const DIM: usize = 4;

/// (external id, name, arcface vector, facenet vector)
pub fn people() -> Vec<(&'static str, &'static str, [f32; 4], [f32; 4])> {
    vec![
        ("a", "Alice", [1.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]),
        ("b", "Bob", [0.8, 0.6, 0.0, 0.0], [0.6, 0.8, 0.0, 0.0]),
        ("c", "Carol", [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]),
        ("d", "Dave", [0.0, 0.0, 1.0, 0.0], [0.0, 1.0, 0.0, 0.0]),
        ("e", "Eve", [0.0, 0.0, 0.0, 1.0], [0.0, 0.0, 0.0, 1.0]),
        // second vector named Alice; name lookups must keep resolving to id 0
        ("a2", "Alice", [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]),
    ]
}

pub fn registry() -> Registry {
    let mut faces = Vec::new();
    let mut records = HashMap::new();
    for (ext, name, _, _) in people() {
        faces.push(ext.to_string());
        records.insert(
            ext.to_string(),
            IdentityRecord {
                name: name.to_string(),
                image: Some(format!("https://img.example/{ext}.jpg")),
                country: Some("NL".to_string()),
                profile_url: Some(format!("https://profiles.example/{ext}")),
            },
        );
    }
    Registry::new(faces, records)
}

pub fn arcface_index() -> FlatIndex {
    FlatIndex::from_vectors(DIM, people().iter().map(|p| p.2.to_vec()).collect()).unwrap()
}

pub fn facenet_index() -> FlatIndex {
    FlatIndex::from_vectors(DIM, people().iter().map(|p| p.3.to_vec()).collect()).unwrap()
}

pub fn context_with(
    arcface: Box<dyn SimilarityIndex>,
    facenet: Box<dyn SimilarityIndex>,
) -> ServiceContext {
    ServiceContext::new(
        arcface,
        facenet,
        registry(),
        FusionConfig::default(),
        SearchConfig::default(),
    )
    .unwrap()
}

pub fn context() -> ServiceContext {
    let _ = env_logger::builder().is_test(true).try_init();
    context_with(Box::new(arcface_index()), Box::new(facenet_index()))
}

/// Index that fails the test if it is ever read.
pub struct Untouchable(pub usize);

impl SimilarityIndex for Untouchable {
    fn len(&self) -> usize {
        self.0
    }

    fn dim(&self) -> usize {
        DIM
    }

    fn query(&self, _vector: ArrayView1<'_, f32>, _k: usize) -> facefuse::Result<ModelPrediction> {
        panic!("index queried");
    }

    fn get_vector(&self, _id: FaceVectorId) -> facefuse::Result<Array1<f32>> {
        panic!("index read");
    }
}

/// Wraps an index and reports one id's vector as missing.
pub struct MissingVector {
    pub inner: FlatIndex,
    pub missing: FaceVectorId,
}

impl SimilarityIndex for MissingVector {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn query(&self, vector: ArrayView1<'_, f32>, k: usize) -> facefuse::Result<ModelPrediction> {
        self.inner.query(vector, k)
    }

    fn get_vector(&self, id: FaceVectorId) -> facefuse::Result<Array1<f32>> {
        if id == self.missing {
            return Err(Error::not_found(format!("vector for face id {id}")));
        }
        self.inner.get_vector(id)
    }
}

/// Provider returning canned detections and one fixed embedding per model.
pub struct StubProvider {
    pub detections: Vec<Detection>,
    pub embeddings: HashMap<ModelName, Array1<f32>>,
}

impl StubProvider {
    /// Detects one face and embeds it as the person at `id`.
    pub fn seeing(id: usize, score: f32) -> Self {
        let person = &people()[id];
        Self {
            detections: vec![detection([8.0, 8.0, 32.0, 32.0], score)],
            embeddings: HashMap::from([
                (ModelName::ArcFace, Array1::from(person.2.to_vec())),
                (ModelName::Facenet512, Array1::from(person.3.to_vec())),
            ]),
        }
    }
}

impl EmbeddingProvider for StubProvider {
    fn detect(&mut self, _img: &DynamicImage) -> Result<Vec<Detection>> {
        Ok(self.detections.clone())
    }

    fn embed(&mut self, model: ModelName, _face: &DynamicImage) -> Result<Array1<f32>> {
        self.embeddings
            .get(&model)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no embedding for {model}"))
    }
}

pub fn detection(bbox: [f32; 4], score: f32) -> Detection {
    Detection {
        bbox,
        score,
        landmarks: [0.0; 10],
    }
}

pub fn test_image() -> DynamicImage {
    DynamicImage::new_rgb8(64, 64)
}
