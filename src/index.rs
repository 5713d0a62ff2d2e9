use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{FaceVectorId, ModelPrediction};

/// Read-only nearest-neighbor index over one model's embedding space.
///
/// Implementations must be safe to query from several request threads at
/// once; the service shares a single instance per model.
pub trait SimilarityIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dim(&self) -> usize;

    /// The `k` nearest stored vectors, ascending by distance.
    fn query(&self, vector: ArrayView1<'_, f32>, k: usize) -> Result<ModelPrediction>;

    /// The stored vector for `id`.
    fn get_vector(&self, id: FaceVectorId) -> Result<Array1<f32>>;
}

/// On-disk form of a [`FlatIndex`]: one row per face vector id.
#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    dim: u32,
    vectors: Vec<Vec<f32>>,
}

/// Exact cosine-distance index over L2-normalized rows.
pub struct FlatIndex {
    rows: Array2<f32>,
    max_results: Option<usize>,
}

impl FlatIndex {
    pub fn from_vectors(dim: usize, vectors: Vec<Vec<f32>>) -> AnyResult<Self> {
        let count = vectors.len();
        let mut flat = Vec::with_capacity(count * dim);
        for (id, v) in vectors.into_iter().enumerate() {
            if v.len() != dim {
                anyhow::bail!("vector {} has {} values, expected {}", id, v.len(), dim);
            }
            flat.extend(normalized(Array1::from(v)));
        }
        Ok(Self {
            rows: Array2::from_shape_vec((count, dim), flat)?,
            max_results: None,
        })
    }

    /// Refuse queries asking for more than `max` neighbors.
    pub fn with_max_results(mut self, max: Option<usize>) -> Self {
        self.max_results = max;
        self
    }

    pub fn load(path: &Path) -> AnyResult<Self> {
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let file: IndexFile =
            postcard::from_bytes(&data).with_context(|| format!("decoding {}", path.display()))?;
        let index = Self::from_vectors(file.dim as usize, file.vectors)?;
        log::info!(
            "loaded {} vectors of dim {} from {}",
            index.len(),
            index.dim(),
            path.display()
        );
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> AnyResult<()> {
        let file = IndexFile {
            dim: self.dim() as u32,
            vectors: self.rows.outer_iter().map(|r| r.to_vec()).collect(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, postcard::to_allocvec(&file)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

fn normalized(mut v: Array1<f32>) -> Array1<f32> {
    let norm = v.dot(&v).sqrt();
    if norm > 0.0 {
        v /= norm;
    }
    v
}

impl SimilarityIndex for FlatIndex {
    fn len(&self) -> usize {
        self.rows.len_of(Axis(0))
    }

    fn dim(&self) -> usize {
        self.rows.len_of(Axis(1))
    }

    fn query(&self, vector: ArrayView1<'_, f32>, k: usize) -> Result<ModelPrediction> {
        if let Some(max) = self.max_results {
            if k > max {
                return Err(Error::IndexCapacityExceeded { requested: k });
            }
        }
        if vector.len() != self.dim() {
            return Err(Error::validation(format!(
                "query has {} values, index dimension is {}",
                vector.len(),
                self.dim()
            )));
        }

        let probe = normalized(vector.to_owned());
        let similarities = self.rows.dot(&probe);
        let mut order: Vec<FaceVectorId> = (0..self.len()).collect();
        order.sort_by(|&a, &b| similarities[b].total_cmp(&similarities[a]));
        order.truncate(k);

        let distances = order.iter().map(|&id| 1.0 - similarities[id]).collect();
        Ok(ModelPrediction::new(order, distances))
    }

    fn get_vector(&self, id: FaceVectorId) -> Result<Array1<f32>> {
        if id >= self.len() {
            return Err(Error::not_found(format!("vector for face id {id}")));
        }
        Ok(self.rows.row(id).to_owned())
    }
}
