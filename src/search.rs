//! Closest-identity search straight against both indices, without fusion.

use std::collections::HashMap;

use facefuse_vision::ModelName;
use ndarray::ArrayView1;
use serde::Serialize;
use serde_json::Value;

use crate::config::{ModelWeights, SearchConfig};
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::index::SimilarityIndex;
use crate::normalize::{to_id, to_scalar, Portable};
use crate::types::{FaceVectorId, IdentityMatch, ModelPrediction};

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub name: String,
    pub num_results: usize,
    pub tolerance: f32,
    pub weights: ModelWeights,
}

/// Per-model cosine similarity of a candidate; `None` when that model's
/// index did not return it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelSimilarities {
    pub arcface: Option<f64>,
    pub facenet: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosestMatch {
    #[serde(flatten)]
    pub identity: IdentityMatch,
    pub face_id: u64,
    pub similarity: Option<f64>,
    pub model_similarities: ModelSimilarities,
}

/// What the search saw when no candidate cleared the tolerance.
#[derive(Debug, Clone, Serialize)]
pub struct SearchDiagnostic {
    pub message: String,
    pub target: String,
    pub target_id: u64,
    pub population: u64,
    pub arcface_results: u64,
    pub facenet_results: u64,
    pub candidates_scored: u64,
    pub tolerance: Option<f64>,
    pub best_similarity: Option<f64>,
    pub arcface_sample: Value,
    pub facenet_sample: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClosestFaces {
    Matches(Vec<ClosestMatch>),
    Diagnostic(SearchDiagnostic),
}

/// Neighbor counts to try for a population of `population`: everything, then
/// the smaller ladder steps, then the final fallback.
pub fn capacity_attempts(population: usize, cfg: &SearchConfig) -> Vec<usize> {
    let mut attempts = vec![population];
    attempts.extend(
        cfg.capacity_ladder
            .iter()
            .copied()
            .filter(|&step| step < population),
    );
    attempts.push(cfg.final_fallback.min(population));
    attempts.dedup();
    attempts
}

/// Query `index`, shrinking the neighbor count while it reports that the
/// request exceeds its capacity. Any other failure is returned immediately.
pub fn query_with_ladder(
    index: &dyn SimilarityIndex,
    vector: ArrayView1<'_, f32>,
    cfg: &SearchConfig,
) -> Result<ModelPrediction> {
    let mut last = index.len();
    for k in capacity_attempts(index.len(), cfg) {
        match index.query(vector, k) {
            Err(Error::IndexCapacityExceeded { requested }) => {
                log::warn!("index refused {requested} neighbors, retrying smaller");
                last = requested;
            }
            other => return other,
        }
    }
    Err(Error::IndexCapacityExceeded { requested: last })
}

struct Candidate {
    id: FaceVectorId,
    similarities: [Option<f32>; 2],
}

impl Candidate {
    fn weighted_similarity(&self, weights: &ModelWeights) -> Option<f32> {
        let mut sum = 0.0;
        let mut total = 0.0;
        for (model, similarity) in ModelName::ALL.iter().zip(self.similarities) {
            if let Some(s) = similarity {
                let w = weights.get(*model);
                sum += w * s;
                total += w;
            }
        }
        (total > 0.0).then(|| sum / total)
    }
}

fn sample(ctx: &ServiceContext, prediction: &ModelPrediction, limit: usize) -> Value {
    let head = ModelPrediction::new(
        prediction.ids.iter().take(limit).copied().collect(),
        prediction.distances.iter().take(limit).copied().collect(),
    );
    let names: Vec<Option<&str>> = head
        .ids
        .iter()
        .map(|&id| ctx.registry.record_for(id).map(|r| r.name.as_str()))
        .collect();
    let mut value = head.to_portable();
    value["names"] = serde_json::json!(names);
    value
}

/// Identities most similar to the named one across the whole population.
pub fn find_closest_faces(ctx: &ServiceContext, req: &SearchRequest) -> Result<ClosestFaces> {
    if req.num_results == 0 {
        return Err(Error::validation("num_results must be at least 1"));
    }
    let target = ctx
        .registry
        .resolve_name(&req.name)
        .ok_or_else(|| Error::not_found(format!("person '{}'", req.name)))?;

    let mut results = Vec::with_capacity(ModelName::ALL.len());
    for model in ModelName::ALL {
        let index = ctx.index(model);
        let vector = index.get_vector(target)?;
        let mut neighbors = query_with_ladder(index, vector.view(), &ctx.search)?;
        neighbors = neighbors.filter_map_ids(|id| (id != target).then_some(id));
        log::debug!("{model} returned {} neighbors", neighbors.len());
        results.push(neighbors);
    }

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut position: HashMap<FaceVectorId, usize> = HashMap::new();
    for (slot, neighbors) in results.iter().enumerate() {
        for (&id, &distance) in neighbors.ids.iter().zip(&neighbors.distances) {
            let at = *position.entry(id).or_insert_with(|| {
                candidates.push(Candidate {
                    id,
                    similarities: [None, None],
                });
                candidates.len() - 1
            });
            candidates[at].similarities[slot] = Some(1.0 - distance);
        }
    }

    let mut best_similarity: Option<f32> = None;
    let mut matches: Vec<ClosestMatch> = Vec::new();
    for candidate in &candidates {
        let Some(similarity) = candidate.weighted_similarity(&req.weights) else {
            continue;
        };
        best_similarity = Some(best_similarity.map_or(similarity, |b| b.max(similarity)));
        if similarity < req.tolerance {
            continue;
        }
        let Some(ext) = ctx.registry.external_id(candidate.id) else {
            continue;
        };
        let Some(identity) = ctx.registry.identity_match(ext, similarity) else {
            continue;
        };
        let [arcface, facenet] = candidate.similarities;
        matches.push(ClosestMatch {
            identity,
            face_id: to_id(candidate.id),
            similarity: to_scalar(similarity),
            model_similarities: ModelSimilarities {
                arcface: arcface.and_then(to_scalar),
                facenet: facenet.and_then(to_scalar),
            },
        });
    }

    if matches.is_empty() {
        log::info!(
            "no candidate for '{}' cleared tolerance {:.3}",
            req.name,
            req.tolerance
        );
        let samples = ctx.search.diagnostic_samples;
        return Ok(ClosestFaces::Diagnostic(SearchDiagnostic {
            message: format!(
                "no faces similar to '{}' above tolerance {}",
                req.name, req.tolerance
            ),
            target: req.name.clone(),
            target_id: to_id(target),
            population: ctx.population() as u64,
            arcface_results: results[0].len() as u64,
            facenet_results: results[1].len() as u64,
            candidates_scored: candidates.len() as u64,
            tolerance: to_scalar(req.tolerance),
            best_similarity: best_similarity.and_then(to_scalar),
            arcface_sample: sample(ctx, &results[0], samples),
            facenet_sample: sample(ctx, &results[1], samples),
        }));
    }

    matches.sort_by(|a, b| b.identity.confidence.cmp(&a.identity.confidence));
    matches.truncate(req.num_results);
    Ok(ClosestFaces::Matches(matches))
}
