use facefuse_vision::ModelName;
use ndarray::ArrayView1;
use serde::Serialize;

use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::normalize;
use crate::search::ModelSimilarities;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub person1: String,
    pub person2: String,
    #[serde(serialize_with = "normalize::scalar")]
    pub similarity: f32,
    #[serde(serialize_with = "normalize::scalar")]
    pub distance: f32,
    pub category: &'static str,
    pub model_similarities: ModelSimilarities,
}

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine_similarity(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    let norms = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if norms > 0.0 {
        a.dot(&b) / norms
    } else {
        0.0
    }
}

pub fn similarity_category(similarity: f32) -> &'static str {
    if similarity > 0.8 {
        "Very similar"
    } else if similarity > 0.6 {
        "Similar"
    } else if similarity > 0.4 {
        "Somewhat similar"
    } else {
        "Not very similar"
    }
}

/// Compare two identities by their stored vectors in both indices.
///
/// Names resolve to the first matching face id. Identical known names are
/// similarity 1.0 without touching the indices.
pub fn compare_two_faces(ctx: &ServiceContext, person1: &str, person2: &str) -> Result<Comparison> {
    if person1 == person2 {
        if !ctx.registry.contains_name(person1) {
            return Err(Error::not_found(format!("person '{person1}'")));
        }
        return Ok(Comparison {
            person1: person1.to_string(),
            person2: person2.to_string(),
            similarity: 1.0,
            distance: 0.0,
            category: similarity_category(1.0),
            model_similarities: ModelSimilarities {
                arcface: Some(1.0),
                facenet: Some(1.0),
            },
        });
    }

    let resolve = |name: &str| {
        ctx.registry
            .resolve_name(name)
            .ok_or_else(|| Error::not_found(format!("person '{name}'")))
    };
    let id1 = resolve(person1)?;
    let id2 = resolve(person2)?;

    let mut per_model = [0.0f32; 2];
    for (slot, model) in ModelName::ALL.into_iter().enumerate() {
        let index = ctx.index(model);
        let v1 = index.get_vector(id1)?;
        let v2 = index.get_vector(id2)?;
        per_model[slot] = cosine_similarity(v1.view(), v2.view());
    }

    let similarity = (per_model[0] + per_model[1]) / 2.0;
    Ok(Comparison {
        person1: person1.to_string(),
        person2: person2.to_string(),
        similarity,
        distance: 1.0 - similarity,
        category: similarity_category(similarity),
        model_similarities: ModelSimilarities {
            arcface: Some(per_model[0] as f64),
            facenet: Some(per_model[1] as f64),
        },
    })
}
