//! Request-scoped records shared by the search, fusion and compare paths.

use serde::Serialize;

/// Position of a vector in both similarity indices and in the registry.
pub type FaceVectorId = usize;

/// Neighbors returned by one model's index, nearest first.
///
/// `ids` and `distances` are parallel. The id type starts out as
/// [`FaceVectorId`] and is mapped to an identity key before fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPrediction<Id = FaceVectorId> {
    pub ids: Vec<Id>,
    pub distances: Vec<f32>,
}

impl<Id> ModelPrediction<Id> {
    pub fn new(ids: Vec<Id>, distances: Vec<f32>) -> Self {
        debug_assert_eq!(ids.len(), distances.len());
        Self { ids, distances }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Replace every id, dropping entries the mapping rejects.
    pub fn filter_map_ids<T>(self, mut f: impl FnMut(Id) -> Option<T>) -> ModelPrediction<T> {
        let mut ids = Vec::with_capacity(self.ids.len());
        let mut distances = Vec::with_capacity(self.distances.len());
        for (id, distance) in self.ids.into_iter().zip(self.distances) {
            if let Some(mapped) = f(id) {
                ids.push(mapped);
                distances.push(distance);
            }
        }
        ModelPrediction { ids, distances }
    }
}

/// An identity with its fused ensemble score in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedPrediction<Id> {
    pub identity: Id,
    #[serde(serialize_with = "crate::normalize::scalar")]
    pub score: f32,
}

/// A registry record as shown to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityMatch {
    pub id: String,
    pub name: String,
    /// Integer percent, `trunc(score * 100)`.
    pub confidence: u32,
    pub image: Option<String>,
    pub country: Option<String>,
    pub profile_url: Option<String>,
}

/// Truncating percent conversion used for every displayed confidence.
pub fn display_confidence(score: f32) -> u32 {
    if score.is_finite() && score > 0.0 {
        (score.min(1.0) * 100.0) as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_map_ids_keeps_pairs_aligned() {
        let pred = ModelPrediction::new(vec![0usize, 1, 2], vec![0.1, 0.2, 0.3]);
        let mapped = pred.filter_map_ids(|id| (id != 1).then(|| format!("p{id}")));
        assert_eq!(mapped.ids, vec!["p0".to_string(), "p2".to_string()]);
        assert_eq!(mapped.distances, vec![0.1, 0.3]);
    }

    #[test]
    fn test_display_confidence_truncates() {
        assert_eq!(display_confidence(0.879), 87);
        assert_eq!(display_confidence(1.0), 100);
        assert_eq!(display_confidence(f32::NAN), 0);
        assert_eq!(display_confidence(-0.2), 0);
    }
}
