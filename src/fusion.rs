//! Ensemble fusion of per-model nearest-neighbor results.
//!
//! Each model's distances become a softmax confidence distribution; only each
//! model's top candidate votes. An identity survives when the weight share of
//! the models that picked it reaches `min_agreement`, so two models that
//! disagree produce no match instead of a blended one.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use facefuse_vision::ModelName;
use ndarray::{Array1, ArrayView1};

use crate::config::{FusionConfig, ModelWeights};
use crate::types::{FusedPrediction, ModelPrediction};

/// Min-max scale distances to [0, 1]. All-equal input yields all zeros.
pub fn normalize_distances(distances: ArrayView1<'_, f32>) -> Array1<f32> {
    let min = distances.iter().copied().fold(f32::INFINITY, f32::min);
    let max = distances.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range.is_nan() || range <= 0.0 {
        return Array1::zeros(distances.len());
    }
    distances.mapv(|d| (d - min) / range)
}

/// Softmax over negated normalized distances: nearer candidates get more mass.
pub fn compute_model_confidence(distances: ArrayView1<'_, f32>, temperature: f32) -> Array1<f32> {
    if distances.is_empty() {
        return Array1::zeros(0);
    }
    let logits = normalize_distances(distances).mapv(|d| -d / temperature);
    let peak = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let exp = logits.mapv(|x| (x - peak).exp());
    let total = exp.sum();
    exp / total
}

#[derive(Debug, Clone)]
pub struct EnsembleFusion {
    pub temperature: f32,
    pub min_agreement: f32,
    pub boost: f32,
    pub weights: Option<ModelWeights>,
}

impl Default for EnsembleFusion {
    fn default() -> Self {
        Self::from_config(&FusionConfig::default())
    }
}

struct Tally {
    votes: f32,
    confidences: Vec<f32>,
}

impl EnsembleFusion {
    pub fn from_config(cfg: &FusionConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            min_agreement: cfg.min_agreement,
            boost: cfg.boost,
            weights: cfg.weights,
        }
    }

    fn weight(&self, model: ModelName) -> f32 {
        self.weights.map_or(1.0, |w| w.get(model))
    }

    /// Fuse per-model predictions into identities ranked by score, highest
    /// first. Ties keep the order in which identities were first voted for.
    pub fn fuse<Id>(
        &self,
        predictions: &BTreeMap<ModelName, ModelPrediction<Id>>,
    ) -> Vec<FusedPrediction<Id>>
    where
        Id: Clone + Eq + Hash,
    {
        let mut order: Vec<Id> = Vec::new();
        let mut tallies: HashMap<Id, Tally> = HashMap::new();
        let mut total_weight = 0.0f32;

        for (&model, prediction) in predictions {
            let Some(top) = prediction.ids.first() else {
                continue;
            };
            let weight = self.weight(model);
            total_weight += weight;

            let distances = ArrayView1::from(prediction.distances.as_slice());
            let confidence = compute_model_confidence(distances, self.temperature)[0];

            let tally = tallies.entry(top.clone()).or_insert_with(|| {
                order.push(top.clone());
                Tally {
                    votes: 0.0,
                    confidences: Vec::new(),
                }
            });
            tally.votes += weight;
            tally.confidences.push(confidence);
        }

        if total_weight.is_nan() || total_weight <= 0.0 {
            return Vec::new();
        }

        let mut fused: Vec<FusedPrediction<Id>> = order
            .into_iter()
            .filter_map(|identity| {
                let tally = &tallies[&identity];
                let agreement = tally.votes / total_weight;
                if agreement < self.min_agreement {
                    return None;
                }
                let mean_confidence =
                    tally.confidences.iter().sum::<f32>() / tally.confidences.len() as f32;
                let score = (agreement * mean_confidence * self.boost).min(1.0);
                Some(FusedPrediction { identity, score })
            })
            .collect();

        fused.sort_by(|a, b| b.score.total_cmp(&a.score));
        log::debug!("fusion kept {} identities", fused.len());
        fused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn predictions(
        arc: (Vec<&'static str>, Vec<f32>),
        facenet: (Vec<&'static str>, Vec<f32>),
    ) -> BTreeMap<ModelName, ModelPrediction<&'static str>> {
        BTreeMap::from([
            (ModelName::ArcFace, ModelPrediction::new(arc.0, arc.1)),
            (ModelName::Facenet512, ModelPrediction::new(facenet.0, facenet.1)),
        ])
    }

    #[test]
    fn test_normalize_equal_distances_is_zero() {
        let normalized = normalize_distances(array![0.4, 0.4, 0.4].view());
        assert_eq!(normalized, array![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_normalize_scales_to_unit_range() {
        let normalized = normalize_distances(array![0.2, 0.6, 1.0].view());
        assert!((normalized[0] - 0.0).abs() < 1e-6);
        assert!((normalized[1] - 0.5).abs() < 1e-6);
        assert!((normalized[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_sums_to_one() {
        for distances in [
            array![0.1, 0.5, 0.9, 1.3],
            array![0.3, 0.3],
            array![0.7],
            array![0.0, 2.0, 0.001, 5.0, 5.0],
        ] {
            let confidence = compute_model_confidence(distances.view(), 0.1);
            assert!((confidence.sum() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_confidence_prefers_nearest() {
        let confidence = compute_model_confidence(array![0.2, 0.4, 0.8].view(), 0.1);
        assert!(confidence[0] > confidence[1]);
        assert!(confidence[1] > confidence[2]);
    }

    #[test]
    fn test_agreeing_models_are_capped_at_one() {
        let fusion = EnsembleFusion::default();
        let preds = predictions(
            (vec!["alice", "bob"], vec![0.1, 0.9]),
            (vec!["alice", "carol"], vec![0.2, 0.8]),
        );
        let fused = fusion.fuse(&preds);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].identity, "alice");
        // agreement 1.0 * confidence ~1.0 * boost 1.8 is clipped
        assert_eq!(fused[0].score, 1.0);
    }

    #[test]
    fn test_disagreement_at_half_keeps_both() {
        let fusion = EnsembleFusion::default();
        let preds = predictions(
            (vec!["alice", "bob"], vec![0.1, 0.5]),
            (vec!["bob", "alice"], vec![0.3, 0.4]),
        );
        let fused = fusion.fuse(&preds);
        assert_eq!(fused.len(), 2);
        assert!(fused.iter().all(|f| f.score <= 1.0));
        let ids: Vec<_> = fused.iter().map(|f| f.identity).collect();
        assert!(ids.contains(&"alice") && ids.contains(&"bob"));
    }

    #[test]
    fn test_disagreement_above_half_keeps_none() {
        let fusion = EnsembleFusion {
            min_agreement: 0.51,
            ..EnsembleFusion::default()
        };
        let preds = predictions(
            (vec!["alice", "bob"], vec![0.1, 0.5]),
            (vec!["bob", "alice"], vec![0.3, 0.4]),
        );
        assert!(fusion.fuse(&preds).is_empty());
    }

    #[test]
    fn test_single_vote_score() {
        // Flat distances give uniform confidence: 0.5 * 0.5 * 1.8 = 0.45
        let fusion = EnsembleFusion::default();
        let preds = predictions(
            (vec!["alice", "bob"], vec![0.3, 0.3]),
            (vec!["carol", "dave"], vec![0.2, 0.2]),
        );
        let fused = fusion.fuse(&preds);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].score - 0.45).abs() < 1e-6);
        // equal scores keep discovery order: arcface votes first
        assert_eq!(fused[0].identity, "alice");
        assert_eq!(fused[1].identity, "carol");
    }

    #[test]
    fn test_skewed_weights_let_one_model_win() {
        let fusion = EnsembleFusion {
            weights: Some(ModelWeights::new(3.0, 1.0)),
            ..EnsembleFusion::default()
        };
        let preds = predictions(
            (vec!["alice", "bob"], vec![0.1, 0.5]),
            (vec!["bob", "alice"], vec![0.3, 0.4]),
        );
        let fused = fusion.fuse(&preds);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].identity, "alice");
    }

    #[test]
    fn test_empty_predictions() {
        let fusion = EnsembleFusion::default();
        let preds: BTreeMap<ModelName, ModelPrediction<&str>> = BTreeMap::from([(
            ModelName::ArcFace,
            ModelPrediction::new(Vec::new(), Vec::new()),
        )]);
        assert!(fusion.fuse(&preds).is_empty());
    }
}
