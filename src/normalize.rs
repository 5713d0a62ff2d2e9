//! Conversion of index-native numbers into plain JSON scalars and lists.
//!
//! Non-finite floats have no JSON form; they become `null`.

use ndarray::ArrayView1;
use serde::Serializer;
use serde_json::Value;

use crate::types::{FaceVectorId, ModelPrediction};

pub fn to_scalar(value: f32) -> Option<f64> {
    value.is_finite().then_some(value as f64)
}

pub fn to_id(id: FaceVectorId) -> u64 {
    id as u64
}

pub fn to_list(values: ArrayView1<'_, f32>) -> Vec<Option<f64>> {
    values.iter().map(|&v| to_scalar(v)).collect()
}

/// `serialize_with` adapter for `f32` fields.
pub fn scalar<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    match to_scalar(*value) {
        Some(v) => serializer.serialize_f64(v),
        None => serializer.serialize_none(),
    }
}

/// Types that can be rendered as portable JSON.
pub trait Portable {
    fn to_portable(&self) -> Value;
}

impl Portable for FaceVectorId {
    fn to_portable(&self) -> Value {
        Value::from(to_id(*self))
    }
}

impl<T: Portable> Portable for [T] {
    fn to_portable(&self) -> Value {
        Value::Array(self.iter().map(Portable::to_portable).collect())
    }
}

impl Portable for ModelPrediction {
    fn to_portable(&self) -> Value {
        serde_json::json!({
            "ids": self.ids.to_portable(),
            "distances": to_list(ArrayView1::from(self.distances.as_slice())),
        })
    }
}
