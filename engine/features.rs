//! # Feature Schema
//!
//! The fixed, ordered list of thirty morphological measurements that every task
//! shares. Ten measurements are each reported three ways (mean, standard error,
//! worst), always in that block order. Every estimator, scaler and imputer in the
//! registry is fitted against exactly this column order, so the schema is the
//! contract that makes artifacts interchangeable between training and inference.

use ndarray::{Array1, ArrayView1};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use thiserror::Error;

/// Number of columns in the schema.
pub const FEATURE_COUNT: usize = 30;

/// Canonical column order. Index positions are part of the contract: the genetic
/// heuristic reads positions 0, 1 and 2 directly.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "radius_mean",
    "texture_mean",
    "perimeter_mean",
    "area_mean",
    "smoothness_mean",
    "compactness_mean",
    "concavity_mean",
    "concave_points_mean",
    "symmetry_mean",
    "fractal_dimension_mean",
    "radius_se",
    "texture_se",
    "perimeter_se",
    "area_se",
    "smoothness_se",
    "compactness_se",
    "concavity_se",
    "concave_points_se",
    "symmetry_se",
    "fractal_dimension_se",
    "radius_worst",
    "texture_worst",
    "perimeter_worst",
    "area_worst",
    "smoothness_worst",
    "compactness_worst",
    "concavity_worst",
    "concave_points_worst",
    "symmetry_worst",
    "fractal_dimension_worst",
];

/// Returns the schema as owned strings, the form stored in slot metadata.
pub fn feature_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|name| name.to_string()).collect()
}

/// Position of a column in the schema.
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|candidate| *candidate == name)
}

#[derive(Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("A feature vector needs exactly {expected} values, but {found} were supplied.")]
    WrongLength { expected: usize, found: usize },
    #[error("The feature '{0}' is not part of the schema.")]
    UnknownFeature(String),
    #[error("The required feature '{0}' is missing.")]
    MissingFeature(String),
}

/// One case: thirty raw, unscaled measurements in schema order.
///
/// Built once by the caller and never mutated afterwards. Presence and
/// non-negativity are the caller's responsibility; the core only relies on the
/// length, which the type itself guarantees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self { values }
    }

    pub fn from_slice(values: &[f64]) -> Result<Self, SchemaError> {
        let values: [f64; FEATURE_COUNT] =
            values.try_into().map_err(|_| SchemaError::WrongLength {
                expected: FEATURE_COUNT,
                found: values.len(),
            })?;
        Ok(Self { values })
    }

    /// Builds a vector from `name -> value` pairs. Every schema column must be
    /// present and no foreign names are accepted.
    pub fn from_named(named: &BTreeMap<String, f64>) -> Result<Self, SchemaError> {
        if let Some(unknown) = named.keys().find(|name| feature_index(name).is_none()) {
            return Err(SchemaError::UnknownFeature(unknown.clone()));
        }
        let mut values = [0.0; FEATURE_COUNT];
        for (slot, name) in values.iter_mut().zip(FEATURE_NAMES.iter()) {
            *slot = *named
                .get(*name)
                .ok_or_else(|| SchemaError::MissingFeature(name.to_string()))?;
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(&self.values[..])
    }

    pub fn to_array(&self) -> Array1<f64> {
        Array1::from(self.values.to_vec())
    }

    pub fn to_named(&self) -> BTreeMap<String, f64> {
        FEATURE_NAMES
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }
}

// Wire form is the named-field object callers already produce, not a bare array.
impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_named().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FeatureVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let named = BTreeMap::<String, f64>::deserialize(deserializer)?;
        FeatureVector::from_named(&named).map_err(D::Error::custom)
    }
}
