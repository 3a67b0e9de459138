//! # Estimator Families
//!
//! The registry treats estimators as opaque trainable/predictable units. Two
//! families exist, and which one a task uses is a fixed policy decided in
//! `training`, not here. Both produce a full class-probability vector for a
//! single scaled row; the predicted class is always the arg-max of that vector.

pub mod boosting;
pub mod forest;
pub mod tree;

pub use boosting::GradientBoostingClassifier;
pub use forest::RandomForestClassifier;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("Cannot fit an estimator on an empty training set.")]
    EmptyTrainingSet,
    #[error("Training matrix has {rows} rows but {labels} labels were supplied.")]
    LabelCountMismatch { rows: usize, labels: usize },
    #[error("At least two classes are required to fit a classifier; found {0}.")]
    TooFewClasses(usize),
    #[error("Estimator was fitted on {expected} features but received {found}.")]
    FeatureCountMismatch { expected: usize, found: usize },
}

/// Hyperparameters for the bagged forest used by every task except diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

/// Hyperparameters for the boosted ensemble used by the diagnosis task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimatorFamily {
    GradientBoosting,
    RandomForest,
}

impl EstimatorFamily {
    /// Name reported by the model-info query.
    pub fn name(self) -> &'static str {
        match self {
            EstimatorFamily::GradientBoosting => "GradientBoostingClassifier",
            EstimatorFamily::RandomForest => "RandomForestClassifier",
        }
    }
}

/// A fitted estimator of either family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Estimator {
    GradientBoosting(GradientBoostingClassifier),
    RandomForest(RandomForestClassifier),
}

impl Estimator {
    /// Fits an estimator of the requested family on scaled rows and
    /// integer-encoded labels in `0..n_classes`.
    pub fn fit(
        family: EstimatorFamily,
        x: ArrayView2<f64>,
        labels: &[usize],
        n_classes: usize,
        forest: &ForestParams,
        boosting: &BoostingParams,
        seed: u64,
    ) -> Result<Self, EstimatorError> {
        Ok(match family {
            EstimatorFamily::GradientBoosting => Estimator::GradientBoosting(
                GradientBoostingClassifier::fit(x, labels, n_classes, boosting, seed)?,
            ),
            EstimatorFamily::RandomForest => Estimator::RandomForest(
                RandomForestClassifier::fit(x, labels, n_classes, forest, seed)?,
            ),
        })
    }

    pub fn family(&self) -> EstimatorFamily {
        match self {
            Estimator::GradientBoosting(_) => EstimatorFamily::GradientBoosting,
            Estimator::RandomForest(_) => EstimatorFamily::RandomForest,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Estimator::GradientBoosting(model) => model.n_features(),
            Estimator::RandomForest(model) => model.n_features(),
        }
    }

    pub fn n_classes(&self) -> usize {
        match self {
            Estimator::GradientBoosting(model) => model.n_classes(),
            Estimator::RandomForest(model) => model.n_classes(),
        }
    }

    /// Structural consistency of a fitted model, for estimators that arrive
    /// from outside this process. The message names the first defect found.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Estimator::GradientBoosting(model) => model.validate(),
            Estimator::RandomForest(model) => model.validate(),
        }
    }

    pub fn predict_proba(&self, row: ArrayView1<f64>) -> Result<Array1<f64>, EstimatorError> {
        if row.len() != self.n_features() {
            return Err(EstimatorError::FeatureCountMismatch {
                expected: self.n_features(),
                found: row.len(),
            });
        }
        Ok(match self {
            Estimator::GradientBoosting(model) => model.predict_proba(row),
            Estimator::RandomForest(model) => model.predict_proba(row),
        })
    }

    /// Predicted class index together with the full distribution.
    pub fn predict(&self, row: ArrayView1<f64>) -> Result<(usize, Array1<f64>), EstimatorError> {
        let probabilities = self.predict_proba(row)?;
        Ok((argmax(probabilities.view()), probabilities))
    }
}

/// Index of the largest entry; the first one wins ties.
pub fn argmax(values: ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

pub(crate) fn validate_training_input(
    x: ArrayView2<f64>,
    labels: usize,
    n_classes: usize,
) -> Result<(), EstimatorError> {
    if x.nrows() == 0 {
        return Err(EstimatorError::EmptyTrainingSet);
    }
    if x.nrows() != labels {
        return Err(EstimatorError::LabelCountMismatch {
            rows: x.nrows(),
            labels,
        });
    }
    if n_classes < 2 {
        return Err(EstimatorError::TooFewClasses(n_classes));
    }
    Ok(())
}
