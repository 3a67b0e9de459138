//! # Model Slot
//!
//! One task's trained bundle: estimator, scaler, optional imputer and the
//! metadata describing how they were produced. A slot is immutable once built;
//! retraining produces a new slot that replaces the old one wholesale.
//!
//! On disk a slot is a pair of JSON files named after the task:
//! `<task>_model.json` holds the estimator and metadata, `<task>_scaler.json`
//! holds the scaler and imputer. Both are written through a temporary file and
//! renamed into place.

use crate::estimator::{Estimator, EstimatorFamily};
use crate::features::{FEATURE_COUNT, FEATURE_NAMES};
use crate::preprocess::{MeanImputer, StandardScaler};
use crate::registry::RegistryError;
use crate::task::Task;
use chrono::{DateTime, Utc};
use ndarray::ArrayView1;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const MODEL_SUFFIX: &str = "_model.json";
pub const SCALER_SUFFIX: &str = "_scaler.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMetadata {
    pub task: Task,
    pub family: EstimatorFamily,
    /// Column order the scaler and estimator were fitted on.
    pub feature_names: Vec<String>,
    /// Class labels in estimator output order.
    pub classes: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub training_samples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSlot {
    pub metadata: SlotMetadata,
    pub estimator: Estimator,
    pub scaler: StandardScaler,
    pub imputer: Option<MeanImputer>,
}

/// The estimator's verdict for one row: winning label, its probability, and the
/// full distribution keyed by label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: String,
    pub confidence: f64,
    pub probability: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorArtifact {
    pub metadata: SlotMetadata,
    pub estimator: Estimator,
}

/// The scaler half of a slot. `task` and `trained_at` repeat the estimator's
/// metadata and must match it for the two files to be paired on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub task: Task,
    pub trained_at: DateTime<Utc>,
    pub scaler: StandardScaler,
    #[serde(default)]
    pub imputer: Option<MeanImputer>,
}

impl ModelSlot {
    pub fn task(&self) -> Task {
        self.metadata.task
    }

    /// Confirms every fitted component agrees with the canonical schema.
    pub fn check_schema(&self) -> Result<(), RegistryError> {
        let task = self.task();
        let names_match = self.metadata.feature_names.len() == FEATURE_COUNT
            && self
                .metadata
                .feature_names
                .iter()
                .zip(FEATURE_NAMES.iter())
                .all(|(fitted, canonical)| fitted == canonical);
        if !names_match {
            return Err(RegistryError::SchemaMismatch {
                task,
                reason: "fitted feature names differ from the canonical schema order".to_string(),
            });
        }
        let widths = [
            ("scaler", self.scaler.n_features()),
            ("scaler spread", self.scaler.scale.len()),
            ("estimator", self.estimator.n_features()),
        ];
        for (component, width) in widths {
            if width != FEATURE_COUNT {
                return Err(RegistryError::SchemaMismatch {
                    task,
                    reason: format!(
                        "{component} was fitted on {width} features, schema has {FEATURE_COUNT}"
                    ),
                });
            }
        }
        if let Some(imputer) = &self.imputer {
            if imputer.n_features() != FEATURE_COUNT {
                return Err(RegistryError::SchemaMismatch {
                    task,
                    reason: format!(
                        "imputer was fitted on {} features, schema has {FEATURE_COUNT}",
                        imputer.n_features()
                    ),
                });
            }
        }
        self.estimator
            .validate()
            .map_err(|reason| RegistryError::SchemaMismatch {
                task,
                reason: format!("malformed estimator: {reason}"),
            })?;
        if self.metadata.classes.len() != self.estimator.n_classes() {
            return Err(RegistryError::SchemaMismatch {
                task,
                reason: format!(
                    "{} class labels recorded for an estimator with {} outputs",
                    self.metadata.classes.len(),
                    self.estimator.n_classes()
                ),
            });
        }
        Ok(())
    }

    /// Imputes (when an imputer was fitted), scales and classifies one raw row.
    pub fn predict(&self, row: ArrayView1<f64>) -> Result<Prediction, RegistryError> {
        let task = self.task();
        if row.len() != self.scaler.n_features() {
            return Err(RegistryError::SchemaMismatch {
                task,
                reason: format!(
                    "input has {} features, scaler expects {}",
                    row.len(),
                    self.scaler.n_features()
                ),
            });
        }
        let imputed = match &self.imputer {
            Some(imputer) => imputer
                .transform_row(row)
                .map_err(|source| RegistryError::InvalidFeatureValue { task, source })?,
            None => row.to_owned(),
        };
        let scaled = self
            .scaler
            .transform_row(imputed.view())
            .map_err(|source| RegistryError::InvalidFeatureValue { task, source })?;
        let (index, probabilities) = self
            .estimator
            .predict(scaled.view())
            .map_err(|source| RegistryError::Estimator { task, source })?;

        let prediction = self.metadata.classes.get(index).cloned().ok_or_else(|| {
            RegistryError::SchemaMismatch {
                task,
                reason: format!("estimator produced class index {index} with no label"),
            }
        })?;
        let probability = self
            .metadata
            .classes
            .iter()
            .cloned()
            .zip(probabilities.iter().copied())
            .collect();
        Ok(Prediction {
            prediction,
            confidence: probabilities[index],
            probability,
        })
    }

    pub fn model_path(dir: &Path, task: Task) -> PathBuf {
        dir.join(format!("{}{MODEL_SUFFIX}", task.as_str()))
    }

    pub fn scaler_path(dir: &Path, task: Task) -> PathBuf {
        dir.join(format!("{}{SCALER_SUFFIX}", task.as_str()))
    }

    /// Writes the estimator and scaler artifacts for this slot into `dir`,
    /// replacing any previous pair for the same task. Both files are staged
    /// before either is renamed into place; a pair left half-replaced by a
    /// crash carries mismatched stamps and is refused on load.
    pub fn save(&self, dir: &Path) -> Result<(), RegistryError> {
        let task = self.task();
        let model_path = Self::model_path(dir, task);
        let scaler_path = Self::scaler_path(dir, task);
        let staged_model = stage_json(
            &model_path,
            &EstimatorArtifact {
                metadata: self.metadata.clone(),
                estimator: self.estimator.clone(),
            },
        )?;
        let staged_scaler = stage_json(
            &scaler_path,
            &ScalerArtifact {
                task,
                trained_at: self.metadata.trained_at,
                scaler: self.scaler.clone(),
                imputer: self.imputer.clone(),
            },
        )?;
        commit(&staged_model, &model_path)?;
        commit(&staged_scaler, &scaler_path)
    }

    /// Reassembles a slot from its two artifacts. Fails with the reason when
    /// the scaler was written for another task or by another training run.
    pub fn from_artifacts(model: EstimatorArtifact, scaler: ScalerArtifact) -> Result<Self, String> {
        if scaler.task != model.metadata.task {
            return Err(format!(
                "scaler belongs to the {} model, not {}",
                scaler.task, model.metadata.task
            ));
        }
        if scaler.trained_at != model.metadata.trained_at {
            return Err(format!(
                "scaler was fitted at {}, estimator at {}",
                scaler.trained_at.to_rfc3339(),
                model.metadata.trained_at.to_rfc3339()
            ));
        }
        Ok(Self {
            metadata: model.metadata,
            estimator: model.estimator,
            scaler: scaler.scaler,
            imputer: scaler.imputer,
        })
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RegistryError> {
    let text = fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| RegistryError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `value` next to `path` under a temporary name and returns that name.
fn stage_json<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf, RegistryError> {
    let staging = path.with_extension("json.tmp");
    let io_error = |source| RegistryError::Io {
        path: staging.clone(),
        source,
    };
    let json = serde_json::to_string(value).map_err(|source| RegistryError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let mut file = BufWriter::new(fs::File::create(&staging).map_err(io_error)?);
    file.write_all(json.as_bytes()).map_err(io_error)?;
    file.flush().map_err(io_error)?;
    drop(file);
    Ok(staging)
}

fn commit(staging: &Path, path: &Path) -> Result<(), RegistryError> {
    fs::rename(staging, path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })
}
