//! # Model Registry
//!
//! Maps each task to its trained slot. The whole mapping lives in one
//! immutable `RegistrySnapshot` behind an `ArcSwap`: readers take a snapshot
//! and keep using it for the duration of a request, writers build a complete
//! replacement and swap it in with a single pointer store. A reader therefore
//! never sees an estimator paired with the wrong scaler, and a failed retrain
//! never touches the active snapshot.

use crate::config::TrainingConfig;
use crate::data::TrainingTable;
use crate::estimator::EstimatorError;
use crate::features::FeatureVector;
use crate::preprocess::PreprocessError;
use crate::slot::{
    EstimatorArtifact, MODEL_SUFFIX, ModelSlot, Prediction, ScalerArtifact, read_json,
};
use crate::task::{Task, UnknownTaskName};
use crate::training::{TrainingError, TrainingReport, train_all};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No usable model artifacts were found in '{0}'.")]
    RegistryEmpty(PathBuf),
    #[error("Task '{0}' has never been trained or loaded.")]
    UnknownTask(String),
    #[error("The {0} model is not trained. Train or load models before predicting.")]
    ModelNotTrained(Task),
    #[error("The {0} model was loaded without a matching scaler and cannot be used until retrained.")]
    MissingScaler(Task),
    #[error("The {task} model does not match the feature schema: {reason}.")]
    SchemaMismatch { task: Task, reason: String },
    #[error("Invalid input for the {task} model: {source}")]
    InvalidFeatureValue {
        task: Task,
        source: PreprocessError,
    },
    #[error("The {task} estimator failed: {source}")]
    Estimator { task: Task, source: EstimatorError },
    #[error("IO error on '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Malformed artifact '{path}': {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Training(#[from] TrainingError),
}

impl From<UnknownTaskName> for RegistryError {
    fn from(err: UnknownTaskName) -> Self {
        RegistryError::UnknownTask(err.0)
    }
}

/// Per-slot metadata reported by the model-info query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: Task,
    pub model_type: String,
    pub features_used: Vec<String>,
    pub classes: Vec<String>,
    pub last_updated: DateTime<Utc>,
    pub training_samples: usize,
}

/// One consistent view of every slot.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    slots: BTreeMap<Task, Arc<ModelSlot>>,
    /// Tasks whose estimator was found on disk without a matching scaler.
    degraded: BTreeSet<Task>,
}

impl RegistrySnapshot {
    /// Builds a snapshot from complete slots, rejecting any that disagree with
    /// the feature schema.
    pub fn from_slots(slots: Vec<ModelSlot>) -> Result<Self, RegistryError> {
        let mut snapshot = Self::default();
        for slot in slots {
            slot.check_schema()?;
            snapshot.slots.insert(slot.task(), Arc::new(slot));
        }
        Ok(snapshot)
    }

    /// Reads every `<task>_model.json` / `<task>_scaler.json` pair in `dir`.
    /// Estimators without a matching scaler are recorded as degraded; files
    /// that do not name a known task are skipped.
    pub fn read_dir(dir: &Path) -> Result<Self, RegistryError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(RegistryError::RegistryEmpty(dir.to_path_buf()));
            }
            Err(source) => {
                return Err(RegistryError::Io {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        };

        let mut snapshot = Self::default();
        for entry in entries {
            let entry = entry.map_err(|source| RegistryError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(task_name) = file_name.to_str().and_then(|n| n.strip_suffix(MODEL_SUFFIX))
            else {
                continue;
            };
            let task = match task_name.parse::<Task>() {
                Ok(task) => task,
                Err(err) => {
                    log::warn!("Skipping artifact {}: {err}", entry.path().display());
                    continue;
                }
            };

            let model: EstimatorArtifact = read_json(&entry.path())?;
            if model.metadata.task != task {
                return Err(RegistryError::SchemaMismatch {
                    task,
                    reason: format!(
                        "artifact file is named for {task} but holds a {} model",
                        model.metadata.task
                    ),
                });
            }
            let scaler_path = ModelSlot::scaler_path(dir, task);
            if !scaler_path.exists() {
                log::warn!(
                    "Found the {task} estimator but no scaler at {}; the task stays unusable until retrained.",
                    scaler_path.display()
                );
                snapshot.degraded.insert(task);
                continue;
            }
            let scaler: ScalerArtifact = read_json(&scaler_path)?;
            let slot = match ModelSlot::from_artifacts(model, scaler) {
                Ok(slot) => slot,
                Err(reason) => {
                    log::warn!(
                        "Refusing to pair {} with the {task} estimator: {reason}. The task stays unusable until retrained.",
                        scaler_path.display()
                    );
                    snapshot.degraded.insert(task);
                    continue;
                }
            };
            slot.check_schema()?;
            snapshot.slots.insert(task, Arc::new(slot));
        }

        if snapshot.slots.is_empty() {
            return Err(RegistryError::RegistryEmpty(dir.to_path_buf()));
        }
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = Task> + '_ {
        self.slots.keys().copied()
    }

    pub fn degraded(&self) -> &BTreeSet<Task> {
        &self.degraded
    }

    /// The slot for `task`, or the inference-time error for its absence.
    pub fn slot(&self, task: Task) -> Result<&Arc<ModelSlot>, RegistryError> {
        match self.slots.get(&task) {
            Some(slot) => Ok(slot),
            None if self.degraded.contains(&task) => Err(RegistryError::MissingScaler(task)),
            None => Err(RegistryError::ModelNotTrained(task)),
        }
    }

    pub fn predict(&self, task: Task, vector: &FeatureVector) -> Result<Prediction, RegistryError> {
        let prediction = self.slot(task)?.predict(vector.view())?;
        log::debug!(
            "{task}: {} ({:.3})",
            prediction.prediction,
            prediction.confidence
        );
        Ok(prediction)
    }

    pub fn model_info(&self) -> Vec<ModelInfo> {
        self.slots
            .values()
            .map(|slot| ModelInfo {
                model_name: slot.task(),
                model_type: slot.metadata.family.name().to_string(),
                features_used: slot.metadata.feature_names.clone(),
                classes: slot.metadata.classes.clone(),
                last_updated: slot.metadata.trained_at,
                training_samples: slot.metadata.training_samples,
            })
            .collect()
    }

    /// Writes every populated slot into `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<usize, RegistryError> {
        fs::create_dir_all(dir).map_err(|source| RegistryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for slot in self.slots.values() {
            slot.save(dir)?;
        }
        Ok(self.slots.len())
    }
}

fn fit_snapshot(
    table: &TrainingTable,
    config: &TrainingConfig,
) -> Result<(RegistrySnapshot, TrainingReport), RegistryError> {
    let outcome = train_all(table, config)?;
    let snapshot = RegistrySnapshot::from_slots(outcome.slots)?;
    Ok((snapshot, outcome.report))
}

/// Shared handle to the current snapshot. Cheap to read from many threads.
#[derive(Debug)]
pub struct ModelRegistry {
    current: ArcSwap<RegistrySnapshot>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// An empty registry; every prediction fails with `ModelNotTrained`.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::default()),
        }
    }

    /// The snapshot in force right now. Hold on to it for the length of a
    /// request so every task sees the same models.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Replaces the active snapshot with the artifacts found in `dir`. On any
    /// error, including an empty directory, the active snapshot is kept.
    pub fn load(&self, dir: &Path) -> Result<usize, RegistryError> {
        let snapshot = RegistrySnapshot::read_dir(dir)?;
        let count = snapshot.len();
        log::info!(
            "Loaded {count} models from {} ({} degraded).",
            dir.display(),
            snapshot.degraded.len()
        );
        self.current.store(Arc::new(snapshot));
        Ok(count)
    }

    pub fn save(&self, dir: &Path) -> Result<usize, RegistryError> {
        let count = self.snapshot().save(dir)?;
        log::info!("Saved {count} models to {}.", dir.display());
        Ok(count)
    }

    /// Trains every task and, only if all of them succeed, swaps the result in
    /// as the new snapshot.
    pub fn train(
        &self,
        table: &TrainingTable,
        config: &TrainingConfig,
    ) -> Result<TrainingReport, RegistryError> {
        let (snapshot, report) = fit_snapshot(table, config)?;
        self.current.store(Arc::new(snapshot));
        log::info!("Training complete; {} models active.", report.len());
        Ok(report)
    }

    /// Trains every task, writes the new artifacts to `dir`, and only then
    /// swaps the new snapshot in. A failure at any step, including the save,
    /// leaves the active snapshot in place.
    pub fn train_and_save(
        &self,
        table: &TrainingTable,
        config: &TrainingConfig,
        dir: &Path,
    ) -> Result<TrainingReport, RegistryError> {
        let (snapshot, report) = fit_snapshot(table, config)?;
        let count = snapshot.save(dir)?;
        self.current.store(Arc::new(snapshot));
        log::info!("Training complete; saved {count} models to {} and activated them.", dir.display());
        Ok(report)
    }

    /// Replaces a single task's slot, leaving the others untouched.
    pub fn install(&self, slot: ModelSlot) -> Result<(), RegistryError> {
        slot.check_schema()?;
        let task = slot.task();
        let slot = Arc::new(slot);
        self.current.rcu(|current| {
            let mut next = RegistrySnapshot::clone(current);
            next.degraded.remove(&task);
            next.slots.insert(task, Arc::clone(&slot));
            next
        });
        Ok(())
    }

    /// The populated slot for `task`. Tasks that were never trained or loaded
    /// are reported as unknown.
    pub fn get(&self, task: Task) -> Result<Arc<ModelSlot>, RegistryError> {
        match self.snapshot().slot(task) {
            Ok(slot) => Ok(Arc::clone(slot)),
            Err(RegistryError::ModelNotTrained(task)) => {
                Err(RegistryError::UnknownTask(task.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    pub fn get_by_name(&self, name: &str) -> Result<Arc<ModelSlot>, RegistryError> {
        self.get(name.parse::<Task>()?)
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    pub fn model_info(&self) -> Vec<ModelInfo> {
        self.current.load().model_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_COUNT;
    use crate::slot::SCALER_SUFFIX;
    use crate::test_fixtures::{quick_config, synthetic_table, trained_registry};
    use rayon::prelude::*;
    use tempfile::tempdir;

    fn case_vector() -> FeatureVector {
        FeatureVector::new(std::array::from_fn(|j| 12.0 + j as f64))
    }

    #[test]
    fn empty_registry_reports_missing_models() {
        let registry = ModelRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get(Task::Diagnosis),
            Err(RegistryError::UnknownTask(name)) if name == "diagnosis"
        ));
        assert!(matches!(
            registry.snapshot().predict(Task::Prognosis, &case_vector()),
            Err(RegistryError::ModelNotTrained(Task::Prognosis))
        ));
        assert!(matches!(
            registry.get_by_name("therapy"),
            Err(RegistryError::UnknownTask(name)) if name == "therapy"
        ));
    }

    #[test]
    fn loading_an_empty_or_missing_directory_fails_without_clearing() {
        let registry = trained_registry();
        let dir = tempdir().unwrap();
        assert!(matches!(
            registry.load(dir.path()),
            Err(RegistryError::RegistryEmpty(_))
        ));
        assert!(matches!(
            registry.load(&dir.path().join("absent")),
            Err(RegistryError::RegistryEmpty(_))
        ));
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn save_then_load_reproduces_predictions_exactly() {
        let registry = trained_registry();
        let dir = tempdir().unwrap();
        assert_eq!(registry.save(&dir.path().join("nested")).unwrap(), 5);

        let reloaded = ModelRegistry::new();
        assert_eq!(reloaded.load(&dir.path().join("nested")).unwrap(), 5);
        let before = registry.snapshot();
        let after = reloaded.snapshot();
        for task in Task::ALL {
            let a = before.predict(task, &case_vector()).unwrap();
            let b = after.predict(task, &case_vector()).unwrap();
            assert_eq!(a.prediction, b.prediction);
            assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
            assert_eq!(a.probability, b.probability);
        }
        assert_eq!(registry.model_info(), reloaded.model_info());
    }

    #[test]
    fn estimator_without_scaler_loads_degraded() {
        let registry = trained_registry();
        let dir = tempdir().unwrap();
        registry.save(dir.path()).unwrap();
        fs::remove_file(dir.path().join(format!("metastasis{SCALER_SUFFIX}"))).unwrap();
        fs::write(dir.path().join("notes_model.json"), "{}").unwrap();

        let reloaded = ModelRegistry::new();
        assert_eq!(reloaded.load(dir.path()).unwrap(), 4);
        let snapshot = reloaded.snapshot();
        assert!(snapshot.degraded().contains(&Task::Metastasis));
        assert!(matches!(
            snapshot.predict(Task::Metastasis, &case_vector()),
            Err(RegistryError::MissingScaler(Task::Metastasis))
        ));
        assert!(snapshot.predict(Task::Diagnosis, &case_vector()).is_ok());
    }

    #[test]
    fn scalers_from_another_run_or_task_are_refused() {
        let dir = tempdir().unwrap();
        trained_registry().save(dir.path()).unwrap();
        let other_dir = tempdir().unwrap();
        let other = ModelRegistry::new();
        other.train(&synthetic_table(60, 8), &quick_config()).unwrap();
        other.save(other_dir.path()).unwrap();

        fs::copy(
            ModelSlot::model_path(other_dir.path(), Task::Diagnosis),
            ModelSlot::model_path(dir.path(), Task::Diagnosis),
        )
        .unwrap();
        fs::copy(
            ModelSlot::scaler_path(dir.path(), Task::Prognosis),
            ModelSlot::scaler_path(dir.path(), Task::Metastasis),
        )
        .unwrap();

        let reloaded = ModelRegistry::new();
        assert_eq!(reloaded.load(dir.path()).unwrap(), 3);
        let snapshot = reloaded.snapshot();
        assert_eq!(
            snapshot.degraded().iter().copied().collect::<Vec<_>>(),
            vec![Task::Diagnosis, Task::Metastasis]
        );
        assert!(matches!(
            snapshot.predict(Task::Diagnosis, &case_vector()),
            Err(RegistryError::MissingScaler(Task::Diagnosis))
        ));
        assert!(snapshot.predict(Task::Prognosis, &case_vector()).is_ok());
    }

    #[test]
    fn structurally_broken_estimators_fail_the_load() {
        let dir = tempdir().unwrap();
        trained_registry().save(dir.path()).unwrap();
        let path = ModelSlot::model_path(dir.path(), Task::Diagnosis);
        let mut artifact: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let nodes = artifact["estimator"]["GradientBoosting"]["rounds"][0][0]["nodes"]
            .as_array_mut()
            .unwrap();
        let split = nodes
            .iter_mut()
            .find_map(|node| node.get_mut("Split"))
            .unwrap();
        split["left"] = serde_json::Value::from(99999);
        fs::write(&path, artifact.to_string()).unwrap();

        let registry = ModelRegistry::new();
        assert!(matches!(
            registry.load(dir.path()),
            Err(RegistryError::SchemaMismatch { task: Task::Diagnosis, reason }) if reason.contains("99999")
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn readers_always_see_a_consistent_slot_during_installs() {
        let registry = trained_registry();
        let other = ModelRegistry::new();
        other.train(&synthetic_table(60, 8), &quick_config()).unwrap();
        let first = ModelSlot::clone(&registry.get(Task::Prognosis).unwrap());
        let second = ModelSlot::clone(&other.get(Task::Prognosis).unwrap());
        assert_ne!(first.scaler, second.scaler);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0..200 {
                    let slot = if round % 2 == 0 { &second } else { &first };
                    registry.install(slot.clone()).unwrap();
                }
            });
            (0..2000).into_par_iter().for_each(|_| {
                let snapshot = registry.snapshot();
                let slot = snapshot.slot(Task::Prognosis).unwrap();
                let expected = if slot.metadata.trained_at == first.metadata.trained_at {
                    &first
                } else {
                    &second
                };
                assert_eq!(slot.metadata.trained_at, expected.metadata.trained_at);
                assert_eq!(slot.scaler, expected.scaler);
                assert_eq!(slot.estimator, expected.estimator);
                assert!(snapshot.predict(Task::Prognosis, &case_vector()).is_ok());
            });
        });
    }

    #[test]
    fn only_degraded_slots_count_as_empty() {
        let registry = trained_registry();
        let dir = tempdir().unwrap();
        registry.save(dir.path()).unwrap();
        for task in Task::ALL {
            fs::remove_file(ModelSlot::scaler_path(dir.path(), task)).unwrap();
        }
        assert!(matches!(
            ModelRegistry::new().load(dir.path()),
            Err(RegistryError::RegistryEmpty(_))
        ));
    }

    #[test]
    fn failed_training_keeps_the_previous_snapshot() {
        let registry = trained_registry();
        let before = registry.snapshot();
        let tiny = synthetic_table(4, 1);
        assert!(matches!(
            registry.train(&tiny, &quick_config()),
            Err(RegistryError::Training(TrainingError::TooFewRows { .. }))
        ));
        assert!(Arc::ptr_eq(&before, &registry.snapshot()));
    }

    #[test]
    fn install_replaces_one_slot_and_rejects_foreign_schemas() {
        let registry = trained_registry();
        let held = registry.snapshot();
        let mut slot = ModelSlot::clone(&registry.get(Task::Prognosis).unwrap());
        slot.metadata.training_samples = 1;
        registry.install(slot.clone()).unwrap();
        assert_eq!(registry.get(Task::Prognosis).unwrap().metadata.training_samples, 1);
        // Snapshots taken earlier are unaffected.
        assert_ne!(held.slot(Task::Prognosis).unwrap().metadata.training_samples, 1);

        slot.metadata.feature_names.truncate(FEATURE_COUNT - 1);
        assert!(matches!(
            registry.install(slot),
            Err(RegistryError::SchemaMismatch { task: Task::Prognosis, .. })
        ));
    }

    #[test]
    fn model_info_lists_every_populated_slot() {
        let registry = trained_registry();
        let info = registry.model_info();
        assert_eq!(info.len(), 5);
        let diagnosis = info.iter().find(|i| i.model_name == Task::Diagnosis).unwrap();
        assert_eq!(diagnosis.model_type, "GradientBoostingClassifier");
        assert_eq!(diagnosis.features_used.len(), FEATURE_COUNT);
        assert_eq!(diagnosis.training_samples, 48);
    }
}
