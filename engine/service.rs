//! # Model Service
//!
//! Owns the pieces a long-running process needs: configuration, the shared
//! registry, the guideline table and the most recent evaluation report.
//! Request handlers hold an `Arc<ModelService>` and read from it concurrently;
//! retraining and guideline updates swap state atomically underneath them.

use crate::config::{ConfigError, ServiceConfig};
use crate::data::{DataError, TrainingTable};
use crate::features::FeatureVector;
use crate::guidelines::{GuidelineLoadError, GuidelineTable};
use crate::inference::{TaskResult, predict_diagnosis, predict_task};
use crate::metrics::ClassificationMetrics;
use crate::registry::{ModelInfo, ModelRegistry, RegistryError};
use crate::report::{BatchResult, ComprehensiveResult, predict_batch, predict_comprehensive};
use crate::task::Task;
use crate::therapy::{TherapyRecommendation, predict_therapy};
use crate::training::TrainingReport;
use arc_swap::{ArcSwap, ArcSwapOption};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Failed to load the training dataset: {0}")]
    Data(#[from] DataError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to save guidelines: {0}")]
    Guidelines(#[from] GuidelineLoadError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub models_loaded: bool,
    pub api_version: String,
    pub uptime_seconds: f64,
}

/// Model metadata plus the held-out metrics from the training run that
/// produced it, when this process ran that training.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    #[serde(flatten)]
    pub info: ModelInfo,
    #[serde(flatten)]
    pub metrics: Option<ClassificationMetrics>,
}

#[derive(Debug)]
pub struct ModelService {
    config: ServiceConfig,
    registry: ModelRegistry,
    guidelines: ArcSwap<GuidelineTable>,
    last_report: ArcSwapOption<TrainingReport>,
    started: Instant,
}

impl ModelService {
    /// A service with an empty registry. Nothing is loaded or trained; use
    /// `retrain` to populate it, or `start` for the usual cold-start path.
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let guidelines = GuidelineTable::load_or_empty(&config.guidelines_path);
        Ok(Self {
            registry: ModelRegistry::new(),
            guidelines: ArcSwap::from_pointee(guidelines),
            last_report: ArcSwapOption::empty(),
            started: Instant::now(),
            config,
        })
    }

    /// Loads persisted models, or trains and saves a fresh set when none are
    /// usable.
    pub fn start(config: ServiceConfig) -> Result<Self, ServiceError> {
        let service = Self::new(config)?;
        match service.registry.load(&service.config.model_dir) {
            Ok(count) => log::info!("Using {count} persisted models."),
            Err(err) => {
                log::warn!("{err} Training new models from {}.", service.config.dataset_path.display());
                service.retrain()?;
            }
        }
        Ok(service)
    }

    /// Trains every task from the configured dataset, persists the new models
    /// and then swaps them in. The active models and the last report stay in
    /// place if anything fails, saving included.
    pub fn retrain(&self) -> Result<TrainingReport, ServiceError> {
        let table = TrainingTable::from_path(&self.config.dataset_path)?;
        let report =
            self.registry
                .train_and_save(&table, &self.config.training, &self.config.model_dir)?;
        self.last_report.store(Some(Arc::new(report.clone())));
        Ok(report)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn guidelines(&self) -> Arc<GuidelineTable> {
        self.guidelines.load_full()
    }

    /// Persists a new guideline table, then makes it the active one.
    pub fn save_guidelines(&self, table: GuidelineTable) -> Result<(), ServiceError> {
        table.save(&self.config.guidelines_path)?;
        log::info!(
            "Saved {} guideline entries to {}.",
            table.len(),
            self.config.guidelines_path.display()
        );
        self.guidelines.store(Arc::new(table));
        Ok(())
    }

    pub fn health(&self) -> HealthStatus {
        let models_loaded = !self.registry.is_empty();
        HealthStatus {
            status: if models_loaded { "healthy" } else { "initializing" }.to_string(),
            models_loaded,
            api_version: API_VERSION.to_string(),
            uptime_seconds: self.started.elapsed().as_secs_f64(),
        }
    }

    pub fn model_info(&self) -> Vec<ModelSummary> {
        let report = self.last_report.load_full();
        self.registry
            .model_info()
            .into_iter()
            .map(|info| ModelSummary {
                metrics: report
                    .as_ref()
                    .and_then(|r| r.get(&info.model_name))
                    .map(|m| m.metrics.clone()),
                info,
            })
            .collect()
    }

    pub fn predict_task(&self, task: Task, vector: &FeatureVector) -> Result<TaskResult, ServiceError> {
        Ok(predict_task(&self.registry.snapshot(), task, vector)?)
    }

    /// Therapy for the case's diagnosis under the active guideline table.
    pub fn predict_therapy(&self, vector: &FeatureVector) -> Result<TherapyRecommendation, ServiceError> {
        let diagnosis = predict_diagnosis(&self.registry.snapshot(), vector)?;
        Ok(TherapyRecommendation::from(predict_therapy(
            &diagnosis,
            &self.guidelines.load(),
        )))
    }

    pub fn predict_comprehensive(&self, vector: &FeatureVector) -> Result<ComprehensiveResult, ServiceError> {
        Ok(predict_comprehensive(
            &self.registry.snapshot(),
            &self.guidelines.load(),
            vector,
        )?)
    }

    pub fn predict_batch(&self, vectors: &[FeatureVector]) -> Result<BatchResult, ServiceError> {
        Ok(predict_batch(
            &self.registry.snapshot(),
            &self.guidelines.load(),
            vectors,
        )?)
    }
}
