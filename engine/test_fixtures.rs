//! Synthetic tables and small training configurations shared by unit tests.

use crate::config::TrainingConfig;
use crate::data::TrainingTable;
use crate::features::{FEATURE_COUNT, feature_names};
use crate::inference::{DiagnosisResult, diagnosis_risk, to_strings};
use crate::registry::ModelRegistry;
use crate::slot::Prediction;
use crate::task::MALIGNANT;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::path::Path;

/// `n` rows where every third row is malignant and malignant measurements sit
/// about half again above benign ones.
pub fn synthetic_table(n: usize, seed: u64) -> TrainingTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let malignant: Vec<bool> = (0..n).map(|i| i % 3 == 0).collect();
    let features = Array2::from_shape_fn((n, FEATURE_COUNT), |(i, j)| {
        let factor = if malignant[i] { 1.5 } else { 1.0 };
        (10.0 + j as f64) * factor * rng.gen_range(0.9..1.1)
    });
    TrainingTable::new(features, malignant).expect("synthetic table matches the schema")
}

/// Few trees and rounds so unit tests stay fast.
pub fn quick_config() -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.forest.n_estimators = 5;
    config.boosting.n_estimators = 10;
    config
}

pub fn trained_registry() -> ModelRegistry {
    let registry = ModelRegistry::new();
    registry
        .train(&synthetic_table(60, 3), &quick_config())
        .expect("training on the synthetic table succeeds");
    registry
}

/// A diagnosis verdict built by hand, for exercising the derived tasks
/// without a trained model.
pub fn diagnosis(label: &str, confidence: f64) -> DiagnosisResult {
    let (risk_level, recommendations) = diagnosis_risk(label == MALIGNANT, confidence);
    let other = 1.0 - confidence;
    let probability = if label == MALIGNANT {
        BTreeMap::from([("benign".to_string(), other), ("malignant".to_string(), confidence)])
    } else {
        BTreeMap::from([("benign".to_string(), confidence), ("malignant".to_string(), other)])
    };
    DiagnosisResult {
        base: Prediction {
            prediction: label.to_string(),
            confidence,
            probability,
        },
        risk_level,
        recommendations: to_strings(recommendations),
    }
}

/// Writes `table` as a training CSV with the usual `id` and `diagnosis`
/// leading columns.
pub fn write_training_csv(table: &TrainingTable, path: &Path) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["id".to_string(), "diagnosis".to_string()];
    header.extend(feature_names());
    writer.write_record(&header)?;
    for (i, (row, &malignant)) in table
        .features()
        .axis_iter(Axis(0))
        .zip(table.malignant())
        .enumerate()
    {
        let mut record = vec![(i + 1).to_string(), if malignant { "M" } else { "B" }.to_string()];
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
