//! # Training Pipeline
//!
//! Turns one labelled feature table into five fitted slots:
//!
//! 1. Diagnosis labels come straight from the table. The four other tasks get
//!    synthetic labels drawn from fixed categorical distributions with an
//!    explicitly seeded generator, so the same table and seed always give the
//!    same labels.
//! 2. Every task is then fitted independently (and in parallel): its own
//!    seeded 80/20 split, mean imputation fitted on the training partition
//!    only, a scaler fitted on the training partition, the policy-chosen
//!    estimator family, and a held-out evaluation.
//!
//! Nothing here touches the registry. Callers receive complete slots and decide
//! how to install them.

use crate::config::TrainingConfig;
use crate::data::TrainingTable;
use crate::estimator::{Estimator, EstimatorError, EstimatorFamily};
use crate::features::{FEATURE_COUNT, feature_names};
use crate::metrics::ClassificationMetrics;
use crate::preprocess::{MeanImputer, PreprocessError, StandardScaler, has_non_finite};
use crate::slot::{ModelSlot, SlotMetadata};
use crate::task::{
    BENIGN, CANCER_TYPES, MALIGNANT, METASTATIC, PRIMARY, TISSUE_CHANGES, Task,
};
use chrono::Utc;
use ndarray::{ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Smallest table the pipeline accepts: enough for both partitions of every
/// task to be non-empty.
pub const MINIMUM_ROWS: usize = 10;

const METASTASIS_DISTRIBUTION: [(&str, f64); 2] = [(PRIMARY, 0.8), (METASTATIC, 0.2)];
const MALIGNANT_PROGNOSIS: [(&str, f64); 3] = [("Poor", 0.4), ("Fair", 0.4), ("Good", 0.2)];
const BENIGN_PROGNOSIS: [(&str, f64); 2] = [("Excellent", 0.7), ("Good", 0.3)];

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Training needs at least {required} rows, but the table has {found}.")]
    TooFewRows { found: usize, required: usize },
    #[error("Training table has {found} feature columns, the schema has {expected}.")]
    SchemaWidth { found: usize, expected: usize },
    #[error("Preprocessing for the {task} model failed: {source}")]
    Preprocess {
        task: Task,
        source: PreprocessError,
    },
    #[error("Fitting the {task} model failed: {source}")]
    Estimator { task: Task, source: EstimatorError },
}

/// Per-task evaluation summary returned by training and retraining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub task: Task,
    pub model_type: String,
    #[serde(flatten)]
    pub metrics: ClassificationMetrics,
    pub classes: Vec<String>,
    pub training_samples: usize,
    pub evaluation_samples: usize,
    pub imputed: bool,
}

pub type TrainingReport = BTreeMap<Task, TaskMetrics>;

/// Every slot produced by one training run, plus its report.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub slots: Vec<ModelSlot>,
    pub report: TrainingReport,
}

/// The fixed estimator-selection policy.
pub fn estimator_family(task: Task) -> EstimatorFamily {
    match task {
        Task::Diagnosis => EstimatorFamily::GradientBoosting,
        Task::CancerType | Task::Metastasis | Task::TissueChange | Task::Prognosis => {
            EstimatorFamily::RandomForest
        }
    }
}

/// Labels for every task. Diagnosis is taken from the table; the others are
/// drawn, in a fixed order, from one generator seeded with `seed`.
pub fn task_labels(malignant: &[bool], seed: u64) -> BTreeMap<Task, Vec<String>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = malignant.len();
    let diagnosis = malignant
        .iter()
        .map(|&m| if m { MALIGNANT } else { BENIGN }.to_string())
        .collect();
    let cancer_type = (0..n)
        .map(|_| CANCER_TYPES[rng.gen_range(0..CANCER_TYPES.len())].to_string())
        .collect();
    let metastasis = (0..n)
        .map(|_| draw(&mut rng, &METASTASIS_DISTRIBUTION).to_string())
        .collect();
    let tissue_change = (0..n)
        .map(|_| TISSUE_CHANGES[rng.gen_range(0..TISSUE_CHANGES.len())].to_string())
        .collect();
    let prognosis = malignant
        .iter()
        .map(|&m| {
            let table: &[(&str, f64)] = if m {
                &MALIGNANT_PROGNOSIS
            } else {
                &BENIGN_PROGNOSIS
            };
            draw(&mut rng, table).to_string()
        })
        .collect();

    BTreeMap::from([
        (Task::Diagnosis, diagnosis),
        (Task::CancerType, cancer_type),
        (Task::Metastasis, metastasis),
        (Task::TissueChange, tissue_change),
        (Task::Prognosis, prognosis),
    ])
}

fn draw<'a, R: Rng>(rng: &mut R, distribution: &[(&'a str, f64)]) -> &'a str {
    let u: f64 = rng.r#gen();
    let mut cumulative = 0.0;
    for (label, weight) in distribution {
        cumulative += weight;
        if u < cumulative {
            return label;
        }
    }
    distribution[distribution.len() - 1].0
}

/// Seeded shuffle split. Returns `(train, evaluation)` row indices; the
/// evaluation partition takes `ceil(n * test_fraction)` rows, never all of
/// them and never none.
pub fn split_indices(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let n_eval = if n < 2 {
        0
    } else {
        ((n as f64 * test_fraction).ceil() as usize).clamp(1, n - 1)
    };
    let train = order.split_off(n_eval);
    (train, order)
}

/// Seed for a task's partition, distinct per task but fixed per base seed.
pub fn split_seed(base: u64, task: Task) -> u64 {
    base.wrapping_add(task.ordinal())
}

/// Sorted class vocabulary and the label indices into it.
pub fn encode_labels(labels: &[String]) -> (Vec<String>, Vec<usize>) {
    let classes: Vec<String> = labels
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let encoded = labels
        .iter()
        .map(|label| classes.iter().position(|c| c == label).unwrap_or(0))
        .collect();
    (classes, encoded)
}

/// Fits and evaluates one task.
pub fn fit_task(
    task: Task,
    features: ArrayView2<f64>,
    labels: &[String],
    config: &TrainingConfig,
) -> Result<(ModelSlot, TaskMetrics), TrainingError> {
    let preprocess_error = |source| TrainingError::Preprocess { task, source };
    let estimator_error = |source| TrainingError::Estimator { task, source };

    let (train_rows, eval_rows) = split_indices(
        features.nrows(),
        config.test_fraction,
        split_seed(config.seed, task),
    );
    let mut x_train = features.select(Axis(0), &train_rows);
    let mut x_eval = features.select(Axis(0), &eval_rows);

    let imputer = if has_non_finite(features) {
        let imputer = MeanImputer::fit(x_train.view()).map_err(preprocess_error)?;
        x_train = imputer.transform(x_train.view()).map_err(preprocess_error)?;
        x_eval = imputer.transform(x_eval.view()).map_err(preprocess_error)?;
        Some(imputer)
    } else {
        None
    };

    let scaler = StandardScaler::fit(x_train.view()).map_err(preprocess_error)?;
    let x_train = scaler.transform(x_train.view()).map_err(preprocess_error)?;
    let x_eval = scaler.transform(x_eval.view()).map_err(preprocess_error)?;

    let (classes, encoded) = encode_labels(labels);
    let y_train: Vec<usize> = train_rows.iter().map(|&i| encoded[i]).collect();
    let y_eval: Vec<usize> = eval_rows.iter().map(|&i| encoded[i]).collect();

    let family = estimator_family(task);
    log::info!(
        "Training {task} model ({}) on {} rows, evaluating on {}.",
        family.name(),
        train_rows.len(),
        eval_rows.len()
    );
    let estimator = Estimator::fit(
        family,
        x_train.view(),
        &y_train,
        classes.len(),
        &config.forest,
        &config.boosting,
        config.seed,
    )
    .map_err(estimator_error)?;

    let predicted = x_eval
        .axis_iter(Axis(0))
        .map(|row| estimator.predict(row).map(|(index, _)| index))
        .collect::<Result<Vec<_>, _>>()
        .map_err(estimator_error)?;
    let metrics = ClassificationMetrics::weighted(&y_eval, &predicted, classes.len());
    log::info!(
        "{task} - Accuracy: {:.3}, F1: {:.3}",
        metrics.accuracy,
        metrics.f1_score
    );

    let report = TaskMetrics {
        task,
        model_type: family.name().to_string(),
        metrics,
        classes: classes.clone(),
        training_samples: train_rows.len(),
        evaluation_samples: eval_rows.len(),
        imputed: imputer.is_some(),
    };
    let slot = ModelSlot {
        metadata: SlotMetadata {
            task,
            family,
            feature_names: feature_names(),
            classes,
            trained_at: Utc::now(),
            training_samples: train_rows.len(),
        },
        estimator,
        scaler,
        imputer,
    };
    Ok((slot, report))
}

/// Runs the whole pipeline. Either every task succeeds or an error is returned
/// and no slot escapes.
pub fn train_all(
    table: &TrainingTable,
    config: &TrainingConfig,
) -> Result<TrainingOutcome, TrainingError> {
    let features = table.features();
    if features.ncols() != FEATURE_COUNT {
        return Err(TrainingError::SchemaWidth {
            found: features.ncols(),
            expected: FEATURE_COUNT,
        });
    }
    if features.nrows() < MINIMUM_ROWS {
        return Err(TrainingError::TooFewRows {
            found: features.nrows(),
            required: MINIMUM_ROWS,
        });
    }

    let labels = task_labels(table.malignant(), config.seed);
    let fitted = Task::ALL
        .par_iter()
        .map(|&task| fit_task(task, features, &labels[&task], config))
        .collect::<Result<Vec<_>, _>>()?;

    let mut slots = Vec::with_capacity(fitted.len());
    let mut report = TrainingReport::new();
    for (slot, metrics) in fitted {
        report.insert(slot.task(), metrics);
        slots.push(slot);
    }
    Ok(TrainingOutcome { slots, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{quick_config, synthetic_table};
    use ndarray::Array2;

    #[test]
    fn synthetic_labels_are_reproducible_and_well_formed() {
        let malignant: Vec<bool> = (0..200).map(|i| i % 2 == 0).collect();
        let first = task_labels(&malignant, 42);
        let second = task_labels(&malignant, 42);
        assert_eq!(first, second);
        assert_ne!(first[&Task::CancerType], task_labels(&malignant, 7)[&Task::CancerType]);

        for (i, label) in first[&Task::Prognosis].iter().enumerate() {
            if malignant[i] {
                assert!(["Poor", "Fair", "Good"].contains(&label.as_str()));
            } else {
                assert!(["Excellent", "Good"].contains(&label.as_str()));
            }
        }
        let metastatic = first[&Task::Metastasis]
            .iter()
            .filter(|l| l.as_str() == METASTATIC)
            .count();
        assert!(metastatic > 10 && metastatic < 80);
        assert_eq!(first[&Task::Diagnosis][0], MALIGNANT);
        assert_eq!(first[&Task::Diagnosis][1], BENIGN);
    }

    #[test]
    fn split_is_eighty_twenty_and_disjoint() {
        let (train, eval) = split_indices(569, 0.2, 42);
        assert_eq!(eval.len(), 114);
        assert_eq!(train.len(), 455);
        let all: BTreeSet<usize> = train.iter().chain(eval.iter()).copied().collect();
        assert_eq!(all.len(), 569);
        assert_eq!(split_indices(569, 0.2, 42), (train, eval));
    }

    #[test]
    fn policy_uses_boosting_only_for_diagnosis() {
        assert_eq!(estimator_family(Task::Diagnosis), EstimatorFamily::GradientBoosting);
        for task in &Task::ALL[1..] {
            assert_eq!(estimator_family(*task), EstimatorFamily::RandomForest);
        }
    }

    #[test]
    fn imputer_statistics_come_from_the_training_partition_only() {
        let mut data = synthetic_table(40, 11);
        let config = quick_config();
        let (train_rows, eval_rows) =
            split_indices(40, config.test_fraction, split_seed(config.seed, Task::Metastasis));
        // Poison column 0 of one training row and give the evaluation rows an
        // extreme value that would drag the mean if it leaked in.
        data.features_mut()[[train_rows[0], 0]] = f64::NAN;
        for &row in &eval_rows {
            data.features_mut()[[row, 0]] = 1.0e6;
        }
        let labels = task_labels(data.malignant(), config.seed);
        let (slot, metrics) = fit_task(
            Task::Metastasis,
            data.features(),
            &labels[&Task::Metastasis],
            &config,
        )
        .unwrap();

        let expected: f64 = train_rows[1..]
            .iter()
            .map(|&r| data.features()[[r, 0]])
            .sum::<f64>()
            / (train_rows.len() - 1) as f64;
        let imputer = slot.imputer.expect("imputer should be recorded");
        assert!((imputer.statistics[0] - expected).abs() < 1e-9);
        assert!(metrics.imputed);
    }

    #[test]
    fn clean_tables_record_no_imputer() {
        let data = synthetic_table(40, 11);
        let outcome = train_all(&data, &quick_config()).unwrap();
        assert_eq!(outcome.slots.len(), 5);
        assert!(outcome.slots.iter().all(|slot| slot.imputer.is_none()));
        assert_eq!(outcome.report[&Task::Diagnosis].model_type, "GradientBoostingClassifier");
        assert_eq!(outcome.report[&Task::Diagnosis].classes, vec![BENIGN, MALIGNANT]);
    }

    #[test]
    fn tiny_tables_are_rejected() {
        let data = synthetic_table(MINIMUM_ROWS, 11);
        assert!(train_all(&data, &quick_config()).is_ok());
        let small = TrainingTable::new(Array2::zeros((4, FEATURE_COUNT)), vec![true, false, true, false])
            .unwrap();
        assert!(matches!(
            train_all(&small, &quick_config()),
            Err(TrainingError::TooFewRows { found: 4, .. })
        ));
    }
}
