use super::tree::{Criterion, DecisionTree, TreeParams};
use super::{BoostingParams, EstimatorError, validate_training_input};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Raw scores are clamped before exponentiation, mirroring the clamp used on
/// linear predictors elsewhere.
const RAW_SCORE_LIMIT: f64 = 700.0;
const PROBABILITY_FLOOR: f64 = 1e-15;
const HESSIAN_FLOOR: f64 = 1e-150;

/// Log-loss gradient boosting over shallow regression trees.
///
/// Binary targets grow one tree per round on the logistic residual. Targets
/// with more classes grow one tree per class per round on the softmax
/// residual. Leaf values are single Newton steps, and the ensemble starts from
/// the log prior so an empty model already predicts the class frequencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    initial_scores: Vec<f64>,
    rounds: Vec<Vec<DecisionTree>>,
    learning_rate: f64,
    n_classes: usize,
    n_features: usize,
}

impl GradientBoostingClassifier {
    pub fn fit(
        x: ArrayView2<f64>,
        labels: &[usize],
        n_classes: usize,
        params: &BoostingParams,
        seed: u64,
    ) -> Result<Self, EstimatorError> {
        validate_training_input(x, labels.len(), n_classes)?;
        let n_samples = x.nrows();
        let rows: Vec<usize> = (0..n_samples).collect();
        let tree_params = TreeParams {
            max_depth: Some(params.max_depth),
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: None,
        };
        let mut rng = StdRng::seed_from_u64(seed);

        let mut counts = vec![0.0; n_classes];
        for &label in labels {
            counts[label] += 1.0;
        }
        let priors: Vec<f64> = counts
            .iter()
            .map(|c| (c / n_samples as f64).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR))
            .collect();
        let binary = n_classes == 2;
        let initial_scores = if binary {
            vec![(priors[1] / (1.0 - priors[1])).ln()]
        } else {
            priors.iter().map(|p| p.ln()).collect()
        };
        let width = initial_scores.len();

        // raw[i * width + k] is sample i's current score for output k.
        let mut raw: Vec<f64> = (0..n_samples)
            .flat_map(|_| initial_scores.iter().copied())
            .collect();
        let mut rounds = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let probabilities: Vec<Vec<f64>> = (0..n_samples)
                .map(|i| scores_to_probabilities(&raw[i * width..(i + 1) * width], n_classes))
                .collect();

            let mut round = Vec::with_capacity(width);
            for k in 0..width {
                let class = if binary { 1 } else { k };
                let residuals: Vec<f64> = (0..n_samples)
                    .map(|i| indicator(labels[i] == class) - probabilities[i][class])
                    .collect();

                let mut tree = DecisionTree::fit(
                    x,
                    &rows,
                    Criterion::SquaredError {
                        targets: &residuals,
                    },
                    &tree_params,
                    &mut rng,
                );

                let leaves: Vec<usize> = (0..n_samples).map(|i| tree.leaf_index(x.row(i))).collect();
                let mut numerators = vec![0.0; tree.node_count()];
                let mut denominators = vec![0.0; tree.node_count()];
                for (i, &leaf) in leaves.iter().enumerate() {
                    let r = residuals[i];
                    numerators[leaf] += r;
                    denominators[leaf] += r.abs() * (1.0 - r.abs());
                }
                let scale = if binary {
                    1.0
                } else {
                    (n_classes as f64 - 1.0) / n_classes as f64
                };
                let mut steps = vec![0.0; tree.node_count()];
                for leaf in leaves.iter().copied() {
                    steps[leaf] = if denominators[leaf] < HESSIAN_FLOOR {
                        0.0
                    } else {
                        scale * numerators[leaf] / denominators[leaf]
                    };
                }
                for (leaf, step) in steps.iter().enumerate() {
                    tree.set_leaf_value(leaf, vec![*step]);
                }
                for (i, &leaf) in leaves.iter().enumerate() {
                    raw[i * width + k] += params.learning_rate * steps[leaf];
                }
                round.push(tree);
            }
            rounds.push(round);
        }

        Ok(Self {
            initial_scores,
            rounds,
            learning_rate: params.learning_rate,
            n_classes,
            n_features: x.ncols(),
        })
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Number of raw scores per round: one for binary targets, one per class
    /// otherwise.
    fn score_width(&self) -> usize {
        if self.n_classes == 2 { 1 } else { self.n_classes }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.n_classes < 2 {
            return Err(format!("boosting needs two or more classes, found {}", self.n_classes));
        }
        let width = self.score_width();
        if self.initial_scores.len() != width {
            return Err(format!(
                "{} initial scores for {} classes, expected {width}",
                self.initial_scores.len(),
                self.n_classes
            ));
        }
        for (round_index, round) in self.rounds.iter().enumerate() {
            if round.len() != width {
                return Err(format!(
                    "round {round_index} has {} trees, expected {width}",
                    round.len()
                ));
            }
            for tree in round {
                tree.validate(self.n_features, 1)
                    .map_err(|reason| format!("round {round_index}: {reason}"))?;
            }
        }
        Ok(())
    }

    pub fn predict_proba(&self, row: ArrayView1<f64>) -> Array1<f64> {
        let mut scores = self.initial_scores.clone();
        for round in &self.rounds {
            for (score, tree) in scores.iter_mut().zip(round) {
                *score += self.learning_rate * tree.leaf_value(row).first().copied().unwrap_or(0.0);
            }
        }
        Array1::from(scores_to_probabilities(&scores, self.n_classes))
    }
}

fn indicator(condition: bool) -> f64 {
    if condition { 1.0 } else { 0.0 }
}

fn scores_to_probabilities(scores: &[f64], n_classes: usize) -> Vec<f64> {
    if n_classes == 2 {
        let clamped = scores[0].clamp(-RAW_SCORE_LIMIT, RAW_SCORE_LIMIT);
        let positive = 1.0 / (1.0 + (-clamped).exp());
        return vec![1.0 - positive, positive];
    }
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}
