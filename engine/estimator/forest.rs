use super::tree::{Criterion, DecisionTree, TreeParams};
use super::{EstimatorError, ForestParams, validate_training_input};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Bagged ensemble of Gini trees with `sqrt(n_features)` candidates per split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    trees: Vec<DecisionTree>,
    n_classes: usize,
    n_features: usize,
}

impl RandomForestClassifier {
    /// Fits the forest. Each tree draws its bootstrap sample and feature subsets
    /// from its own generator seeded from `seed` and the tree index, so the
    /// result is identical however rayon schedules the work.
    pub fn fit(
        x: ArrayView2<f64>,
        labels: &[usize],
        n_classes: usize,
        params: &ForestParams,
        seed: u64,
    ) -> Result<Self, EstimatorError> {
        validate_training_input(x, labels.len(), n_classes)?;
        let n_samples = x.nrows();
        let n_features = x.ncols();
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: Some(((n_features as f64).sqrt() as usize).max(1)),
        };

        let trees: Vec<DecisionTree> = (0..params.n_estimators.max(1))
            .into_par_iter()
            .map(|index| {
                let mut rng = StdRng::seed_from_u64(tree_seed(seed, index));
                let bootstrap: Vec<usize> = (0..n_samples)
                    .map(|_| rng.gen_range(0..n_samples))
                    .collect();
                DecisionTree::fit(
                    x,
                    &bootstrap,
                    Criterion::Gini { labels, n_classes },
                    &tree_params,
                    &mut rng,
                )
            })
            .collect();

        Ok(Self {
            trees,
            n_classes,
            n_features,
        })
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, self.n_classes)
                .map_err(|reason| format!("tree {index}: {reason}"))?;
        }
        Ok(())
    }

    /// Mean of the per-tree leaf class distributions.
    pub fn predict_proba(&self, row: ArrayView1<f64>) -> Array1<f64> {
        let mut summed = Array1::<f64>::zeros(self.n_classes);
        for tree in &self.trees {
            for (acc, p) in summed.iter_mut().zip(tree.leaf_value(row)) {
                *acc += p;
            }
        }
        summed / self.trees.len().max(1) as f64
    }
}

fn tree_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_add((index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn two_blobs() -> (Array2<f64>, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 60;
        let x = Array2::from_shape_fn((n, 4), |(i, j)| {
            let centre = if i < n / 2 { 0.0 } else { 5.0 };
            let noise: f64 = rng.gen_range(-1.0..1.0);
            if j < 2 { centre + noise } else { noise }
        });
        let labels = (0..n).map(|i| usize::from(i >= n / 2)).collect();
        (x, labels)
    }

    fn small() -> ForestParams {
        ForestParams {
            n_estimators: 15,
            ..ForestParams::default()
        }
    }

    #[test]
    fn probabilities_form_a_distribution_and_classify_the_blobs() {
        let (x, labels) = two_blobs();
        let forest = RandomForestClassifier::fit(x.view(), &labels, 2, &small(), 42).unwrap();
        assert_eq!(forest.n_trees(), 15);

        let low = forest.predict_proba(array![0.1, -0.2, 0.0, 0.3].view());
        let high = forest.predict_proba(array![5.2, 4.9, 0.0, 0.1].view());
        assert_abs_diff_eq!(low.sum(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(high.sum(), 1.0, epsilon = 1e-12);
        assert!(low[0] > 0.8);
        assert!(high[1] > 0.8);
    }

    #[test]
    fn same_seed_gives_the_same_forest() {
        let (x, labels) = two_blobs();
        let a = RandomForestClassifier::fit(x.view(), &labels, 2, &small(), 3).unwrap();
        let b = RandomForestClassifier::fit(x.view(), &labels, 2, &small(), 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_a_single_class() {
        let (x, _) = two_blobs();
        let labels = vec![0; x.nrows()];
        let err = RandomForestClassifier::fit(x.view(), &labels, 1, &small(), 3).unwrap_err();
        assert!(matches!(err, EstimatorError::TooFewClasses(1)));
    }

    #[test]
    fn validate_checks_every_tree_against_the_class_count() {
        let (x, labels) = two_blobs();
        let mut forest = RandomForestClassifier::fit(x.view(), &labels, 2, &small(), 5).unwrap();
        assert!(forest.validate().is_ok());
        forest.n_classes = 3;
        assert!(forest.validate().unwrap_err().starts_with("tree 0:"));
        forest.trees.clear();
        assert!(forest.validate().is_err());
    }
}
