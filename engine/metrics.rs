use serde::{Deserialize, Serialize};

/// Held-out evaluation summary. Precision, recall and F1 are averaged over the
/// classes weighted by their support in the true labels; a class that was
/// never predicted contributes a precision of zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl ClassificationMetrics {
    pub fn weighted(truth: &[usize], predicted: &[usize], n_classes: usize) -> Self {
        let total = truth.len();
        if total == 0 {
            return Self {
                accuracy: 0.0,
                precision: 0.0,
                recall: 0.0,
                f1_score: 0.0,
            };
        }

        let mut true_positive = vec![0usize; n_classes];
        let mut predicted_count = vec![0usize; n_classes];
        let mut support = vec![0usize; n_classes];
        let mut correct = 0usize;
        for (&t, &p) in truth.iter().zip(predicted) {
            support[t] += 1;
            predicted_count[p] += 1;
            if t == p {
                true_positive[t] += 1;
                correct += 1;
            }
        }

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let mut precision = 0.0;
        let mut recall = 0.0;
        let mut f1_score = 0.0;
        for class in 0..n_classes {
            if support[class] == 0 {
                continue;
            }
            let weight = support[class] as f64 / total as f64;
            let p = ratio(true_positive[class], predicted_count[class]);
            let r = ratio(true_positive[class], support[class]);
            let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
            precision += weight * p;
            recall += weight * r;
            f1_score += weight * f;
        }

        Self {
            accuracy: correct as f64 / total as f64,
            precision,
            recall,
            f1_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn perfect_predictions_score_one() {
        let m = ClassificationMetrics::weighted(&[0, 1, 2, 1], &[0, 1, 2, 1], 3);
        assert_eq!(m.accuracy, 1.0);
        assert_abs_diff_eq!(m.precision, 1.0);
        assert_abs_diff_eq!(m.recall, 1.0);
        assert_abs_diff_eq!(m.f1_score, 1.0);
    }

    #[test]
    fn weights_follow_true_label_support() {
        // Class 0: support 3, predicted 4 times, 3 hits. Class 1: support 1, never predicted.
        let m = ClassificationMetrics::weighted(&[0, 0, 0, 1], &[0, 0, 0, 0], 2);
        assert_abs_diff_eq!(m.accuracy, 0.75);
        assert_abs_diff_eq!(m.precision, 0.75 * 0.75);
        assert_abs_diff_eq!(m.recall, 0.75);
        let f_zero = 2.0 * 0.75 / 1.75;
        assert_abs_diff_eq!(m.f1_score, 0.75 * f_zero, epsilon = 1e-12);
    }
}
