//! CART decision trees stored as a flat node arena.
//!
//! The same builder serves both ensemble families: class-distribution leaves
//! grown on Gini impurity for the forest, and scalar leaves grown on squared
//! error for the boosting residual fits. Nodes reference children by index so
//! a fitted tree serialises as a plain list.

use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

/// Minimum gain a split has to deliver over its parent to be kept.
const MIN_SPLIT_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

/// Impurity measure together with the targets it is evaluated on. Targets are
/// indexed by the row numbers handed to [`DecisionTree::fit`].
#[derive(Debug, Clone, Copy)]
pub enum Criterion<'a> {
    Gini { labels: &'a [usize], n_classes: usize },
    SquaredError { targets: &'a [f64] },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Number of candidate features drawn at every node. `None` means all.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_features: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl DecisionTree {
    /// Grows a tree on the rows listed in `samples`. Rows may repeat, which is
    /// how bootstrap resamples are expressed.
    pub fn fit<R: Rng>(
        x: ArrayView2<f64>,
        samples: &[usize],
        criterion: Criterion<'_>,
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        let n_features = x.ncols();
        let mut nodes: Vec<Node> = Vec::new();
        // Work items: (node slot to fill, rows reaching it, depth).
        let mut pending: Vec<(usize, Vec<usize>, usize)> = Vec::new();

        nodes.push(leaf_for(samples, criterion));
        pending.push((0, samples.to_vec(), 0));

        while let Some((slot, rows, depth)) = pending.pop() {
            let depth_allows = params.max_depth.is_none_or(|max| depth < max);
            let size_allows = rows.len() >= params.min_samples_split.max(2)
                && rows.len() >= 2 * params.min_samples_leaf.max(1);
            if !depth_allows || !size_allows || is_pure(&rows, criterion) {
                continue;
            }

            let candidates: Vec<usize> = match params.max_features {
                Some(k) if k > 0 && k < n_features => sample(rng, n_features, k).into_vec(),
                _ => (0..n_features).collect(),
            };

            let Some(split) = best_split(x, &rows, &candidates, criterion, params) else {
                continue;
            };

            let left_slot = nodes.len();
            nodes.push(leaf_for(&split.left, criterion));
            let right_slot = nodes.len();
            nodes.push(leaf_for(&split.right, criterion));
            nodes[slot] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: left_slot,
                right: right_slot,
            };
            pending.push((right_slot, split.right, depth + 1));
            pending.push((left_slot, split.left, depth + 1));
        }

        Self { nodes, n_features }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Index of the leaf a row lands in.
    pub fn leaf_index(&self, row: ArrayView1<f64>) -> usize {
        let mut current = 0;
        loop {
            match &self.nodes[current] {
                Node::Leaf { .. } => return current,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    current = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn leaf_value(&self, row: ArrayView1<f64>) -> &[f64] {
        match &self.nodes[self.leaf_index(row)] {
            Node::Leaf { value } => value,
            Node::Split { .. } => &[],
        }
    }

    /// Structural check for trees read back from disk. Children must point
    /// strictly forward in the arena, which rules out both dangling indices
    /// and cycles; split features must exist; every leaf must hold
    /// `leaf_width` values.
    pub fn validate(&self, n_features: usize, leaf_width: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        if self.n_features != n_features {
            return Err(format!(
                "tree was grown on {} features, ensemble expects {n_features}",
                self.n_features
            ));
        }
        let n_nodes = self.nodes.len();
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(format!(
                            "node {index} splits on feature {feature} of {n_features}"
                        ));
                    }
                    for child in [*left, *right] {
                        if child <= index || child >= n_nodes {
                            return Err(format!(
                                "node {index} points to child {child} outside {}..{n_nodes}",
                                index + 1
                            ));
                        }
                    }
                }
                Node::Leaf { value } => {
                    if value.len() != leaf_width {
                        return Err(format!(
                            "leaf {index} holds {} values, expected {leaf_width}",
                            value.len()
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Overwrites a leaf's stored value. Boosting uses this to replace the mean
    /// residual with a Newton step after the structure has been grown.
    pub fn set_leaf_value(&mut self, leaf: usize, value: Vec<f64>) {
        if let Some(Node::Leaf { value: stored }) = self.nodes.get_mut(leaf) {
            *stored = value;
        }
    }
}

fn leaf_for(rows: &[usize], criterion: Criterion<'_>) -> Node {
    let value = match criterion {
        Criterion::Gini { labels, n_classes } => {
            let mut counts = vec![0.0; n_classes];
            for &row in rows {
                counts[labels[row]] += 1.0;
            }
            let total = rows.len().max(1) as f64;
            counts.iter().map(|c| c / total).collect()
        }
        Criterion::SquaredError { targets } => {
            let sum: f64 = rows.iter().map(|&row| targets[row]).sum();
            vec![sum / rows.len().max(1) as f64]
        }
    };
    Node::Leaf { value }
}

fn is_pure(rows: &[usize], criterion: Criterion<'_>) -> bool {
    match criterion {
        Criterion::Gini { labels, .. } => rows.windows(2).all(|w| labels[w[0]] == labels[w[1]]),
        Criterion::SquaredError { targets } => {
            rows.windows(2).all(|w| targets[w[0]] == targets[w[1]])
        }
    }
}

/// Scores a partition by the proxy that Gini and squared-error reductions are
/// monotone in: sum of squared class counts (or squared target sums) divided by
/// the side size.
fn side_score(stats: &[f64], count: usize) -> f64 {
    stats.iter().map(|s| s * s).sum::<f64>() / count as f64
}

fn best_split(
    x: ArrayView2<f64>,
    rows: &[usize],
    candidates: &[usize],
    criterion: Criterion<'_>,
    params: &TreeParams,
) -> Option<BestSplit> {
    let n = rows.len();
    let min_leaf = params.min_samples_leaf.max(1);
    let width = match criterion {
        Criterion::Gini { n_classes, .. } => n_classes,
        Criterion::SquaredError { .. } => 1,
    };
    let contribution = |row: usize, stats: &mut [f64], sign: f64| match criterion {
        Criterion::Gini { labels, .. } => stats[labels[row]] += sign,
        Criterion::SquaredError { targets } => stats[0] += sign * targets[row],
    };

    let mut total = vec![0.0; width];
    for &row in rows {
        contribution(row, &mut total, 1.0);
    }
    let parent_score = side_score(&total, n);

    let mut best: Option<(f64, usize, f64, Vec<usize>, usize)> = None;
    let mut order: Vec<usize> = rows.to_vec();

    for &feature in candidates {
        order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

        let mut left = vec![0.0; width];
        let mut right = total.clone();
        for position in 0..n - 1 {
            let row = order[position];
            contribution(row, &mut left, 1.0);
            contribution(row, &mut right, -1.0);

            let left_count = position + 1;
            let right_count = n - left_count;
            if left_count < min_leaf || right_count < min_leaf {
                continue;
            }
            let here = x[[row, feature]];
            let next = x[[order[position + 1], feature]];
            if here >= next {
                continue;
            }

            let score = side_score(&left, left_count) + side_score(&right, right_count);
            if score <= parent_score + MIN_SPLIT_GAIN {
                continue;
            }
            if best.as_ref().is_none_or(|current| score > current.0) {
                let mut threshold = here + (next - here) / 2.0;
                if threshold >= next {
                    threshold = here;
                }
                best = Some((score, feature, threshold, order.clone(), left_count));
            }
        }
    }

    best.map(|(_, feature, threshold, sorted, left_count)| {
        let right = sorted[left_count..].to_vec();
        let mut left = sorted;
        left.truncate(left_count);
        BestSplit {
            feature,
            threshold,
            left,
            right,
        }
    })
}
