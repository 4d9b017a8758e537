//! CART decision tree with weighted Gini impurity and probability leaves.

use crate::preprocess::{FeatureRow, N_FEATURES};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Tree node. Children are indices into [`DecisionTree::nodes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Terminal node holding the weighted positive-class fraction.
    Leaf {
        /// Probability of label 1.
        probability: f64,
    },
    /// `row[feature] <= threshold` goes left.
    Split {
        /// Feature index.
        feature: usize,
        /// Split threshold.
        threshold: f64,
        /// Left child.
        left: usize,
        /// Right child.
        right: usize,
    },
}

/// Growth limits for one tree.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    pub max_features: usize,
}

/// A fitted binary decision tree. The root is node 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct Builder<'a> {
    rows: &'a [FeatureRow],
    labels: &'a [u8],
    weights: &'a [f64],
    params: TreeParams,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

fn gini(w0: f64, w1: f64) -> f64 {
    let total = w0 + w1;
    if total <= 0.0 {
        return 0.0;
    }
    let p0 = w0 / total;
    let p1 = w1 / total;
    1.0 - p0.mul_add(p0, p1 * p1)
}

impl DecisionTree {
    /// Fit on the rows whose weight is positive.
    pub(crate) fn fit(
        rows: &[FeatureRow],
        labels: &[u8],
        weights: &[f64],
        params: TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let samples: Vec<usize> = (0..rows.len()).filter(|&i| weights[i] > 0.0).collect();
        let mut builder = Builder {
            rows,
            labels,
            weights,
            params,
            nodes: Vec::new(),
        };
        builder.build(samples, 0, rng);
        Self {
            nodes: builder.nodes,
        }
    }

    /// Positive-class probability for one row.
    #[must_use]
    pub fn predict_proba(&self, row: &FeatureRow) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { probability } => return *probability,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// All nodes, root first.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Longest root-to-leaf path, in edges.
    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

impl Builder<'_> {
    fn class_weights(&self, samples: &[usize]) -> (f64, f64) {
        samples.iter().fold((0.0, 0.0), |(w0, w1), &i| {
            if self.labels[i] == 1 {
                (w0, w1 + self.weights[i])
            } else {
                (w0 + self.weights[i], w1)
            }
        })
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn build(&mut self, samples: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let (w0, w1) = self.class_weights(&samples);
        let total = w0 + w1;
        let probability = if total > 0.0 { w1 / total } else { 0.0 };

        let pure = w0 == 0.0 || w1 == 0.0;
        if pure || depth >= self.params.max_depth || samples.len() < 2 {
            return self.push(Node::Leaf { probability });
        }

        let parent_impurity = gini(w0, w1);
        let Some(best) = self.best_split(&samples, rng) else {
            return self.push(Node::Leaf { probability });
        };
        if best.impurity >= parent_impurity {
            return self.push(Node::Leaf { probability });
        }

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&i| self.rows[i][best.feature] <= best.threshold);

        // Reserve the slot so the parent precedes its children.
        let index = self.push(Node::Leaf { probability });
        let left = self.build(left_samples, depth + 1, rng);
        let right = self.build(right_samples, depth + 1, rng);
        self.nodes[index] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        index
    }

    /// Visit features in random order until `max_features` non-constant ones
    /// have been tried and a split exists.
    fn best_split(&self, samples: &[usize], rng: &mut StdRng) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..N_FEATURES).collect();
        features.shuffle(rng);

        let mut best: Option<BestSplit> = None;
        let mut visited = 0;
        for feature in features {
            if visited >= self.params.max_features && best.is_some() {
                break;
            }
            let Some(candidate) = self.best_split_on(samples, feature) else {
                continue;
            };
            visited += 1;
            if best.as_ref().map_or(true, |b| candidate.impurity < b.impurity) {
                best = Some(candidate);
            }
        }
        best
    }

    /// Lowest weighted child impurity over thresholds of one feature;
    /// `None` if the feature is constant on these samples.
    fn best_split_on(&self, samples: &[usize], feature: usize) -> Option<BestSplit> {
        let mut sorted: Vec<usize> = samples.to_vec();
        sorted.sort_by(|&a, &b| self.rows[a][feature].total_cmp(&self.rows[b][feature]));

        let (total0, total1) = self.class_weights(&sorted);
        let total = total0 + total1;
        let (mut left0, mut left1) = (0.0, 0.0);
        let mut best: Option<BestSplit> = None;

        for pair in sorted.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            if self.labels[current] == 1 {
                left1 += self.weights[current];
            } else {
                left0 += self.weights[current];
            }

            let value = self.rows[current][feature];
            let next_value = self.rows[next][feature];
            if next_value <= value {
                continue;
            }

            let left_total = left0 + left1;
            let right0 = total0 - left0;
            let right1 = total1 - left1;
            let impurity = left_total.mul_add(
                gini(left0, left1),
                (total - left_total) * gini(right0, right1),
            ) / total;

            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                let mut threshold = value + (next_value - value) / 2.0;
                if threshold >= next_value {
                    threshold = value;
                }
                best = Some(BestSplit {
                    feature,
                    threshold,
                    impurity,
                });
            }
        }
        best
    }
}
