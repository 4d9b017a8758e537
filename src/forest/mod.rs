//! Random forest binary classifier
//!
//! Bootstrap-aggregated CART trees. Per-tree seeds are drawn from
//! `random_state` before any tree is grown, so sequential and parallel
//! (feature `rayon`) fitting produce identical forests.

mod tree;

pub use tree::{DecisionTree, Node};

use crate::config::{ClassWeight, Hyperparameters};
use crate::preprocess::{FeatureMatrix, FeatureRow, LabelVector, N_FEATURES};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tree::TreeParams;

/// Probability above which a row is predicted positive.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Anything that scores feature rows with a positive-class probability.
pub trait Classifier {
    /// Probability of label 1 for one row.
    fn predict_proba_row(&self, row: &FeatureRow) -> f64;

    /// Probability of label 1 for every row.
    fn predict_proba(&self, features: &FeatureMatrix) -> Vec<f64> {
        features
            .rows()
            .iter()
            .map(|row| self.predict_proba_row(row))
            .collect()
    }

    /// Hard 0/1 predictions.
    fn predict(&self, features: &FeatureMatrix) -> Vec<u8> {
        self.predict_proba(features)
            .into_iter()
            .map(|p| u8::from(p > DECISION_THRESHOLD))
            .collect()
    }
}

/// Fitted random forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    hyperparameters: Hyperparameters,
    class_weights: [f64; 2],
    trees: Vec<DecisionTree>,
}

/// Candidate features per split: `floor(sqrt(n_features))`, at least 1.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_precision_loss)]
pub fn max_features() -> usize {
    ((N_FEATURES as f64).sqrt().floor() as usize).max(1)
}

impl RandomForestClassifier {
    /// Fit a forest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Training`] if the inputs are empty or misaligned, the
    /// labels hold a single class, or the tree count/depth is zero.
    pub fn fit(
        features: &FeatureMatrix,
        labels: &LabelVector,
        hyperparameters: &Hyperparameters,
    ) -> Result<Self> {
        if hyperparameters.n_estimators == 0 {
            return Err(Error::Training("n_estimators must be positive".to_string()));
        }
        if hyperparameters.max_depth == 0 {
            return Err(Error::Training("max_depth must be positive".to_string()));
        }
        if features.is_empty() {
            return Err(Error::Training("cannot fit on an empty training set".to_string()));
        }
        if features.len() != labels.len() {
            return Err(Error::Training(format!(
                "feature rows ({}) and labels ({}) differ in length",
                features.len(),
                labels.len()
            )));
        }
        let positives = labels.positives();
        let negatives = labels.len() - positives;
        if positives == 0 || negatives == 0 {
            return Err(Error::Training(format!(
                "training labels contain a single class ({negatives} negative, {positives} positive)"
            )));
        }

        #[allow(clippy::cast_precision_loss)]
        let class_weights = match hyperparameters.class_weight {
            ClassWeight::None => [1.0, 1.0],
            ClassWeight::Balanced => {
                let n = labels.len() as f64;
                [n / (2.0 * negatives as f64), n / (2.0 * positives as f64)]
            }
        };

        let mut master = StdRng::seed_from_u64(hyperparameters.random_state.unwrap_or_else(rand::random));
        let seeds: Vec<u64> = (0..hyperparameters.n_estimators)
            .map(|_| master.gen())
            .collect();

        let params = TreeParams {
            max_depth: hyperparameters.max_depth,
            max_features: max_features(),
        };
        let rows = features.rows();
        let y = labels.as_slice();
        let grow = |seed: &u64| grow_tree(rows, y, class_weights, params, *seed);

        #[cfg(feature = "rayon")]
        let trees: Vec<DecisionTree> = {
            use rayon::prelude::*;
            seeds.par_iter().map(grow).collect()
        };
        #[cfg(not(feature = "rayon"))]
        let trees: Vec<DecisionTree> = seeds.iter().map(grow).collect();

        Ok(Self {
            hyperparameters: *hyperparameters,
            class_weights,
            trees,
        })
    }

    /// Hyperparameters the forest was fitted with.
    #[must_use]
    pub const fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    /// Per-class sample weights used during fitting (`[negative, positive]`).
    #[must_use]
    pub const fn class_weights(&self) -> [f64; 2] {
        self.class_weights
    }

    /// Fitted trees.
    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

impl Classifier for RandomForestClassifier {
    #[allow(clippy::cast_precision_loss)]
    fn predict_proba_row(&self, row: &FeatureRow) -> f64 {
        let sum: f64 = self.trees.iter().map(|tree| tree.predict_proba(row)).sum();
        sum / self.trees.len() as f64
    }
}

/// One bootstrap replicate: each draw adds its class weight to the row.
fn grow_tree(
    rows: &[FeatureRow],
    labels: &[u8],
    class_weights: [f64; 2],
    params: TreeParams,
    seed: u64,
) -> DecisionTree {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = rows.len();
    let mut weights = vec![0.0; n];
    for _ in 0..n {
        let i = rng.gen_range(0..n);
        weights[i] += class_weights[usize::from(labels[i])];
    }
    DecisionTree::fit(rows, labels, &weights, params, &mut rng)
}
