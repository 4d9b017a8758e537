//! Model trainer: seeded 80/20 split, then a forest fit on the 80%.

use crate::config::Hyperparameters;
use crate::forest::RandomForestClassifier;
use crate::preprocess::{FeatureMatrix, LabelVector};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, instrument};

/// Seed of the train/held-out shuffle.
pub const SPLIT_SEED: u64 = 42;

/// Fraction of rows held out for evaluation.
pub const TEST_FRACTION: f64 = 0.2;

/// Train/held-out partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    /// Rows to fit on.
    pub train_features: FeatureMatrix,
    /// Labels to fit on.
    pub train_labels: LabelVector,
    /// Rows held out for evaluation.
    pub test_features: FeatureMatrix,
    /// Held-out labels.
    pub test_labels: LabelVector,
}

/// Fitted model plus the untouched held-out partition.
#[derive(Debug, Clone)]
pub struct TrainOutput {
    /// Fitted forest.
    pub model: RandomForestClassifier,
    /// Held-out rows.
    pub test_features: FeatureMatrix,
    /// Held-out labels.
    pub test_labels: LabelVector,
}

/// Held-out size for `n` rows: `ceil(n * fraction)`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_precision_loss)]
pub fn test_size(n: usize, fraction: f64) -> usize {
    (n as f64 * fraction).ceil() as usize
}

/// Shuffle row indices with `seed` and cut off the held-out tail.
///
/// # Errors
///
/// Returns [`Error::Training`] if either partition would be empty or the
/// inputs are misaligned.
pub fn train_test_split(
    features: &FeatureMatrix,
    labels: &LabelVector,
    test_fraction: f64,
    seed: u64,
) -> Result<Split> {
    if features.len() != labels.len() {
        return Err(Error::Training(format!(
            "feature rows ({}) and labels ({}) differ in length",
            features.len(),
            labels.len()
        )));
    }
    let n = features.len();
    let n_test = test_size(n, test_fraction);
    if n_test == 0 || n_test >= n {
        return Err(Error::Training(format!(
            "cannot split {n} rows into non-empty train and held-out sets"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let (test, train) = indices.split_at(n_test);

    Ok(Split {
        train_features: features.select(train),
        train_labels: labels.select(train),
        test_features: features.select(test),
        test_labels: labels.select(test),
    })
}

/// Split with [`SPLIT_SEED`] and fit a forest on the training partition.
///
/// # Errors
///
/// Returns [`Error::Training`] on a degenerate split or fit.
#[instrument(skip_all, fields(rows = features.len(), n_estimators = hyperparameters.n_estimators))]
pub fn train(
    features: &FeatureMatrix,
    labels: &LabelVector,
    hyperparameters: &Hyperparameters,
) -> Result<TrainOutput> {
    let split = train_test_split(features, labels, TEST_FRACTION, SPLIT_SEED)?;
    let model = RandomForestClassifier::fit(&split.train_features, &split.train_labels, hyperparameters)?;

    info!(
        train_rows = split.train_features.len(),
        held_out_rows = split.test_features.len(),
        trees = model.trees().len(),
        "model fitted"
    );

    Ok(TrainOutput {
        model,
        test_features: split.test_features,
        test_labels: split.test_labels,
    })
}
