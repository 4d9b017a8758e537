//! Evaluator: held-out metrics and the confusion-matrix artifact
//!
//! Produces AUC-ROC over probabilities, precision/recall over hard
//! predictions, and writes one SVG file per evaluation.

mod confusion;
mod metrics;

pub use confusion::ConfusionMatrix;
pub use metrics::{precision, recall, roc_auc};

use crate::forest::Classifier;
use crate::preprocess::{FeatureMatrix, LabelVector};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// File name of the confusion-matrix artifact.
pub const CONFUSION_MATRIX_FILE: &str = "confusion_matrix.svg";

/// AUC reported when the held-out labels hold a single class.
pub const UNDEFINED_AUC: f64 = 0.5;

/// Metrics and artifact of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Area under the ROC curve.
    pub auc_roc: f64,
    /// Precision of hard predictions.
    pub precision: f64,
    /// Recall of hard predictions.
    pub recall: f64,
    /// Counts behind precision/recall.
    pub confusion_matrix: ConfusionMatrix,
    /// Local SVG rendering of the confusion matrix.
    pub confusion_matrix_artifact: PathBuf,
}

impl EvaluationReport {
    /// `(auc_roc, precision, recall)`.
    #[must_use]
    pub const fn metrics(&self) -> (f64, f64, f64) {
        (self.auc_roc, self.precision, self.recall)
    }
}

/// Evaluates models, writing artifacts into one directory.
#[derive(Debug, Clone)]
pub struct Evaluator {
    output_dir: PathBuf,
}

impl Evaluator {
    /// Evaluator writing into `output_dir` (created on demand).
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Directory artifacts are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Score the held-out rows and write the confusion-matrix artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Other`] for misaligned inputs and [`Error::Io`] if the
    /// artifact cannot be written.
    #[instrument(skip_all, fields(rows = features.len()))]
    pub fn evaluate<C: Classifier + ?Sized>(
        &self,
        model: &C,
        features: &FeatureMatrix,
        labels: &LabelVector,
    ) -> Result<EvaluationReport> {
        if features.len() != labels.len() {
            return Err(Error::Other(format!(
                "held-out rows ({}) and labels ({}) differ in length",
                features.len(),
                labels.len()
            )));
        }

        let probabilities = model.predict_proba(features);
        let predictions = model.predict(features);
        let y = labels.as_slice();

        let auc_roc = roc_auc(y, &probabilities).unwrap_or_else(|| {
            warn!(
                rows = y.len(),
                "held-out labels hold a single class; AUC-ROC undefined, reporting {UNDEFINED_AUC}"
            );
            UNDEFINED_AUC
        });
        let confusion_matrix = ConfusionMatrix::from_predictions(y, &predictions);

        std::fs::create_dir_all(&self.output_dir)?;
        let artifact = self.output_dir.join(CONFUSION_MATRIX_FILE);
        confusion_matrix.write_svg(&artifact)?;

        let report = EvaluationReport {
            auc_roc,
            precision: precision(&confusion_matrix),
            recall: recall(&confusion_matrix),
            confusion_matrix,
            confusion_matrix_artifact: artifact,
        };
        info!(
            auc_roc = report.auc_roc,
            precision = report.precision,
            recall = report.recall,
            "model evaluated"
        );
        Ok(report)
    }
}
