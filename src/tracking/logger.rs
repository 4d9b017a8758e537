//! Run logger / registrar
//!
//! Records one pipeline run (params, metrics, artifact, model payload) and
//! registers the model as the next version of the registered model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{ModelUri, RunScope, TrackingStore};
use crate::config::{Hyperparameters, MODEL_ARTIFACT_PATH};
use crate::evaluate::EvaluationReport;
use crate::forest::RandomForestClassifier;
use crate::pipeline::Cancellation;
use crate::preprocess::{CategoricalVocabulary, FeatureMatrix, FeatureRow, FEATURE_COLUMNS};
use crate::{Error, Result};

/// Sample rows stored with the model as its input example.
pub const INPUT_EXAMPLE_ROWS: usize = 5;

/// Flavor tag of model payloads written by this crate.
pub const MODEL_FLAVOR: &str = "readmission-random-forest";

const FORMAT_VERSION: u32 = 1;

/// Serialized model payload: everything needed to score a raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Always [`MODEL_FLAVOR`].
    pub flavor: String,
    /// Payload layout version.
    pub format_version: u32,
    /// Feature order the model expects.
    pub feature_columns: Vec<String>,
    /// Category codes used when the model was trained.
    pub vocabulary: CategoricalVocabulary,
    /// First rows of the held-out features, in model input order.
    pub input_example: Vec<FeatureRow>,
    /// The fitted forest.
    pub model: RandomForestClassifier,
}

impl ModelArtifact {
    /// Bundle a model with its vocabulary and an input example.
    #[must_use]
    pub fn new(
        model: RandomForestClassifier,
        vocabulary: CategoricalVocabulary,
        sample_features: &FeatureMatrix,
    ) -> Self {
        Self {
            flavor: MODEL_FLAVOR.to_string(),
            format_version: FORMAT_VERSION,
            feature_columns: FEATURE_COLUMNS.iter().map(ToString::to_string).collect(),
            vocabulary,
            input_example: sample_features.head(INPUT_EXAMPLE_ROWS).rows().to_vec(),
            model,
        }
    }

    /// JSON bytes as stored in the tracking store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrackingStore`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::tracking("encoding model payload", e))
    }

    /// Parse and validate a stored payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrackingStore`] if the payload is not a model written
    /// by this crate or its feature layout differs.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let artifact: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::tracking("decoding model payload", e))?;
        if artifact.flavor != MODEL_FLAVOR || artifact.format_version != FORMAT_VERSION {
            return Err(Error::TrackingStore(format!(
                "unsupported model payload {} v{}",
                artifact.flavor, artifact.format_version
            )));
        }
        if artifact.feature_columns != FEATURE_COLUMNS {
            return Err(Error::TrackingStore(format!(
                "model expects features {:?}",
                artifact.feature_columns
            )));
        }
        Ok(artifact)
    }
}

/// Where a run's model ended up in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredModelRef {
    /// Run that logged the model.
    pub run_id: String,
    /// `runs:/` URI of the logged model.
    pub model_uri: ModelUri,
    /// Registered model name.
    pub name: String,
    /// Version assigned by the registry.
    pub version: u32,
}

impl RegisteredModelRef {
    /// `models:/<name>/<version>` URI of the registered version.
    #[must_use]
    pub fn version_uri(&self) -> ModelUri {
        ModelUri::version(&self.name, self.version)
    }
}

/// Logs runs under one experiment and registers their models.
#[derive(Clone)]
pub struct RunLogger {
    store: Arc<dyn TrackingStore>,
    experiment_name: String,
    registered_model_name: String,
    cancellation: Cancellation,
}

impl std::fmt::Debug for RunLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLogger")
            .field("experiment_name", &self.experiment_name)
            .field("registered_model_name", &self.registered_model_name)
            .finish_non_exhaustive()
    }
}

impl RunLogger {
    /// Logger writing to `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn TrackingStore>,
        experiment_name: impl Into<String>,
        registered_model_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            experiment_name: experiment_name.into(),
            registered_model_name: registered_model_name.into(),
            cancellation: Cancellation::new(),
        }
    }

    /// Stop before registering once `cancellation` is tripped.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Record one run and register its model.
    ///
    /// The run is closed as `Success` only after registration succeeds; any
    /// earlier failure closes it as `Failed`. A cancellation seen before
    /// registration also closes it as `Failed` and registers nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrackingStore`] for any store failure.
    #[instrument(skip_all, fields(experiment = %self.experiment_name))]
    pub fn log_and_register(
        &self,
        hyperparameters: &Hyperparameters,
        model: &RandomForestClassifier,
        vocabulary: &CategoricalVocabulary,
        report: &EvaluationReport,
        sample_features: &FeatureMatrix,
    ) -> Result<RegisteredModelRef> {
        let experiment = self.store.get_or_create_experiment(&self.experiment_name)?;
        let scope = RunScope::begin(self.store.as_ref(), experiment.experiment_id())?;

        scope.log_params(&hyperparameters.to_params())?;
        scope.log_metric("auc_roc", report.auc_roc)?;
        scope.log_metric("precision", report.precision)?;
        scope.log_metric("recall", report.recall)?;
        scope.log_artifact(&report.confusion_matrix_artifact)?;

        let payload =
            ModelArtifact::new(model.clone(), vocabulary.clone(), sample_features).to_bytes()?;
        self.cancellation.check("logging model")?;
        let model_uri = scope.log_model(MODEL_ARTIFACT_PATH, &payload)?;

        self.cancellation.begin_commit("registering model")?;
        let version = scope.register_model(&model_uri, &self.registered_model_name)?;

        let run_id = scope.run_id().to_string();
        scope.commit()?;
        info!(
            run_id = %run_id,
            model = %self.registered_model_name,
            version = version.version(),
            "model registered"
        );

        Ok(RegisteredModelRef {
            run_id,
            model_uri,
            name: self.registered_model_name.clone(),
            version: version.version(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::ConfusionMatrix;
    use crate::preprocess::LabelVector;
    use crate::tracking::{MemoryTrackingStore, RunStatus};

    fn fitted() -> (RandomForestClassifier, FeatureMatrix) {
        let rows: Vec<FeatureRow> = (0..12)
            .map(|i| {
                let x = f64::from(i);
                [x, 0.0, 1.0, x, 10.0, 3.0, 0.0]
            })
            .collect();
        let features = FeatureMatrix::new(rows);
        let labels = LabelVector::new((0..12).map(|i| u8::from(i >= 6)).collect());
        let hp = Hyperparameters {
            n_estimators: 5,
            ..Hyperparameters::baseline()
        };
        (
            RandomForestClassifier::fit(&features, &labels, &hp).unwrap(),
            features,
        )
    }

    fn report(dir: &std::path::Path) -> EvaluationReport {
        let artifact = dir.join("confusion_matrix.svg");
        std::fs::write(&artifact, "<svg/>").unwrap();
        EvaluationReport {
            auc_roc: 1.0,
            precision: 1.0,
            recall: 0.5,
            confusion_matrix: ConfusionMatrix::from_predictions(&[0, 1, 1], &[0, 1, 0]),
            confusion_matrix_artifact: artifact,
        }
    }

    #[test]
    fn test_payload_round_trip() {
        let (model, features) = fitted();
        let artifact = ModelArtifact::new(model, CategoricalVocabulary::new(), &features);
        assert_eq!(artifact.input_example.len(), INPUT_EXAMPLE_ROWS);

        let decoded = ModelArtifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, artifact);
    }

    #[test]
    fn test_payload_rejects_foreign_flavor() {
        let (model, features) = fitted();
        let mut artifact = ModelArtifact::new(model, CategoricalVocabulary::new(), &features);
        artifact.flavor = "sklearn".to_string();
        let err = ModelArtifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, Error::TrackingStore(_)));
        assert!(ModelArtifact::from_bytes(b"not json").is_err());
    }

    #[test]
    fn test_log_and_register() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryTrackingStore::new());
        let logger = RunLogger::new(store.clone(), "PatientReadmission", "ReadmissionModel");
        let (model, features) = fitted();

        let registered = logger
            .log_and_register(
                &Hyperparameters::baseline(),
                &model,
                &CategoricalVocabulary::new(),
                &report(dir.path()),
                &features,
            )
            .unwrap();

        assert_eq!(registered.version, 1);
        assert_eq!(
            registered.model_uri.to_string(),
            format!("runs:/{}/random_forest_model", registered.run_id)
        );
        let run = store.get_run(&registered.run_id).unwrap().unwrap();
        assert_eq!(run.status(), RunStatus::Success);
        assert_eq!(store.get_params(&registered.run_id).unwrap()["max_depth"], "5");
        assert_eq!(
            store.get_metrics_for_run(&registered.run_id, "recall").unwrap()[0].value(),
            0.5
        );
        let keys: Vec<String> = store
            .get_artifacts(&registered.run_id)
            .unwrap()
            .iter()
            .map(|a| a.key().to_string())
            .collect();
        assert_eq!(keys, vec!["confusion_matrix.svg", "random_forest_model"]);
    }

    #[test]
    fn test_cancelled_logger_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryTrackingStore::new());
        let cancellation = Cancellation::new();
        assert!(cancellation.cancel());
        let logger = RunLogger::new(store.clone(), "PatientReadmission", "ReadmissionModel")
            .with_cancellation(cancellation);
        let (model, features) = fitted();

        let err = logger
            .log_and_register(
                &Hyperparameters::baseline(),
                &model,
                &CategoricalVocabulary::new(),
                &report(dir.path()),
                &features,
            )
            .unwrap_err();
        assert!(matches!(err, Error::TrackingStore(_)));
        assert!(store.get_registered_model("ReadmissionModel").unwrap().is_none());
        assert_eq!(store.run_count(), 1);
    }

    #[test]
    fn test_missing_artifact_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryTrackingStore::new());
        let logger = RunLogger::new(store.clone(), "PatientReadmission", "ReadmissionModel");
        let (model, features) = fitted();
        let mut report = report(dir.path());
        report.confusion_matrix_artifact = dir.path().join("missing.svg");

        let err = logger
            .log_and_register(
                &Hyperparameters::baseline(),
                &model,
                &CategoricalVocabulary::new(),
                &report,
                &features,
            )
            .unwrap_err();
        assert!(matches!(err, Error::TrackingStore(_)));
        assert!(store.get_registered_model("ReadmissionModel").unwrap().is_none());
        assert_eq!(store.run_count(), 1);
    }
}
