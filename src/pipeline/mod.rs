//! Pipeline orchestrator
//!
//! Runs the stages strictly in order:
//!
//! ```text
//! DataSource ─load─> StorageEngine ─preprocess─> (features, labels, vocabulary)
//!     ─train─> (model, held-out split) ─evaluate─> EvaluationReport
//!     ─log_and_register─> RegisteredModelRef
//! ```
//!
//! Data loading and the tracking stage run under `config.io_timeout`.
//! Nothing is caught or retried: the first failing stage ends the run. A
//! tracking stage that misses its deadline is cancelled before it registers
//! a model, so its run closes as `Failed` with no version left behind.
//!
//! ## Example
//!
//! ```rust,no_run
//! use readmission_pipeline::config::PipelineConfig;
//! use readmission_pipeline::pipeline::Pipeline;
//! use readmission_pipeline::storage::DataSource;
//!
//! let pipeline = Pipeline::new(PipelineConfig::default())?;
//! let summary = pipeline.run(&DataSource::from(std::path::Path::new("data/patients.csv")))?;
//! let (auc, precision, recall) = summary.metrics();
//! println!("v{}: auc={auc:.3} precision={precision:.3} recall={recall:.3}", summary.version);
//! # Ok::<(), readmission_pipeline::Error>(())
//! ```

mod deadline;

pub use deadline::{run_with_deadline, Cancellation};

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::evaluate::Evaluator;
use crate::preprocess::{CategoricalVocabulary, Preprocessor};
use crate::storage::DataSource;
use crate::tracking::{
    open_tracking_store, ModelArtifact, RunLogger, TrackingStore, INPUT_EXAMPLE_ROWS,
};
use crate::train::train;
use crate::{Error, Result};

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    /// AUC-ROC on the held-out split.
    pub auc_roc: f64,
    /// Precision on the held-out split.
    pub precision: f64,
    /// Recall on the held-out split.
    pub recall: f64,
    /// Tracking run that recorded this execution.
    pub run_id: String,
    /// Registered model name.
    pub registered_model_name: String,
    /// Version the registry assigned.
    pub version: u32,
    /// Records used for training and evaluation.
    pub retained_rows: usize,
    /// Records dropped for a missing label.
    pub dropped_rows: usize,
    /// Local copy of the confusion-matrix artifact.
    pub confusion_matrix_artifact: PathBuf,
}

impl PipelineSummary {
    /// `(auc_roc, precision, recall)`.
    #[must_use]
    pub const fn metrics(&self) -> (f64, f64, f64) {
        (self.auc_roc, self.precision, self.recall)
    }
}

/// Configured pipeline bound to a tracking store.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn TrackingStore>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validate `config` and open the tracking store it names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for invalid settings and
    /// [`Error::TrackingStore`] if the store cannot be opened.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let store = open_tracking_store(&config)?;
        Ok(Self { config, store })
    }

    /// Pipeline writing to an existing store; `config.tracking_uri` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for invalid settings.
    pub fn with_store(config: PipelineConfig, store: Arc<dyn TrackingStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, store })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Tracking store in use.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    /// Train, evaluate, log and register one model.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for an unreachable or malformed source,
    /// [`Error::Schema`] for missing columns, [`Error::Training`] for fit
    /// failures and [`Error::TrackingStore`] for store failures.
    #[instrument(skip_all, fields(source = %source.describe()))]
    pub fn run(&self, source: &DataSource) -> Result<PipelineSummary> {
        let timeout = self.config.io_timeout;

        let table = {
            let source = source.clone();
            run_with_deadline("data-load", timeout, Error::Configuration, move |_| {
                source.load()
            })?
        };
        info!(rows = table.num_rows(), "data loaded");

        let vocabulary = if self.config.reuse_registered_vocabulary {
            let store = Arc::clone(&self.store);
            let name = self.config.registered_model_name.clone();
            run_with_deadline("vocabulary", timeout, Error::TrackingStore, move |_| {
                registered_vocabulary(store.as_ref(), &name)
            })?
        } else {
            CategoricalVocabulary::new()
        };

        let prepared = Preprocessor::with_vocabulary(vocabulary).preprocess(&table)?;
        let hyperparameters = self.config.hyperparameters;
        let trained = train(&prepared.features, &prepared.labels, &hyperparameters)?;

        let scratch = self.config.artifact_dir.join(Uuid::new_v4().simple().to_string());
        let report = Evaluator::new(&scratch).evaluate(
            &trained.model,
            &trained.test_features,
            &trained.test_labels,
        )?;

        let registered = {
            let logger = RunLogger::new(
                Arc::clone(&self.store),
                self.config.experiment_name.clone(),
                self.config.registered_model_name.clone(),
            );
            let model = trained.model;
            let vocabulary = prepared.vocabulary.clone();
            let report = report.clone();
            let sample = trained.test_features.head(INPUT_EXAMPLE_ROWS);
            run_with_deadline("tracking", timeout, Error::TrackingStore, move |cancellation| {
                logger
                    .with_cancellation(cancellation)
                    .log_and_register(&hyperparameters, &model, &vocabulary, &report, &sample)
            })?
        };

        let summary = PipelineSummary {
            auc_roc: report.auc_roc,
            precision: report.precision,
            recall: report.recall,
            run_id: registered.run_id,
            registered_model_name: registered.name,
            version: registered.version,
            retained_rows: prepared.labels.len(),
            dropped_rows: prepared.dropped_rows,
            confusion_matrix_artifact: report.confusion_matrix_artifact,
        };
        info!(
            run_id = %summary.run_id,
            version = summary.version,
            auc_roc = summary.auc_roc,
            precision = summary.precision,
            recall = summary.recall,
            "pipeline run complete"
        );
        Ok(summary)
    }
}

/// Vocabulary of the latest registered version, or an empty one.
fn registered_vocabulary(store: &dyn TrackingStore, name: &str) -> Result<CategoricalVocabulary> {
    let Some(latest) = store.latest_version(name)? else {
        debug!(model = name, "no registered version; starting a fresh vocabulary");
        return Ok(CategoricalVocabulary::new());
    };
    let payload = store.load_model(&latest.source())?;
    let artifact = ModelArtifact::from_bytes(&payload)?;
    debug!(model = name, version = latest.version(), "reusing registered vocabulary");
    Ok(artifact.vocabulary)
}

/// Run the pipeline once with `config`.
///
/// # Errors
///
/// See [`Pipeline::run`].
pub fn run(config: PipelineConfig, source: &DataSource) -> Result<PipelineSummary> {
    Pipeline::new(config)?.run(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Hyperparameters;
    use crate::storage::StorageEngine;
    use crate::tracking::MemoryTrackingStore;
    use arrow::array::{Float64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;

    fn table(n: usize) -> StorageEngine {
        let schema = Arc::new(Schema::new(vec![
            Field::new("age", DataType::Utf8, true),
            Field::new("gender", DataType::Utf8, true),
            Field::new("race", DataType::Utf8, true),
            Field::new("time_in_hospital", DataType::Float64, true),
            Field::new("num_lab_procedures", DataType::Float64, true),
            Field::new("num_medications", DataType::Float64, true),
            Field::new("diabetesMed", DataType::Utf8, true),
            Field::new("readmitted", DataType::Utf8, true),
        ]));
        let ages: Vec<String> = (0..n).map(|i| format!("[{}-{})", (i % 9) * 10, (i % 9) * 10 + 10)).collect();
        let genders: Vec<&str> = (0..n).map(|i| if i % 2 == 0 { "Female" } else { "Male" }).collect();
        let races: Vec<&str> = (0..n).map(|i| ["Caucasian", "AfricanAmerican", "Other"][i % 3]).collect();
        #[allow(clippy::cast_precision_loss)]
        let days: Vec<f64> = (0..n).map(|i| (i % 14 + 1) as f64).collect();
        #[allow(clippy::cast_precision_loss)]
        let labs: Vec<f64> = (0..n).map(|i| (i * 7 % 80) as f64).collect();
        #[allow(clippy::cast_precision_loss)]
        let meds: Vec<f64> = (0..n).map(|i| (i * 3 % 40) as f64).collect();
        let diabetes: Vec<&str> = (0..n).map(|i| if i % 4 == 0 { "No" } else { "Yes" }).collect();
        let readmitted: Vec<&str> = (0..n).map(|i| ["<30", ">30", "NO"][i % 3]).collect();

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ages)),
                Arc::new(StringArray::from(genders)),
                Arc::new(StringArray::from(races)),
                Arc::new(Float64Array::from(days)),
                Arc::new(Float64Array::from(labs)),
                Arc::new(Float64Array::from(meds)),
                Arc::new(StringArray::from(diabetes)),
                Arc::new(StringArray::from(readmitted)),
            ],
        )
        .unwrap();
        StorageEngine::new(vec![batch])
    }

    fn pipeline(dir: &std::path::Path) -> Pipeline {
        let config = PipelineConfig {
            hyperparameters: Hyperparameters {
                n_estimators: 10,
                ..Hyperparameters::baseline()
            },
            ..PipelineConfig::in_memory(dir)
        };
        Pipeline::with_store(config, Arc::new(MemoryTrackingStore::new())).unwrap()
    }

    #[test]
    fn test_run_registers_successive_versions() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let source = DataSource::from(table(60));

        let first = pipeline.run(&source).unwrap();
        let second = pipeline.run(&source).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(first.metrics(), second.metrics());
        assert_ne!(first.confusion_matrix_artifact, second.confusion_matrix_artifact);
        assert_eq!(first.retained_rows, 60);
    }

    #[test]
    fn test_reused_vocabulary_matches_registered() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        pipeline.run(&DataSource::from(table(30))).unwrap();

        let vocabulary =
            registered_vocabulary(pipeline.store().as_ref(), "ReadmissionModel").unwrap();
        assert_eq!(
            vocabulary.categories("race").unwrap(),
            ["Caucasian", "AfricanAmerican", "Other"]
        );
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let err = pipeline
            .run(&DataSource::from(dir.path().join("absent.csv")))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
