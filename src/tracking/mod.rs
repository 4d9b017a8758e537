//! Experiment tracking and model registry
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!                              │
//!                              ├── params (key → value)
//!                              ├──< MetricRecord (N)
//!                              ├──< ArtifactRecord (N) [CAS]
//!                              └── model payload ──> ModelVersion (registry)
//! ```
//!
//! Stores implement [`TrackingStore`]. Pipeline code never talks to a store
//! directly; it opens a [`RunScope`], which closes the run on every exit
//! path.
//!
//! ## Usage
//!
//! ```rust
//! use readmission_pipeline::tracking::{MemoryTrackingStore, RunScope, TrackingStore};
//!
//! let store = MemoryTrackingStore::new();
//! let experiment = store.get_or_create_experiment("PatientReadmission")?;
//!
//! let scope = RunScope::begin(&store, experiment.experiment_id())?;
//! scope.log_metric("auc_roc", 0.81)?;
//! let run = scope.commit()?;
//!
//! assert_eq!(store.get_metrics_for_run(run.run_id(), "auc_roc")?.len(), 1);
//! # Ok::<(), readmission_pipeline::Error>(())
//! ```

mod artifact_record;
mod experiment_record;
mod file;
mod logger;
mod memory;
mod metric_record;
mod registry;
mod run_record;
mod scope;

pub use artifact_record::{cas_hash, ArtifactRecord};
pub use experiment_record::ExperimentRecord;
pub use file::FileTrackingStore;
pub use logger::{ModelArtifact, RegisteredModelRef, RunLogger, INPUT_EXAMPLE_ROWS, MODEL_FLAVOR};
pub use memory::MemoryTrackingStore;
pub use metric_record::MetricRecord;
pub use registry::{ModelUri, ModelVersion, RegisteredModel, PRODUCTION_ALIAS};
pub use run_record::{RunRecord, RunStatus};
pub use scope::RunScope;

use crate::config::PipelineConfig;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tracking + registry store.
///
/// Every failure is reported as [`Error::TrackingStore`]. Logging calls are
/// only accepted for runs in [`RunStatus::Running`].
pub trait TrackingStore: Send + Sync {
    /// Look up an experiment by name, creating it when absent.
    fn get_or_create_experiment(&self, name: &str) -> Result<ExperimentRecord>;

    /// Create and start a run.
    fn start_run(&self, experiment_id: &str) -> Result<RunRecord>;

    /// Close a running run with a terminal status.
    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<RunRecord>;

    /// Record a parameter. Re-logging the same value is a no-op; a different
    /// value for an existing key is an error.
    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()>;

    /// Record a metric value.
    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: u64) -> Result<()>;

    /// Copy a local file into the run's artifacts, keyed by its file name.
    fn log_artifact(&self, run_id: &str, local_path: &Path) -> Result<ArtifactRecord>;

    /// Store a serialized model under `artifact_path` and return its `runs:/` URI.
    fn log_model(&self, run_id: &str, artifact_path: &str, payload: &[u8]) -> Result<ModelUri>;

    /// Register a `runs:/` model under `name`; the store assigns the next version.
    fn register_model(&self, model_uri: &ModelUri, name: &str) -> Result<ModelVersion>;

    /// Point an alias (e.g. `production`) at an existing version.
    fn set_model_alias(&self, name: &str, alias: &str, version: u32) -> Result<()>;

    /// Registered model with its versions and aliases.
    fn get_registered_model(&self, name: &str) -> Result<Option<RegisteredModel>>;

    /// Serialized model logged by a run.
    fn load_run_model(&self, run_id: &str, artifact_path: &str) -> Result<Vec<u8>>;

    /// Run by ID.
    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Parameters of a run.
    fn get_params(&self, run_id: &str) -> Result<BTreeMap<String, String>>;

    /// Metrics of a run for one key, ordered by step.
    fn get_metrics_for_run(&self, run_id: &str, key: &str) -> Result<Vec<MetricRecord>>;

    /// Artifacts of a run, in logging order.
    fn get_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>>;

    /// Highest registered version of `name`.
    fn latest_version(&self, name: &str) -> Result<Option<ModelVersion>> {
        Ok(self
            .get_registered_model(name)?
            .and_then(|model| model.latest().cloned()))
    }

    /// Resolve any model URI to the `runs:/` URI it points at.
    fn resolve_model(&self, uri: &ModelUri) -> Result<ModelUri> {
        let missing = || Error::TrackingStore(format!("no model registered at {uri}"));
        match uri {
            ModelUri::Run { .. } => Ok(uri.clone()),
            ModelUri::Version { name, version } => self
                .get_registered_model(name)?
                .and_then(|model| model.get(*version).map(ModelVersion::source))
                .ok_or_else(missing),
            ModelUri::Alias { name, alias } => self
                .get_registered_model(name)?
                .and_then(|model| model.by_alias(alias).map(ModelVersion::source))
                .ok_or_else(missing),
        }
    }

    /// Serialized model behind any model URI.
    fn load_model(&self, uri: &ModelUri) -> Result<Vec<u8>> {
        match self.resolve_model(uri)? {
            ModelUri::Run {
                run_id,
                artifact_path,
            } => self.load_run_model(&run_id, &artifact_path),
            other => Err(Error::TrackingStore(format!("unresolvable model URI {other}"))),
        }
    }
}

/// Open the store named by `config.tracking_uri`.
///
/// `memory://` gives a fresh in-memory store; `file://<dir>` or a bare path a
/// directory-backed one.
///
/// # Errors
///
/// Returns [`Error::Configuration`] for unsupported schemes and
/// [`Error::TrackingStore`] if the directory cannot be prepared.
pub fn open_tracking_store(config: &PipelineConfig) -> Result<Arc<dyn TrackingStore>> {
    let uri = config.tracking_uri.trim();
    if uri == "memory://" {
        return Ok(Arc::new(MemoryTrackingStore::new()));
    }
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(Arc::new(FileTrackingStore::open(PathBuf::from(path))?));
    }
    if uri.contains("://") {
        return Err(Error::Configuration(format!(
            "unsupported tracking URI '{uri}' (expected memory:// or file://<dir>)"
        )));
    }
    Ok(Arc::new(FileTrackingStore::open(PathBuf::from(uri))?))
}
