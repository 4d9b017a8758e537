//! In-memory tracking store
//!
//! Backs `memory://` tracking URIs and the test suite. State lives in
//! [`DashMap`]s so the store can be shared across threads behind an `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use dashmap::DashMap;
use uuid::Uuid;

use super::{
    ArtifactRecord, ExperimentRecord, MetricRecord, ModelUri, ModelVersion, RegisteredModel,
    RunRecord, RunStatus, TrackingStore,
};
use crate::{Error, Result};

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    params: BTreeMap<String, String>,
    metrics: Vec<MetricRecord>,
    artifacts: Vec<ArtifactRecord>,
    models: HashMap<String, Vec<u8>>,
}

/// Tracking store that keeps everything in process memory.
///
/// ## Time-Series Queries
///
/// `get_metrics_for_run` returns metrics ordered by step, matching the
/// directory-backed store.
#[derive(Debug, Default)]
pub struct MemoryTrackingStore {
    experiments: DashMap<String, ExperimentRecord>,
    runs: DashMap<String, RunState>,
    registry: DashMap<String, RegisteredModel>,
}

impl MemoryTrackingStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs ever started.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    fn with_running<T>(&self, run_id: &str, f: impl FnOnce(&mut RunState) -> Result<T>) -> Result<T> {
        let mut state = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::TrackingStore(format!("unknown run {run_id}")))?;
        if state.record.status() != RunStatus::Running {
            return Err(Error::TrackingStore(format!(
                "run {run_id} is {:?}, not running",
                state.record.status()
            )));
        }
        f(&mut state)
    }

    fn read_run<T>(&self, run_id: &str, f: impl FnOnce(&RunState) -> T) -> Result<T> {
        self.runs
            .get(run_id)
            .map(|state| f(&state))
            .ok_or_else(|| Error::TrackingStore(format!("unknown run {run_id}")))
    }
}

impl TrackingStore for MemoryTrackingStore {
    fn get_or_create_experiment(&self, name: &str) -> Result<ExperimentRecord> {
        let experiment = self
            .experiments
            .entry(name.to_string())
            .or_insert_with(|| ExperimentRecord::new(Uuid::new_v4().to_string(), name));
        Ok(experiment.clone())
    }

    fn start_run(&self, experiment_id: &str) -> Result<RunRecord> {
        if !self
            .experiments
            .iter()
            .any(|entry| entry.value().experiment_id() == experiment_id)
        {
            return Err(Error::TrackingStore(format!(
                "unknown experiment {experiment_id}"
            )));
        }

        let mut record = RunRecord::new(Uuid::new_v4().simple().to_string(), experiment_id);
        record.start();
        self.runs.insert(
            record.run_id().to_string(),
            RunState {
                record: record.clone(),
                params: BTreeMap::new(),
                metrics: Vec::new(),
                artifacts: Vec::new(),
                models: HashMap::new(),
            },
        );
        Ok(record)
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<RunRecord> {
        if !status.is_terminal() {
            return Err(Error::TrackingStore(format!(
                "cannot close run {run_id} with non-terminal status {status:?}"
            )));
        }
        self.with_running(run_id, |state| {
            state.record.complete(status);
            Ok(state.record.clone())
        })
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.with_running(run_id, |state| match state.params.get(key) {
            Some(existing) if existing != value => Err(Error::TrackingStore(format!(
                "param '{key}' already logged as '{existing}', refusing '{value}'"
            ))),
            Some(_) => Ok(()),
            None => {
                state.params.insert(key.to_string(), value.to_string());
                Ok(())
            }
        })
    }

    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: u64) -> Result<()> {
        self.with_running(run_id, |state| {
            state.metrics.push(MetricRecord::new(run_id, key, step, value));
            Ok(())
        })
    }

    fn log_artifact(&self, run_id: &str, local_path: &Path) -> Result<ArtifactRecord> {
        let key = artifact_key(local_path)?;
        let content = fs::read(local_path)
            .map_err(|e| Error::tracking(&format!("reading artifact {}", local_path.display()), e))?;
        self.with_running(run_id, |state| {
            let artifact = ArtifactRecord::for_content(run_id, key, &content);
            state.artifacts.push(artifact.clone());
            Ok(artifact)
        })
    }

    fn log_model(&self, run_id: &str, artifact_path: &str, payload: &[u8]) -> Result<ModelUri> {
        let uri = ModelUri::run(run_id, artifact_path);
        self.with_running(run_id, |state| {
            state.models.insert(artifact_path.to_string(), payload.to_vec());
            state
                .artifacts
                .push(ArtifactRecord::for_content(run_id, artifact_path, payload));
            state.record.set_model_uri(uri.to_string());
            Ok(())
        })?;
        Ok(uri)
    }

    fn register_model(&self, model_uri: &ModelUri, name: &str) -> Result<ModelVersion> {
        let ModelUri::Run {
            run_id,
            artifact_path,
        } = model_uri
        else {
            return Err(Error::TrackingStore(format!(
                "only runs:/ URIs can be registered, got {model_uri}"
            )));
        };
        let logged = self.read_run(run_id, |state| state.models.contains_key(artifact_path))?;
        if !logged {
            return Err(Error::TrackingStore(format!("no model logged at {model_uri}")));
        }

        let mut model = self.registry.entry(name.to_string()).or_default();
        Ok(model.add_version(run_id, artifact_path, name))
    }

    fn set_model_alias(&self, name: &str, alias: &str, version: u32) -> Result<()> {
        let mut model = self
            .registry
            .get_mut(name)
            .ok_or_else(|| Error::TrackingStore(format!("unknown registered model '{name}'")))?;
        model.set_alias(alias, version)
    }

    fn get_registered_model(&self, name: &str) -> Result<Option<RegisteredModel>> {
        Ok(self.registry.get(name).map(|model| model.clone()))
    }

    fn load_run_model(&self, run_id: &str, artifact_path: &str) -> Result<Vec<u8>> {
        self.read_run(run_id, |state| state.models.get(artifact_path).cloned())?
            .ok_or_else(|| {
                Error::TrackingStore(format!("no model at {}", ModelUri::run(run_id, artifact_path)))
            })
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.runs.get(run_id).map(|state| state.record.clone()))
    }

    fn get_params(&self, run_id: &str) -> Result<BTreeMap<String, String>> {
        self.read_run(run_id, |state| state.params.clone())
    }

    fn get_metrics_for_run(&self, run_id: &str, key: &str) -> Result<Vec<MetricRecord>> {
        let mut metrics = self.read_run(run_id, |state| {
            state
                .metrics
                .iter()
                .filter(|m| m.key() == key)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        metrics.sort_by_key(MetricRecord::step);
        Ok(metrics)
    }

    fn get_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        self.read_run(run_id, |state| state.artifacts.clone())
    }
}

/// Artifact key for a local file: its file name.
pub(super) fn artifact_key(local_path: &Path) -> Result<String> {
    local_path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::TrackingStore(format!(
                "artifact path {} has no file name",
                local_path.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(store: &MemoryTrackingStore) -> RunRecord {
        let experiment = store.get_or_create_experiment("PatientReadmission").unwrap();
        store.start_run(experiment.experiment_id()).unwrap()
    }

    #[test]
    fn test_experiment_is_reused_by_name() {
        let store = MemoryTrackingStore::new();
        let a = store.get_or_create_experiment("PatientReadmission").unwrap();
        let b = store.get_or_create_experiment("PatientReadmission").unwrap();
        assert_eq!(a.experiment_id(), b.experiment_id());
    }

    #[test]
    fn test_start_run_requires_experiment() {
        let store = MemoryTrackingStore::new();
        assert!(matches!(
            store.start_run("missing"),
            Err(Error::TrackingStore(_))
        ));
    }

    #[test]
    fn test_params_are_immutable() {
        let store = MemoryTrackingStore::new();
        let run = running(&store);
        store.log_param(run.run_id(), "n_estimators", "100").unwrap();
        store.log_param(run.run_id(), "n_estimators", "100").unwrap();
        assert!(store.log_param(run.run_id(), "n_estimators", "50").is_err());
        assert_eq!(store.get_params(run.run_id()).unwrap()["n_estimators"], "100");
    }

    #[test]
    fn test_metrics_ordered_by_step() {
        let store = MemoryTrackingStore::new();
        let run = running(&store);
        store.log_metric(run.run_id(), "auc_roc", 0.7, 2).unwrap();
        store.log_metric(run.run_id(), "auc_roc", 0.6, 0).unwrap();
        store.log_metric(run.run_id(), "recall", 0.1, 1).unwrap();

        let metrics = store.get_metrics_for_run(run.run_id(), "auc_roc").unwrap();
        let steps: Vec<u64> = metrics.iter().map(MetricRecord::step).collect();
        assert_eq!(steps, vec![0, 2]);
    }

    #[test]
    fn test_closed_run_rejects_logging() {
        let store = MemoryTrackingStore::new();
        let run = running(&store);
        let closed = store.end_run(run.run_id(), RunStatus::Success).unwrap();
        assert_eq!(closed.status(), RunStatus::Success);

        assert!(store.log_metric(run.run_id(), "auc_roc", 0.5, 0).is_err());
        assert!(store.end_run(run.run_id(), RunStatus::Failed).is_err());
    }

    #[test]
    fn test_register_and_resolve() {
        let store = MemoryTrackingStore::new();
        let run = running(&store);
        let uri = store.log_model(run.run_id(), "model", b"{}").unwrap();
        assert_eq!(
            store.get_run(run.run_id()).unwrap().unwrap().model_uri(),
            Some(uri.to_string().as_str())
        );

        let version = store.register_model(&uri, "ReadmissionModel").unwrap();
        assert_eq!(version.version(), 1);
        store
            .set_model_alias("ReadmissionModel", "production", 1)
            .unwrap();

        let by_alias = ModelUri::alias("ReadmissionModel", "production");
        assert_eq!(store.resolve_model(&by_alias).unwrap(), uri);
        assert_eq!(store.load_model(&by_alias).unwrap(), b"{}".to_vec());
    }

    #[test]
    fn test_register_requires_logged_model() {
        let store = MemoryTrackingStore::new();
        let run = running(&store);
        let uri = ModelUri::run(run.run_id(), "never_logged");
        assert!(store.register_model(&uri, "ReadmissionModel").is_err());
        assert!(store
            .register_model(&ModelUri::version("ReadmissionModel", 1), "Other")
            .is_err());
    }
}
