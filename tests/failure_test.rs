//! Tracking-store failures seen from the pipeline
//!
//! A wrapper store injects latency or errors into one operation and forwards
//! everything else to an in-memory store.

mod common;

use readmission_pipeline::config::PipelineConfig;
use readmission_pipeline::pipeline::Pipeline;
use readmission_pipeline::storage::DataSource;
use readmission_pipeline::tracking::{
    ArtifactRecord, ExperimentRecord, MemoryTrackingStore, MetricRecord, ModelUri, ModelVersion,
    RegisteredModel, RunRecord, RunScope, RunStatus, TrackingStore,
};
use readmission_pipeline::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Fault-injecting store
// ============================================================================

#[derive(Debug, Default)]
struct FaultyStore {
    inner: MemoryTrackingStore,
    artifact_delay: Option<Duration>,
    register_delay: Option<Duration>,
    fail_success_close: bool,
    started: Mutex<Vec<String>>,
}

impl FaultyStore {
    /// Runs started so far, waiting briefly for the first one.
    fn started_runs(&self) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let started = self.started.lock().unwrap().clone();
            if !started.is_empty() || Instant::now() > deadline {
                return started;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    /// Wait until `run_id` reaches a terminal status.
    fn wait_closed(&self, run_id: &str) -> RunRecord {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let run = self.inner.get_run(run_id).unwrap().unwrap();
            if run.status().is_terminal() || Instant::now() > deadline {
                return run;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

impl TrackingStore for FaultyStore {
    fn get_or_create_experiment(&self, name: &str) -> Result<ExperimentRecord> {
        self.inner.get_or_create_experiment(name)
    }

    fn start_run(&self, experiment_id: &str) -> Result<RunRecord> {
        let run = self.inner.start_run(experiment_id)?;
        self.started.lock().unwrap().push(run.run_id().to_string());
        Ok(run)
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<RunRecord> {
        if self.fail_success_close && status == RunStatus::Success {
            return Err(Error::TrackingStore("connection reset while closing run".to_string()));
        }
        self.inner.end_run(run_id, status)
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.inner.log_param(run_id, key, value)
    }

    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: u64) -> Result<()> {
        self.inner.log_metric(run_id, key, value, step)
    }

    fn log_artifact(&self, run_id: &str, local_path: &Path) -> Result<ArtifactRecord> {
        if let Some(delay) = self.artifact_delay {
            thread::sleep(delay);
        }
        self.inner.log_artifact(run_id, local_path)
    }

    fn log_model(&self, run_id: &str, artifact_path: &str, payload: &[u8]) -> Result<ModelUri> {
        self.inner.log_model(run_id, artifact_path, payload)
    }

    fn register_model(&self, model_uri: &ModelUri, name: &str) -> Result<ModelVersion> {
        if let Some(delay) = self.register_delay {
            thread::sleep(delay);
        }
        self.inner.register_model(model_uri, name)
    }

    fn set_model_alias(&self, name: &str, alias: &str, version: u32) -> Result<()> {
        self.inner.set_model_alias(name, alias, version)
    }

    fn get_registered_model(&self, name: &str) -> Result<Option<RegisteredModel>> {
        self.inner.get_registered_model(name)
    }

    fn load_run_model(&self, run_id: &str, artifact_path: &str) -> Result<Vec<u8>> {
        self.inner.load_run_model(run_id, artifact_path)
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.inner.get_run(run_id)
    }

    fn get_params(&self, run_id: &str) -> Result<BTreeMap<String, String>> {
        self.inner.get_params(run_id)
    }

    fn get_metrics_for_run(&self, run_id: &str, key: &str) -> Result<Vec<MetricRecord>> {
        self.inner.get_metrics_for_run(run_id, key)
    }

    fn get_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        self.inner.get_artifacts(run_id)
    }
}

fn pipeline(dir: &Path, store: &Arc<FaultyStore>, io_timeout: Duration) -> Pipeline {
    let config = PipelineConfig {
        io_timeout,
        ..common::config(dir)
    };
    Pipeline::with_store(config, Arc::clone(store) as Arc<dyn TrackingStore>).unwrap()
}

// ============================================================================
// Tracking deadline
// ============================================================================

#[test]
fn test_tracking_timeout_registers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FaultyStore {
        artifact_delay: Some(Duration::from_millis(600)),
        ..FaultyStore::default()
    });

    let err = pipeline(dir.path(), &store, Duration::from_millis(150))
        .run(&DataSource::from(common::table(common::patients(60))))
        .unwrap_err();
    assert!(matches!(err, Error::TrackingStore(ref msg) if msg.contains("tracking")), "{err}");

    let runs = store.started_runs();
    assert_eq!(runs.len(), 1);
    let run = store.wait_closed(&runs[0]);
    assert_eq!(run.status(), RunStatus::Failed);
    assert!(run.model_uri().is_none());
    assert!(store.get_registered_model("ReadmissionModel").unwrap().is_none());
}

#[test]
fn test_slow_registration_is_awaited() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FaultyStore {
        register_delay: Some(Duration::from_millis(600)),
        ..FaultyStore::default()
    });

    let summary = pipeline(dir.path(), &store, Duration::from_millis(300))
        .run(&DataSource::from(common::table(common::patients(60))))
        .unwrap();

    assert_eq!(summary.version, 1);
    let run = store.get_run(&summary.run_id).unwrap().unwrap();
    assert_eq!(run.status(), RunStatus::Success);
}

// ============================================================================
// Closing the run
// ============================================================================

#[test]
fn test_commit_failure_is_tracking_error() {
    let store = FaultyStore {
        fail_success_close: true,
        ..FaultyStore::default()
    };
    let experiment = store.get_or_create_experiment("PatientReadmission").unwrap();
    let scope = RunScope::begin(&store, experiment.experiment_id()).unwrap();
    let run_id = scope.run_id().to_string();
    scope.log_metric("auc_roc", 0.7).unwrap();

    let err = scope.commit().unwrap_err();
    assert!(matches!(err, Error::TrackingStore(ref msg) if msg.contains("closing run")));
    // A failed commit is not retried as Failed on drop.
    assert_eq!(
        store.get_run(&run_id).unwrap().unwrap().status(),
        RunStatus::Running
    );
}

#[test]
fn test_commit_failure_fails_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FaultyStore {
        fail_success_close: true,
        ..FaultyStore::default()
    });

    let err = pipeline(dir.path(), &store, Duration::from_secs(30))
        .run(&DataSource::from(common::table(common::patients(60))))
        .unwrap_err();
    assert!(matches!(err, Error::TrackingStore(_)), "{err}");
}
