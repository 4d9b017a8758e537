//! Run scope: a run that is always closed
//!
//! [`RunScope::commit`] closes the run as `Success`. Dropping the scope
//! without committing (an early `?` return, a panic) closes it as `Failed`.

use std::path::Path;

use tracing::{debug, warn};

use super::{ArtifactRecord, ModelUri, ModelVersion, RunRecord, RunStatus, TrackingStore};
use crate::Result;

/// A started run bound to its store.
#[derive(Debug)]
pub struct RunScope<'a, S: TrackingStore + ?Sized> {
    store: &'a S,
    run: RunRecord,
    closed: bool,
}

impl<'a, S: TrackingStore + ?Sized> RunScope<'a, S> {
    /// Start a run under `experiment_id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TrackingStore`] if the store cannot start the run.
    pub fn begin(store: &'a S, experiment_id: &str) -> Result<Self> {
        let run = store.start_run(experiment_id)?;
        debug!(run_id = run.run_id(), experiment_id, "run started");
        Ok(Self {
            store,
            run,
            closed: false,
        })
    }

    /// ID of the underlying run.
    #[must_use]
    pub fn run_id(&self) -> &str {
        self.run.run_id()
    }

    /// Log one parameter.
    pub fn log_param(&self, key: &str, value: &str) -> Result<()> {
        self.store.log_param(self.run_id(), key, value)
    }

    /// Log every entry of `params`.
    pub fn log_params<'p>(&self, params: impl IntoIterator<Item = (&'p String, &'p String)>) -> Result<()> {
        params
            .into_iter()
            .try_for_each(|(key, value)| self.log_param(key, value))
    }

    /// Log a metric at step 0.
    pub fn log_metric(&self, key: &str, value: f64) -> Result<()> {
        self.store.log_metric(self.run_id(), key, value, 0)
    }

    /// Copy a local file into the run's artifacts.
    pub fn log_artifact(&self, local_path: &Path) -> Result<ArtifactRecord> {
        self.store.log_artifact(self.run_id(), local_path)
    }

    /// Store a serialized model under `artifact_path`.
    pub fn log_model(&self, artifact_path: &str, payload: &[u8]) -> Result<ModelUri> {
        self.store.log_model(self.run_id(), artifact_path, payload)
    }

    /// Register a model logged by this run.
    pub fn register_model(&self, model_uri: &ModelUri, name: &str) -> Result<ModelVersion> {
        self.store.register_model(model_uri, name)
    }

    /// Close the run as `Success`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TrackingStore`] if the close fails; the run is
    /// then left to the store as-is and not retried on drop.
    pub fn commit(mut self) -> Result<RunRecord> {
        self.close(RunStatus::Success)
    }

    fn close(&mut self, status: RunStatus) -> Result<RunRecord> {
        self.closed = true;
        let record = self.store.end_run(self.run.run_id(), status)?;
        debug!(run_id = record.run_id(), ?status, "run closed");
        Ok(record)
    }
}

impl<S: TrackingStore + ?Sized> Drop for RunScope<'_, S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.close(RunStatus::Failed) {
            warn!(run_id = self.run.run_id(), error = %e, "failed to close abandoned run");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::MemoryTrackingStore;
    use crate::Error;

    fn experiment(store: &MemoryTrackingStore) -> String {
        store
            .get_or_create_experiment("PatientReadmission")
            .unwrap()
            .experiment_id()
            .to_string()
    }

    #[test]
    fn test_commit_marks_success() {
        let store = MemoryTrackingStore::new();
        let scope = RunScope::begin(&store, &experiment(&store)).unwrap();
        scope.log_param("n_estimators", "100").unwrap();
        let record = scope.commit().unwrap();
        assert_eq!(record.status(), RunStatus::Success);
    }

    #[test]
    fn test_drop_marks_failed() {
        let store = MemoryTrackingStore::new();
        let run_id = {
            let scope = RunScope::begin(&store, &experiment(&store)).unwrap();
            scope.run_id().to_string()
        };
        let record = store.get_run(&run_id).unwrap().unwrap();
        assert_eq!(record.status(), RunStatus::Failed);
        assert!(record.ended_at().is_some());
    }

    #[test]
    fn test_error_path_closes_run() {
        fn failing_step(scope: &RunScope<'_, MemoryTrackingStore>) -> Result<()> {
            scope.log_metric("auc_roc", 0.5)?;
            Err(Error::Training("boom".to_string()))
        }

        let store = MemoryTrackingStore::new();
        let scope = RunScope::begin(&store, &experiment(&store)).unwrap();
        let run_id = scope.run_id().to_string();
        let result = failing_step(&scope);
        drop(scope);

        assert!(result.is_err());
        assert_eq!(
            store.get_run(&run_id).unwrap().unwrap().status(),
            RunStatus::Failed
        );
    }
}
