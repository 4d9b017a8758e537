//! Directory-backed tracking store
//!
//! ## Layout
//!
//! ```text
//! <root>/
//! ├── experiments/<name>.json
//! ├── runs/<run_id>/
//! │   ├── run.json
//! │   ├── params.json
//! │   ├── metrics.jsonl
//! │   ├── artifacts.json
//! │   ├── artifacts/<file>
//! │   └── models/<artifact_path>/model.json
//! └── registry/<name>/
//!     ├── versions/<n>.json
//!     └── aliases.json
//! ```
//!
//! JSON documents are replaced atomically (write to a temp file, then
//! rename). Experiments and version numbers are claimed by hard-linking a
//! fully written temp file into place: the link fails if the name is taken,
//! so two processes registering the same model never receive the same
//! version, and readers never see a half-written document.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::memory::artifact_key;
use super::{
    ArtifactRecord, ExperimentRecord, MetricRecord, ModelUri, ModelVersion, RegisteredModel,
    RunRecord, RunStatus, TrackingStore,
};
use crate::{Error, Result};

const MODEL_FILE: &str = "model.json";

/// Tracking store persisted under a local directory.
#[derive(Debug)]
pub struct FileTrackingStore {
    root: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileTrackingStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrackingStore`] if the directory tree cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in ["experiments", "runs", "registry"] {
            fs::create_dir_all(root.join(dir))
                .map_err(|e| Error::tracking(&format!("creating {}", root.display()), e))?;
        }
        debug!(root = %root.display(), "opened file tracking store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        if run_id.is_empty() || !run_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::TrackingStore(format!("invalid run id '{run_id}'")));
        }
        Ok(self.root.join("runs").join(run_id))
    }

    fn model_dir(&self, name: &str) -> PathBuf {
        self.root.join("registry").join(slug(name))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::TrackingStore("store lock poisoned".to_string()))
    }

    /// Load a run that must exist and be running.
    fn running_run(&self, run_id: &str) -> Result<(PathBuf, RunRecord)> {
        let dir = self.run_dir(run_id)?;
        let record: RunRecord = read_json(&dir.join("run.json"))?
            .ok_or_else(|| Error::TrackingStore(format!("unknown run {run_id}")))?;
        if record.status() != RunStatus::Running {
            return Err(Error::TrackingStore(format!(
                "run {run_id} is {:?}, not running",
                record.status()
            )));
        }
        Ok((dir, record))
    }

    fn existing_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let dir = self.run_dir(run_id)?;
        if dir.join("run.json").is_file() {
            Ok(dir)
        } else {
            Err(Error::TrackingStore(format!("unknown run {run_id}")))
        }
    }

    fn push_artifact(&self, dir: &Path, artifact: ArtifactRecord) -> Result<()> {
        let index = dir.join("artifacts.json");
        let mut artifacts: Vec<ArtifactRecord> = read_json(&index)?.unwrap_or_default();
        artifacts.push(artifact);
        write_json(&index, &artifacts)
    }
}

impl TrackingStore for FileTrackingStore {
    fn get_or_create_experiment(&self, name: &str) -> Result<ExperimentRecord> {
        let path = self.root.join("experiments").join(format!("{}.json", slug(name)));
        if let Some(existing) = read_json::<ExperimentRecord>(&path)? {
            return Ok(existing);
        }

        let experiment = ExperimentRecord::new(Uuid::new_v4().to_string(), name);
        match create_json(&path, &experiment) {
            Ok(()) => Ok(experiment),
            // Another writer created it first.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => read_json(&path)?
                .ok_or_else(|| Error::TrackingStore(format!("experiment '{name}' vanished"))),
            Err(e) => Err(Error::tracking(&format!("creating experiment '{name}'"), e)),
        }
    }

    fn start_run(&self, experiment_id: &str) -> Result<RunRecord> {
        let known = fs::read_dir(self.root.join("experiments"))
            .map_err(|e| Error::tracking("listing experiments", e))?
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| read_json::<ExperimentRecord>(&entry.path()).ok().flatten())
            .any(|experiment| experiment.experiment_id() == experiment_id);
        if !known {
            return Err(Error::TrackingStore(format!(
                "unknown experiment {experiment_id}"
            )));
        }

        let mut record = RunRecord::new(Uuid::new_v4().simple().to_string(), experiment_id);
        record.start();
        let dir = self.run_dir(record.run_id())?;
        fs::create_dir_all(dir.join("artifacts"))
            .map_err(|e| Error::tracking("creating run directory", e))?;
        write_json(&dir.join("run.json"), &record)?;
        Ok(record)
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<RunRecord> {
        if !status.is_terminal() {
            return Err(Error::TrackingStore(format!(
                "cannot close run {run_id} with non-terminal status {status:?}"
            )));
        }
        let _guard = self.lock()?;
        let (dir, mut record) = self.running_run(run_id)?;
        record.complete(status);
        write_json(&dir.join("run.json"), &record)?;
        Ok(record)
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock()?;
        let (dir, _) = self.running_run(run_id)?;
        let path = dir.join("params.json");
        let mut params: BTreeMap<String, String> = read_json(&path)?.unwrap_or_default();
        match params.get(key) {
            Some(existing) if existing != value => Err(Error::TrackingStore(format!(
                "param '{key}' already logged as '{existing}', refusing '{value}'"
            ))),
            Some(_) => Ok(()),
            None => {
                params.insert(key.to_string(), value.to_string());
                write_json(&path, &params)
            }
        }
    }

    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: u64) -> Result<()> {
        let _guard = self.lock()?;
        let (dir, _) = self.running_run(run_id)?;
        let line = serde_json::to_string(&MetricRecord::new(run_id, key, step, value))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("metrics.jsonl"))
            .map_err(|e| Error::tracking("opening metrics log", e))?;
        writeln!(file, "{line}").map_err(|e| Error::tracking("appending metric", e))
    }

    fn log_artifact(&self, run_id: &str, local_path: &Path) -> Result<ArtifactRecord> {
        let key = artifact_key(local_path)?;
        let content = fs::read(local_path)
            .map_err(|e| Error::tracking(&format!("reading artifact {}", local_path.display()), e))?;

        let _guard = self.lock()?;
        let (dir, _) = self.running_run(run_id)?;
        write_atomic(&dir.join("artifacts").join(&key), &content)?;
        let artifact = ArtifactRecord::for_content(run_id, key, &content);
        self.push_artifact(&dir, artifact.clone())?;
        Ok(artifact)
    }

    fn log_model(&self, run_id: &str, artifact_path: &str, payload: &[u8]) -> Result<ModelUri> {
        let relative = relative_artifact_path(artifact_path)?;
        let uri = ModelUri::run(run_id, artifact_path);

        let _guard = self.lock()?;
        let (dir, mut record) = self.running_run(run_id)?;
        let model_dir = dir.join("models").join(relative);
        fs::create_dir_all(&model_dir).map_err(|e| Error::tracking("creating model directory", e))?;
        write_atomic(&model_dir.join(MODEL_FILE), payload)?;
        self.push_artifact(&dir, ArtifactRecord::for_content(run_id, artifact_path, payload))?;

        record.set_model_uri(uri.to_string());
        write_json(&dir.join("run.json"), &record)?;
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
        let model_file = self
            .existing_run_dir(run_id)?
            .join("models")
            .join(relative_artifact_path(artifact_path)?)
            .join(MODEL_FILE);
        if !model_file.is_file() {
            return Err(Error::TrackingStore(format!("no model logged at {model_uri}")));
        }

        let versions_dir = self.model_dir(name).join("versions");
        fs::create_dir_all(&versions_dir)
            .map_err(|e| Error::tracking("creating registry directory", e))?;

        let mut next = load_versions(&versions_dir)?
            .iter()
            .map(ModelVersion::version)
            .max()
            .unwrap_or(0)
            + 1;
        loop {
            let version = ModelVersion::new(name, next, run_id.as_str(), artifact_path.as_str());
            match create_json(&versions_dir.join(format!("{next}.json")), &version) {
                Ok(()) => {
                    debug!(name, version = next, "registered model version");
                    return Ok(version);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => next += 1,
                Err(e) => return Err(Error::tracking("writing model version", e)),
            }
        }
    }

    fn set_model_alias(&self, name: &str, alias: &str, version: u32) -> Result<()> {
        let _guard = self.lock()?;
        let mut model = self
            .get_registered_model(name)?
            .ok_or_else(|| Error::TrackingStore(format!("unknown registered model '{name}'")))?;
        model.set_alias(alias, version)?;

        let path = self.model_dir(name).join("aliases.json");
        let mut aliases: BTreeMap<String, u32> = read_json(&path)?.unwrap_or_default();
        aliases.insert(alias.to_string(), version);
        write_json(&path, &aliases)
    }

    fn get_registered_model(&self, name: &str) -> Result<Option<RegisteredModel>> {
        let dir = self.model_dir(name);
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut versions = load_versions(&dir.join("versions"))?;
        versions.sort_by_key(ModelVersion::version);

        let mut model = RegisteredModel::default();
        for version in &versions {
            model.insert_version(version.clone())?;
        }
        let aliases: BTreeMap<String, u32> =
            read_json(&dir.join("aliases.json"))?.unwrap_or_default();
        for (alias, version) in aliases {
            model.set_alias(&alias, version)?;
        }
        Ok(Some(model))
    }

    fn load_run_model(&self, run_id: &str, artifact_path: &str) -> Result<Vec<u8>> {
        let path = self
            .existing_run_dir(run_id)?
            .join("models")
            .join(relative_artifact_path(artifact_path)?)
            .join(MODEL_FILE);
        fs::read(&path).map_err(|e| {
            Error::tracking(
                &format!("reading model {}", ModelUri::run(run_id, artifact_path)),
                e,
            )
        })
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        read_json(&self.run_dir(run_id)?.join("run.json"))
    }

    fn get_params(&self, run_id: &str) -> Result<BTreeMap<String, String>> {
        let dir = self.existing_run_dir(run_id)?;
        Ok(read_json(&dir.join("params.json"))?.unwrap_or_default())
    }

    fn get_metrics_for_run(&self, run_id: &str, key: &str) -> Result<Vec<MetricRecord>> {
        let path = self.existing_run_dir(run_id)?.join("metrics.jsonl");
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::tracking("opening metrics log", e)),
        };

        let mut metrics = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::tracking("reading metrics log", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let metric: MetricRecord = serde_json::from_str(&line)
                .map_err(|e| Error::tracking("parsing metrics log", e))?;
            if metric.key() == key {
                metrics.push(metric);
            }
        }
        metrics.sort_by_key(MetricRecord::step);
        Ok(metrics)
    }

    fn get_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        let dir = self.existing_run_dir(run_id)?;
        Ok(read_json(&dir.join("artifacts.json"))?.unwrap_or_default())
    }
}

/// File-system safe form of an experiment or model name.
fn slug(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn relative_artifact_path(artifact_path: &str) -> Result<&Path> {
    let path = Path::new(artifact_path);
    let valid = !artifact_path.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(Error::TrackingStore(format!(
            "artifact path '{artifact_path}' must be relative without '..'"
        )))
    }
}

fn load_versions(dir: &Path) -> Result<Vec<ModelVersion>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::tracking("listing model versions", e)),
    };
    let mut versions = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::tracking("listing model versions", e))?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            if let Some(version) = read_json(&path)? {
                versions.push(version);
            }
        }
    }
    Ok(versions)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::tracking(&format!("parsing {}", path.display()), e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::tracking(&format!("reading {}", path.display()), e)),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
    fs::write(&tmp, bytes)
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::tracking(&format!("writing {}", path.display()), e)
        })
}

/// Publish a JSON document at `path` only if `path` does not exist yet.
fn create_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
    let published = write_synced(&tmp, &bytes).and_then(|()| fs::hard_link(&tmp, path));
    let _ = fs::remove_file(&tmp);
    published
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
