//! Pipeline configuration
//!
//! All endpoints and credentials live in an explicit [`PipelineConfig`] value
//! handed to each component. Nothing is read from, or written to, the process
//! environment, so several configurations can coexist in one process.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Logical name the trained model is registered under.
pub const DEFAULT_REGISTERED_MODEL_NAME: &str = "ReadmissionModel";

/// Experiment every pipeline run is attributed to.
pub const DEFAULT_EXPERIMENT_NAME: &str = "PatientReadmission";

/// Artifact path of the logged model inside its run.
pub const MODEL_ARTIFACT_PATH: &str = "random_forest_model";

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tracking store location: `memory://`, `file://<dir>` or a plain directory.
    pub tracking_uri: String,
    /// Experiment name runs are logged under.
    pub experiment_name: String,
    /// Registry name for the trained model.
    pub registered_model_name: String,
    /// Scratch directory for per-run local artifacts (confusion matrix).
    pub artifact_dir: PathBuf,
    /// Deadline for data loading and for the tracking/registry stage.
    #[serde(with = "duration_secs")]
    pub io_timeout: Duration,
    /// Seed the categorical vocabulary from the latest registered version.
    pub reuse_registered_vocabulary: bool,
    /// Object storage behind a remote tracking store. Carried with the
    /// configuration only; the `memory://` and `file://` stores keep
    /// artifacts themselves and never read it.
    pub artifact_store: ArtifactStoreConfig,
    /// Hyperparameters for the fit.
    pub hyperparameters: Hyperparameters,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tracking_uri: "file://mlruns".to_string(),
            experiment_name: DEFAULT_EXPERIMENT_NAME.to_string(),
            registered_model_name: DEFAULT_REGISTERED_MODEL_NAME.to_string(),
            artifact_dir: PathBuf::from("artifacts"),
            io_timeout: Duration::from_secs(60),
            reuse_registered_vocabulary: true,
            artifact_store: ArtifactStoreConfig::default(),
            hyperparameters: Hyperparameters::baseline(),
        }
    }
}

impl PipelineConfig {
    /// Configuration backed by an in-memory tracking store.
    ///
    /// Useful for tests and dry runs.
    #[must_use]
    pub fn in_memory(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            tracking_uri: "memory://".to_string(),
            artifact_dir: artifact_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file cannot be read, parsed,
    /// or fails [`validate`](Self::validate).
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            Error::Configuration(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values no run could succeed with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.tracking_uri.trim().is_empty() {
            return Err(Error::Configuration("tracking_uri is empty".to_string()));
        }
        if self.experiment_name.trim().is_empty() {
            return Err(Error::Configuration("experiment_name is empty".to_string()));
        }
        if self.registered_model_name.trim().is_empty() {
            return Err(Error::Configuration(
                "registered_model_name is empty".to_string(),
            ));
        }
        if self.io_timeout.is_zero() {
            return Err(Error::Configuration("io_timeout must be positive".to_string()));
        }
        Ok(())
    }
}

/// Object storage settings (endpoint and credentials).
///
/// Passed through unchanged for a tracking server that stores its artifacts
/// in S3-compatible storage. `Debug` redacts the secret key.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArtifactStoreConfig {
    /// S3-compatible endpoint URL.
    pub endpoint_url: String,
    /// Region name.
    pub region: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Use path-style bucket addressing.
    pub force_path_style: bool,
}

impl Default for ArtifactStoreConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://127.0.0.1:4566".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            force_path_style: true,
        }
    }
}

impl fmt::Debug for ArtifactStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStoreConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Class weighting strategy for the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassWeight {
    /// Every sample weighs 1.
    #[default]
    None,
    /// Weight classes by `n_samples / (n_classes * class_count)`.
    Balanced,
}

impl fmt::Display for ClassWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Balanced => write!(f, "balanced"),
        }
    }
}

/// Random forest hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Number of trees.
    pub n_estimators: usize,
    /// Maximum tree depth.
    pub max_depth: usize,
    /// Seed for bootstrap and feature sampling; `None` draws from entropy.
    pub random_state: Option<u64>,
    /// Class weighting.
    #[serde(default)]
    pub class_weight: ClassWeight,
}

impl Hyperparameters {
    /// Baseline run: 100 trees, depth 5, seed 42, balanced classes.
    #[must_use]
    pub const fn baseline() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 5,
            random_state: Some(42),
            class_weight: ClassWeight::Balanced,
        }
    }

    /// Flat key → value record, as logged to the tracking store.
    #[must_use]
    pub fn to_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("n_estimators".to_string(), self.n_estimators.to_string());
        params.insert("max_depth".to_string(), self.max_depth.to_string());
        params.insert(
            "random_state".to_string(),
            self.random_state
                .map_or_else(|| "none".to_string(), |seed| seed.to_string()),
        );
        params.insert("class_weight".to_string(), self.class_weight.to_string());
        params
    }
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self::baseline()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
