//! Model registry records and model URIs
//!
//! ## URI forms
//!
//! ```text
//! runs:/<run_id>/<artifact_path>   model logged by a run
//! models:/<name>/<version>         registered version
//! models:/<name>@<alias>           version an alias points at
//! ```

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Alias serving resolves by default.
pub const PRODUCTION_ALIAS: &str = "production";

/// Reference to a model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelUri {
    /// Model logged by a run.
    Run {
        /// Run that logged the model.
        run_id: String,
        /// Artifact path inside the run.
        artifact_path: String,
    },
    /// Registered version.
    Version {
        /// Registered model name.
        name: String,
        /// Version number (from 1).
        version: u32,
    },
    /// Version an alias currently points at.
    Alias {
        /// Registered model name.
        name: String,
        /// Alias such as `production`.
        alias: String,
    },
}

impl ModelUri {
    /// `runs:/<run_id>/<artifact_path>`
    #[must_use]
    pub fn run(run_id: impl Into<String>, artifact_path: impl Into<String>) -> Self {
        Self::Run {
            run_id: run_id.into(),
            artifact_path: artifact_path.into(),
        }
    }

    /// `models:/<name>/<version>`
    #[must_use]
    pub fn version(name: impl Into<String>, version: u32) -> Self {
        Self::Version {
            name: name.into(),
            version,
        }
    }

    /// `models:/<name>@<alias>`
    #[must_use]
    pub fn alias(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Alias {
            name: name.into(),
            alias: alias.into(),
        }
    }
}

impl fmt::Display for ModelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run {
                run_id,
                artifact_path,
            } => write!(f, "runs:/{run_id}/{artifact_path}"),
            Self::Version { name, version } => write!(f, "models:/{name}/{version}"),
            Self::Alias { name, alias } => write!(f, "models:/{name}@{alias}"),
        }
    }
}

impl FromStr for ModelUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| Error::Configuration(format!("invalid model URI '{s}': {why}"));

        if let Some(rest) = s.strip_prefix("runs:/") {
            let (run_id, artifact_path) = rest
                .split_once('/')
                .ok_or_else(|| invalid("expected runs:/<run_id>/<artifact_path>"))?;
            if run_id.is_empty() || artifact_path.is_empty() {
                return Err(invalid("empty run id or artifact path"));
            }
            return Ok(Self::run(run_id, artifact_path));
        }

        if let Some(rest) = s.strip_prefix("models:/") {
            if let Some((name, alias)) = rest.split_once('@') {
                if name.is_empty() || alias.is_empty() || alias.contains('/') {
                    return Err(invalid("expected models:/<name>@<alias>"));
                }
                return Ok(Self::alias(name, alias));
            }
            let (name, version) = rest
                .split_once('/')
                .ok_or_else(|| invalid("expected models:/<name>/<version>"))?;
            let version: u32 = version
                .parse()
                .map_err(|_| invalid("version must be a positive integer; use @<alias> for aliases"))?;
            if name.is_empty() || version == 0 {
                return Err(invalid("empty name or version 0"));
            }
            return Ok(Self::version(name, version));
        }

        Err(invalid("expected a runs:/ or models:/ URI"))
    }
}

/// One registered version of a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelVersion {
    name: String,
    version: u32,
    run_id: String,
    artifact_path: String,
    created_at: DateTime<Utc>,
}

impl ModelVersion {
    /// Create a version record pointing at a run's model.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: u32,
        run_id: impl Into<String>,
        artifact_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            run_id: run_id.into(),
            artifact_path: artifact_path.into(),
            created_at: Utc::now(),
        }
    }

    /// Registered model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version number.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Run that logged the model.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// `runs:/` URI of the underlying model.
    #[must_use]
    pub fn source(&self) -> ModelUri {
        ModelUri::run(&self.run_id, &self.artifact_path)
    }

    /// Registration timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A registered model: its versions and aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredModel {
    versions: Vec<ModelVersion>,
    aliases: BTreeMap<String, u32>,
}

impl RegisteredModel {
    /// Append a version numbered one past the highest existing version.
    pub fn add_version(&mut self, run_id: &str, artifact_path: &str, name: &str) -> ModelVersion {
        let next = self.versions.iter().map(ModelVersion::version).max().unwrap_or(0) + 1;
        let version = ModelVersion::new(name, next, run_id, artifact_path);
        self.versions.push(version.clone());
        version
    }

    /// Insert a version loaded from storage.
    pub(crate) fn insert_version(&mut self, version: ModelVersion) -> Result<()> {
        if self.get(version.version()).is_some() {
            return Err(Error::TrackingStore(format!(
                "duplicate version {} of '{}'",
                version.version(),
                version.name()
            )));
        }
        self.versions.push(version);
        Ok(())
    }

    /// Version by number.
    #[must_use]
    pub fn get(&self, version: u32) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.version() == version)
    }

    /// Highest version.
    #[must_use]
    pub fn latest(&self) -> Option<&ModelVersion> {
        self.versions.iter().max_by_key(|v| v.version())
    }

    /// Version an alias points at.
    #[must_use]
    pub fn by_alias(&self, alias: &str) -> Option<&ModelVersion> {
        self.aliases.get(alias).and_then(|&version| self.get(version))
    }

    /// Point `alias` at an existing version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrackingStore`] if the version does not exist.
    pub fn set_alias(&mut self, alias: &str, version: u32) -> Result<()> {
        if self.get(version).is_none() {
            return Err(Error::TrackingStore(format!(
                "cannot alias '{alias}' to missing version {version}"
            )));
        }
        self.aliases.insert(alias.to_string(), version);
        Ok(())
    }

    /// All versions, in registration order.
    #[must_use]
    pub fn versions(&self) -> &[ModelVersion] {
        &self.versions
    }
}
