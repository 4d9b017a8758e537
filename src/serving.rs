//! Serving-side model loading
//!
//! Loads a registered model and scores already-encoded feature rows. Raw
//! categorical values are encoded with the model's own frozen vocabulary, so
//! codes match training exactly and unseen categories are rejected.

use crate::forest::Classifier;
use crate::preprocess::{CategoricalVocabulary, FeatureMatrix, FeatureRow};
use crate::tracking::{ModelArtifact, ModelUri, TrackingStore, PRODUCTION_ALIAS};
use crate::{Error, Result};
use tracing::info;

/// A loaded model ready to score rows.
#[derive(Debug, Clone)]
pub struct ServingModel {
    uri: ModelUri,
    version: Option<u32>,
    artifact: ModelArtifact,
}

impl ServingModel {
    /// Load the model behind `uri` (`models:/<name>/<version>`,
    /// `models:/<name>@<alias>` or `runs:/<run_id>/<path>`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrackingStore`] if the URI does not resolve or the
    /// payload is not a model written by this crate.
    pub fn load<S: TrackingStore + ?Sized>(store: &S, uri: &ModelUri) -> Result<Self> {
        let version = match uri {
            ModelUri::Run { .. } => None,
            ModelUri::Version { version, .. } => Some(*version),
            ModelUri::Alias { name, alias } => {
                let model = store.get_registered_model(name)?.ok_or_else(|| {
                    Error::TrackingStore(format!("unknown registered model '{name}'"))
                })?;
                let target = model.by_alias(alias).ok_or_else(|| {
                    Error::TrackingStore(format!("alias '{alias}' is not set on '{name}'"))
                })?;
                Some(target.version())
            }
        };

        let artifact = ModelArtifact::from_bytes(&store.load_model(uri)?)?;
        info!(uri = %uri, ?version, "serving model loaded");
        Ok(Self {
            uri: uri.clone(),
            version,
            artifact,
        })
    }

    /// Load the version `name@production` points at.
    ///
    /// # Errors
    ///
    /// See [`ServingModel::load`].
    pub fn load_production<S: TrackingStore + ?Sized>(store: &S, name: &str) -> Result<Self> {
        Self::load(store, &ModelUri::alias(name, PRODUCTION_ALIAS))
    }

    /// URI the model was loaded from.
    #[must_use]
    pub const fn uri(&self) -> &ModelUri {
        &self.uri
    }

    /// Registered version, when loaded through the registry.
    #[must_use]
    pub const fn version(&self) -> Option<u32> {
        self.version
    }

    /// Vocabulary the model was trained with.
    #[must_use]
    pub const fn vocabulary(&self) -> &CategoricalVocabulary {
        &self.artifact.vocabulary
    }

    /// Input example stored with the model.
    #[must_use]
    pub fn input_example(&self) -> &[FeatureRow] {
        &self.artifact.input_example
    }

    /// Code of a raw categorical value, as a feature value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] for a category the model never saw.
    #[allow(clippy::cast_precision_loss)]
    pub fn encode_category(&self, column: &str, value: &str) -> Result<f64> {
        self.artifact
            .vocabulary
            .encode(column, value)
            .map(|code| code as f64)
    }

    /// Probability of readmission within 30 days for one row.
    #[must_use]
    pub fn predict_proba(&self, row: &FeatureRow) -> f64 {
        self.artifact.model.predict_proba_row(row)
    }

    /// Probabilities for every row of `features`.
    #[must_use]
    pub fn predict_proba_batch(&self, features: &FeatureMatrix) -> Vec<f64> {
        self.artifact.model.predict_proba(features)
    }
}
