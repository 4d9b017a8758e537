//! # Readmission Pipeline: Train, Track and Register a Readmission Model
//!
//! **Version**: 0.1.0
//!
//! Trains a random-forest classifier that predicts whether a patient is
//! readmitted within 30 days, evaluates it on a held-out split, and records
//! the run (params, metrics, artifacts, model) in a tracking store whose
//! registry assigns every trained model the next version.
//!
//! ## Stages
//!
//! - **Preprocess** ([`preprocess`]): raw Arrow batches → `[f64; 7]` rows
//!   plus 0/1 labels, with a persisted categorical vocabulary
//! - **Train** ([`train`]): seeded 80/20 split, random forest fit
//! - **Evaluate** ([`evaluate`]): AUC-ROC, precision, recall, confusion-matrix SVG
//! - **Track** ([`tracking`]): run scope, model payload, registry version
//! - **Orchestrate** ([`pipeline`]): the stages in order, under I/O deadlines
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use readmission_pipeline::config::PipelineConfig;
//! use readmission_pipeline::storage::DataSource;
//!
//! let config = PipelineConfig::from_json_file("pipeline.json")?;
//! let summary = readmission_pipeline::pipeline::run(config, &DataSource::from(
//!     std::path::Path::new("data/diabetic_data.parquet"),
//! ))?;
//!
//! let (auc, precision, recall) = summary.metrics();
//! println!("registered v{}: {auc:.3} / {precision:.3} / {recall:.3}", summary.version);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod evaluate;
pub mod forest;
pub mod pipeline;
pub mod preprocess;
pub mod serving;
pub mod storage;
pub mod tracking;
pub mod train;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineSummary};
pub use preprocess::FEATURE_COLUMNS;
