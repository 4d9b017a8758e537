//! `readmission` command-line tool
//!
//! ```text
//! readmission train   --data data/diabetic_data.csv [--promote]
//! readmission promote --version 3 [--alias production]
//! readmission predict --row 70,0,1,3,41,12,1 [--model-uri models:/ReadmissionModel@production]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use readmission_pipeline::config::PipelineConfig;
use readmission_pipeline::pipeline::Pipeline;
use readmission_pipeline::preprocess::{FeatureRow, N_FEATURES};
use readmission_pipeline::serving::ServingModel;
use readmission_pipeline::storage::DataSource;
use readmission_pipeline::tracking::{open_tracking_store, ModelUri, PRODUCTION_ALIAS};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "readmission")]
#[command(about = "Train, register and serve the patient readmission model")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, short, global = true, help = "Pipeline configuration (JSON)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Tracking store: memory://, file://<dir> or a directory")]
    tracking_uri: Option<String>,

    #[arg(long, global = true, help = "Registered model name")]
    model_name: Option<String>,

    #[arg(long, global = true, help = "Deadline in seconds for data loading and tracking")]
    timeout_secs: Option<f64>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run the training pipeline and register a new model version")]
    Train {
        #[arg(long, help = "Parquet or CSV file with patient records")]
        data: PathBuf,

        #[arg(long, help = "Experiment to log the run under")]
        experiment: Option<String>,

        #[arg(long, help = "Scratch directory for local artifacts")]
        artifact_dir: Option<PathBuf>,

        #[arg(long, help = "Point the production alias at the new version")]
        promote: bool,
    },

    #[command(about = "Point an alias at a registered version")]
    Promote {
        #[arg(long, help = "Registered version")]
        version: u32,

        #[arg(long, default_value = PRODUCTION_ALIAS, help = "Alias to set")]
        alias: String,
    },

    #[command(about = "Score one encoded feature row")]
    Predict {
        #[arg(long, help = "Model URI (default: models:/<model-name>@production)")]
        model_uri: Option<String>,

        #[arg(long, help = "Seven comma-separated feature values")]
        row: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Train {
            data,
            experiment,
            artifact_dir,
            promote,
        } => {
            let mut config = config;
            if let Some(experiment) = experiment {
                config.experiment_name = experiment;
            }
            if let Some(artifact_dir) = artifact_dir {
                config.artifact_dir = artifact_dir;
            }

            let pipeline = Pipeline::new(config).context("failed to set up pipeline")?;
            let summary = pipeline
                .run(&DataSource::from(data.clone()))
                .with_context(|| format!("pipeline run on {} failed", data.display()))?;

            if promote {
                pipeline
                    .store()
                    .set_model_alias(&summary.registered_model_name, PRODUCTION_ALIAS, summary.version)
                    .context("failed to promote new version")?;
                info!(version = summary.version, "promoted to {PRODUCTION_ALIAS}");
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Promote { version, alias } => {
            let store = open_tracking_store(&config).context("failed to open tracking store")?;
            store
                .set_model_alias(&config.registered_model_name, &alias, version)
                .with_context(|| {
                    format!("failed to set {}@{alias}", config.registered_model_name)
                })?;
            println!("{}@{alias} -> version {version}", config.registered_model_name);
        }

        Command::Predict { model_uri, row } => {
            let uri = match model_uri {
                Some(text) => text.parse::<ModelUri>()?,
                None => ModelUri::alias(&config.registered_model_name, PRODUCTION_ALIAS),
            };
            let store = open_tracking_store(&config).context("failed to open tracking store")?;
            let model = ServingModel::load(store.as_ref(), &uri)
                .with_context(|| format!("failed to load {uri}"))?;
            let features = parse_row(&row)?;
            println!("{:.6}", model.predict_proba(&features));
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(uri) = &cli.tracking_uri {
        config.tracking_uri.clone_from(uri);
    }
    if let Some(name) = &cli.model_name {
        config.registered_model_name.clone_from(name);
    }
    if let Some(secs) = cli.timeout_secs {
        config.io_timeout =
            Duration::try_from_secs_f64(secs).context("--timeout-secs must be a positive number")?;
    }
    config.validate()?;
    Ok(config)
}

fn parse_row(text: &str) -> Result<FeatureRow> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>().with_context(|| format!("invalid feature value '{v}'")))
        .collect::<Result<Vec<_>>>()?;
    let Ok(row) = <FeatureRow>::try_from(values.as_slice()) else {
        bail!("expected {N_FEATURES} feature values, got {}", values.len());
    };
    Ok(row)
}
