//! Command-line front end for the tactile data-collection rig.
//!
//! # Commands
//!
//! - `tactile_daq record` - Record episodes until Ctrl-C
//! - `tactile_daq inspect <DIR>` - Summarize a recorded dataset
//! - `tactile_daq config` - Print the effective settings

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tactile_daq::config::{CapturePolicy, Settings};
use tactile_daq::data::reader::{FieldSpec, TactileDataset};
use tactile_daq::data::tensor::Scalar;
use tactile_daq::logging;
use tactile_daq::session::{run_session, DatasetWriter, PromptDescriber};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tactile_daq")]
#[command(about = "Record and inspect tactile touch datasets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record episodes into a dataset directory until interrupted
    Record {
        /// TOML settings file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Dataset directory, overriding the settings
        #[arg(long)]
        dataset_dir: Option<PathBuf>,

        /// Use simulated devices instead of the rig
        #[arg(long)]
        simulate: bool,

        /// Capture policy: fixed_delay or continuous
        #[arg(long)]
        policy: Option<CapturePolicy>,

        /// Stop after this many episodes
        #[arg(long)]
        episodes: Option<usize>,
    },

    /// Load a dataset and print its settings and field layout
    Inspect {
        /// Dataset directory
        #[arg(name = "DIR")]
        dir: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective settings as TOML
    Config {
        /// TOML settings file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct DatasetReport {
    items: usize,
    config: BTreeMap<String, Scalar>,
    fields: BTreeMap<String, FieldSpec>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            config,
            dataset_dir,
            simulate,
            policy,
            episodes,
        } => {
            let mut settings = Settings::load(config.as_deref())?;
            if let Some(dir) = dataset_dir {
                settings.dataset_dir = dir;
            }
            if let Some(policy) = policy {
                settings.capture.policy = policy;
            }
            settings.devices.simulate |= simulate;
            logging::init(&settings.log_level);
            record(settings, episodes).await
        }
        Commands::Inspect { dir, json } => {
            logging::init("warn");
            inspect(dir, json)
        }
        Commands::Config { config } => {
            let settings = Settings::load(config.as_deref())?;
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

async fn record(settings: Settings, episodes: Option<usize>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, finishing current episode");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => warn!(error = %err, "failed to listen for interrupt"),
        }
    });

    let writer = DatasetWriter::new(settings).with_episode_limit(episodes);
    let mut describer = PromptDescriber::stdio()?;
    let summary = run_session(&writer, &mut describer, shutdown_rx)
        .await
        .context("Recording failed")?;

    println!(
        "Wrote {} episode(s) to {} (items {:04}..{:04})",
        summary.episodes_written,
        writer.layout().items_dir().display(),
        summary.first_index,
        summary.next_index()
    );
    Ok(())
}

fn inspect(dir: PathBuf, json: bool) -> Result<()> {
    let dataset = TactileDataset::open(&dir)
        .with_context(|| format!("Failed to load dataset at {}", dir.display()))?;
    let report = DatasetReport {
        items: dataset.len(),
        config: dataset.meta().scalars(),
        fields: dataset
            .field_specs()
            .into_iter()
            .map(|(field, spec)| (field.to_string(), spec))
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Dataset: {}", dir.display());
    println!("Items:   {}", report.items);
    println!("\nConfig:");
    for (key, value) in &report.config {
        println!("  {:<24} {}", key, value);
    }
    println!("\nFields:");
    for (field, spec) in &report.fields {
        println!("  {:<24} {}", field, spec);
    }
    Ok(())
}
