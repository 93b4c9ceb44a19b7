use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::info;
use propensity::balance::ClassBalance;
use propensity::commands::{evaluate, export_sample, score, train};
use propensity::config::PipelineConfig;
use propensity::ensemble::CombinationStrategy;
use std::path::PathBuf;

const DEFAULT_ARTIFACT_REL_PATH: &str = "artifacts/propensity-model.bin";

#[derive(Parser)]
#[command(name = "propensity")]
#[command(about = "Customer purchase propensity scoring pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train an ensemble on a transaction snapshot and save the artifact
    Train {
        /// Path to the transaction snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Destination for the trained artifact
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Optional pipeline config file (JSON)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        /// Combination strategy: stacking or blending
        #[arg(long)]
        strategy: Option<String>,
        /// Class balance: none, weight or oversample
        #[arg(long)]
        balance: Option<String>,
        /// Label window length in days
        #[arg(long)]
        horizon_days: Option<i64>,
        /// Random seed for folds, splits and bootstraps
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Evaluate an artifact against a labeled snapshot
    Evaluate {
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Path to the trained artifact
        #[arg(short, long)]
        model: PathBuf,
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        #[arg(long)]
        horizon_days: Option<i64>,
    },
    /// Score every customer in a snapshot with an artifact
    Score {
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        #[arg(short, long)]
        model: PathBuf,
        /// Destination for the score report (prints to stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Feature cutoff as RFC 3339; defaults to the latest timestamp
        #[arg(long)]
        cutoff: Option<String>,
        /// Number of contributing features to report per customer
        #[arg(long, default_value_t = 5)]
        top: usize,
    },
    /// Export a seeded synthetic snapshot for demos and smoke tests
    ExportSample {
        #[arg(short, long = "output", value_name = "PATH")]
        output: PathBuf,
        #[arg(long, default_value_t = 250)]
        customers: usize,
        #[arg(long, default_value_t = 240)]
        days: i64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            data_file,
            output,
            config,
            strategy,
            balance,
            horizon_days,
            seed,
        } => {
            let mut pipeline = match config {
                Some(path) => PipelineConfig::load(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(raw) = strategy {
                pipeline.strategy = CombinationStrategy::parse(&raw)
                    .ok_or_else(|| anyhow!("strategy must be stacking or blending (value: {raw})"))?;
            }
            if let Some(raw) = balance {
                pipeline.balance = ClassBalance::parse(&raw)
                    .ok_or_else(|| anyhow!("balance must be none, weight or oversample (value: {raw})"))?;
            }
            if let Some(days) = horizon_days {
                pipeline.horizon_days = days;
            }
            if let Some(seed) = seed {
                pipeline.seed = seed;
            }
            let output = output.unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_REL_PATH));
            if let Some(parent) = output.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            info!("Training from {}", data_file.display());
            train::run(&data_file, &output, &pipeline)?;
        }
        Commands::Evaluate {
            data_file,
            model,
            config,
            horizon_days,
        } => {
            let pipeline = match config {
                Some(path) => PipelineConfig::load(&path)?,
                None => PipelineConfig::default(),
            };
            let horizon = horizon_days.unwrap_or(pipeline.horizon_days);
            evaluate::run(&data_file, &model, horizon, &pipeline.evaluation)?;
        }
        Commands::Score {
            data_file,
            model,
            output,
            cutoff,
            top,
        } => {
            let cutoff = match cutoff {
                Some(raw) => Some(
                    raw.parse::<DateTime<Utc>>()
                        .map_err(|err| anyhow!("cutoff must be RFC 3339 ({err})"))?,
                ),
                None => None,
            };
            score::run(&data_file, &model, output.as_deref(), cutoff, top)?;
        }
        Commands::ExportSample {
            output,
            customers,
            days,
            seed,
        } => {
            export_sample::run(&output, customers, days, seed)?;
        }
    }

    Ok(())
}
