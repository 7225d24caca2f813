//! Power dataset CLI
//!
//! Turns workload manifests into inference requests, extracts per-workload
//! energy labels from a Prometheus-compatible backend and joins features with
//! labels into a training table.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{join, labels, manifest, show};
use dataset_lib::JoinStatus;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit code for a join where no key matched
const EXIT_KEY_MISMATCH: u8 = 2;

/// Power dataset CLI
#[derive(Parser)]
#[command(name = "pds")]
#[command(author, version, about = "Build workload power datasets", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a manifest file into InferenceRequest NDJSON
    FromFile {
        /// Manifest path (`-` for stdin)
        path: PathBuf,

        /// Append to this file instead of writing to stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Extract energy labels from the metrics backend
    Labels(labels::LabelsArgs),

    /// Join a feature table with a label table
    Join {
        /// Feature table (.parquet, .ndjson or .jsonl)
        #[arg(long)]
        features: PathBuf,

        /// Label table
        #[arg(long)]
        labels: PathBuf,

        /// Output training table
        #[arg(long, short, default_value = "train.parquet")]
        out: PathBuf,

        /// Also require spec hashes to match
        #[arg(long)]
        match_spec_hash: bool,
    },

    /// Print the rows of a dataset table
    Show {
        /// Table path
        path: PathBuf,

        /// Maximum rows to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = config::Config::load()?;

    match cli.command {
        Commands::FromFile { path, out } => {
            manifest::from_file(&path, out.as_deref())?;
        }
        Commands::Labels(args) => {
            labels::run(args, &config, cli.format).await?;
        }
        Commands::Join {
            features,
            labels,
            out,
            match_spec_hash,
        } => {
            let status = join::run(&features, &labels, &out, match_spec_hash, cli.format)?;
            if status == JoinStatus::KeyMismatch {
                return Ok(ExitCode::from(EXIT_KEY_MISMATCH));
            }
        }
        Commands::Show { path, limit } => {
            show::run(&path, limit, cli.format)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
