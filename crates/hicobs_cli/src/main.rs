//! hicobs command-line driver

mod inspect;
mod synth;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hicobs_core::config::{AnalysisConfig, SourceKind};
use hicobs_core::driver::Driver;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "hicobs")]
#[command(about = "Centrality-binned observables from heavy-ion event ensembles")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate design sets and write their output blobs
    Run {
        /// Analysis configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,
        /// Design set to process; all sets when omitted
        #[arg(long)]
        set: Option<String>,
        /// Worker threads, overrides the configuration
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Decode an output blob
    Inspect {
        /// Configuration the blob was written with
        #[arg(short, long)]
        config: PathBuf,
        /// Output blob
        #[arg(short, long)]
        input: PathBuf,
        /// Write one row per (design, system, idf, observable, bin) to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Print rows as JSON lines instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Write synthetic event ensembles for every configured system
    Synth {
        /// Analysis configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,
        /// Root directory for the generated events
        #[arg(short, long)]
        output_dir: PathBuf,
        /// Number of design points
        #[arg(long, default_value = "4")]
        design_points: usize,
        /// Events per design point
        #[arg(long, default_value = "1000")]
        events: usize,
        /// RNG seed, overrides the parameter file
        #[arg(long)]
        seed: Option<u64>,
        /// Storage layout of the generated design points
        #[arg(long, value_enum, default_value_t = SourceKind::Concatenated)]
        source: SourceKind,
        /// Generator parameters (TOML)
        #[arg(long)]
        params: Option<PathBuf>,
    },
}

fn init_logging(level: tracing::Level, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

pub(crate) fn load_config(path: &Path) -> Result<AnalysisConfig> {
    AnalysisConfig::load(path).with_context(|| format!("loading configuration {}", path.display()))
}

fn run(config_path: &Path, set: Option<&str>, threads: Option<usize>) -> Result<()> {
    let config = load_config(config_path)?;
    if config.design_sets.is_empty() {
        bail!("{} defines no design sets", config_path.display());
    }

    let threads = threads.unwrap_or(config.threads);
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("configuring the worker pool")?;
    }

    info!(
        config = %config_path.display(),
        systems = config.systems.len(),
        idf = config.n_idf,
        threads = rayon::current_num_threads(),
        "Starting aggregation"
    );

    let driver = Driver::new(config);
    let summaries = driver.run(set)?;
    for summary in &summaries {
        if summary.failed.is_empty() {
            info!(
                set = %summary.set,
                design_points = summary.design_points,
                output = %summary.output.display(),
                "Done"
            );
        } else {
            warn!(
                set = %summary.set,
                design_points = summary.design_points,
                failed = ?summary.failed,
                output = %summary.output.display(),
                "Done with zero-filled design points"
            );
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.json_logs);

    let result = match cli.command {
        Commands::Run {
            config,
            set,
            threads,
        } => run(&config, set.as_deref(), threads),
        Commands::Inspect {
            config,
            input,
            csv,
            json,
        } => inspect::inspect(&config, &input, csv.as_deref(), json),
        Commands::Synth {
            config,
            output_dir,
            design_points,
            events,
            seed,
            source,
            params,
        } => synth::synth(
            &config,
            &synth::SynthArgs {
                output_dir,
                design_points,
                events,
                seed,
                source,
                params,
            },
        ),
    };

    if let Err(e) = result {
        error!(error = %format!("{:#}", e), "Fatal error");
        std::process::exit(1);
    }
}
