use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use sourcetracker::config::GibbsConfig;
use sourcetracker::io::{read_count_table, write_results};
use sourcetracker::pipeline::{gibbs, gibbs_loo};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Estimate the source composition of sink samples with Gibbs sampling
    Gibbs(GibbsArgs),
}

#[derive(clap::Args, Debug)]
pub struct GibbsArgs {
    /// Tab-delimited source table (rows are sources, columns are features)
    #[arg(short, long)]
    pub sources: PathBuf,

    /// Tab-delimited sink table with the same feature columns
    #[arg(short = 'k', long, required_unless_present = "loo")]
    pub sinks: Option<PathBuf>,

    /// Output directory to create
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Classify each source against the others (leave-one-out)
    #[arg(long)]
    pub loo: bool,

    /// Number of worker threads
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Prior counts of each feature in the training environments. Higher
    /// values make source distributions smoother; 0.01 is a more
    /// conservative choice
    #[arg(long, default_value_t = 0.001)]
    pub alpha1: f64,

    /// Prior counts of each feature in the Unknown environment, as a
    /// fraction of the sink total
    #[arg(long, default_value_t = 0.1)]
    pub alpha2: f64,

    /// Count added to each environment when computing environment
    /// probabilities
    #[arg(long, default_value_t = 10.0)]
    pub beta: f64,

    /// Number of independent Markov chains per sink
    #[arg(long, default_value_t = 10)]
    pub restarts: usize,

    /// Number of draws recorded per chain
    #[arg(long, default_value_t = 1)]
    pub draws_per_restart: usize,

    /// Passes made before the first draw
    #[arg(long, default_value_t = 100)]
    pub burnin: usize,

    /// Passes between draws (thinning)
    #[arg(long, default_value_t = 1)]
    pub delay: usize,

    /// Write a feature table per sink (or per source with --loo)
    #[arg(long)]
    pub per_sink_feature_assignments: bool,

    /// Seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Round fractional counts up instead of rejecting them
    #[arg(long)]
    pub ceil_fractional: bool,

    /// Accepted for compatibility; has no effect
    #[arg(long, hide = true)]
    pub sample_with_replacement: bool,
}

impl GibbsArgs {
    pub fn to_config(&self) -> GibbsConfig {
        GibbsConfig {
            alpha1: self.alpha1,
            alpha2: self.alpha2,
            beta: self.beta,
            restarts: self.restarts,
            draws_per_restart: self.draws_per_restart,
            burnin: self.burnin,
            delay: self.delay,
            create_feature_tables: self.per_sink_feature_assignments,
            jobs: self.jobs,
            seed: self.seed,
            sample_with_replacement: self.sample_with_replacement,
        }
    }
}

/// Main entry point for CLI
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Gibbs(args) => run_gibbs(&args),
    }
}

fn run_gibbs(args: &GibbsArgs) -> Result<()> {
    let config = args.to_config();
    config.validate().context("Invalid sampler parameters")?;

    if args.output_dir.exists() {
        bail!(
            "Output directory '{}' already exists",
            args.output_dir.display()
        );
    }

    let sources = read_count_table(&args.sources, args.ceil_fractional)?;
    let results = if args.loo {
        gibbs_loo(&sources, &config)?
    } else {
        let sinks_path = args
            .sinks
            .as_ref()
            .context("--sinks is required unless --loo is given")?;
        let sinks = read_count_table(sinks_path, args.ceil_fractional)?;
        gibbs(&sources, &sinks, &config)?
    };

    fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "Failed to create output directory '{}'",
            args.output_dir.display()
        )
    })?;
    let written = write_results(&results, &config, &args.output_dir)?;
    for path in &written {
        info!("Wrote {}", path.display());
    }
    Ok(())
}
