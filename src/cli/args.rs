//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint};

use crate::domain::{AlignmentFormat, SubstitutionModel};

/// Haplogroup divergence time estimation with mcmctree
#[derive(Parser, Debug)]
#[command(name = "haptime")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Debug level: -d info, -dd debug, -ddd trace
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Config file (default: $XDG_CONFIG_HOME/haptime/haptime.toml)
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Estimate divergence times: prepare inputs, run the estimator, summarize
    Run(EstimateArgs),

    /// Write estimator inputs next to the output prefix without running it
    Prepare(EstimateArgs),

    /// Map an existing estimator report onto the nodes of a tree
    Summarize {
        /// Newick tree the report was produced from
        #[arg(long, value_hint = ValueHint::FilePath)]
        tree: PathBuf,
        /// Estimator report (out file)
        #[arg(long, value_hint = ValueHint::FilePath)]
        out: PathBuf,
        /// Output prefix
        #[arg(short = 'o', long = "output", default_value = "TimeEstimation")]
        prefix: PathBuf,
    },

    /// Show the normalized tree
    Tree {
        /// Newick tree file
        #[arg(long, value_hint = ValueHint::FilePath)]
        tree: PathBuf,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct EstimateArgs {
    /// Aligned sequences (FASTA or PHYLIP)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub seq: PathBuf,

    /// Alignment format (default: from file extension)
    #[arg(long, value_parser = parse_format)]
    pub seq_format: Option<AlignmentFormat>,

    /// Newick tree with haplogroup labels
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub tree: PathBuf,

    /// Calibration `node:time` constraint, or a file of them, one per line
    #[arg(long)]
    pub cal: Option<String>,

    /// Calibrate the root from the configured haplogroup age table
    #[arg(long)]
    pub auto_cal: bool,

    /// Substitution model [jc69, k80, f81, f84, hky85, gtr]
    #[arg(long, value_parser = parse_model)]
    pub model: Option<SubstitutionModel>,

    /// Mutation rate per site per year
    #[arg(long)]
    pub mut_rate: Option<f64>,

    /// Drop sites with at least this fraction of N/-, 0 disables
    #[arg(long, value_parser = parse_fraction)]
    pub filter: Option<f64>,

    /// MCMC sample count
    #[arg(long = "mcmc")]
    pub nsample: Option<u64>,

    /// Output prefix
    #[arg(short = 'o', long = "output", default_value = "TimeEstimation")]
    pub prefix: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show merged config
    Show,

    /// Print config template
    Template,

    /// Show config file path
    Path,
}

fn parse_model(s: &str) -> Result<SubstitutionModel, String> {
    s.parse()
}

fn parse_format(s: &str) -> Result<AlignmentFormat, String> {
    s.parse()
}

fn parse_fraction(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not within [0, 1]"))
    }
}
