//! CLI command definitions

use clap::{Args, ValueEnum};
use crate::execution::SchedulingStrategy;
use std::path::PathBuf;

/// Branch names handed over by the CI host
#[derive(Debug, Args, Clone, Default)]
pub struct CiRefs {
    /// Branch a change request targets
    #[arg(long, env = "CHANGE_TARGET")]
    pub change_target: Option<String>,

    /// Branch being built
    #[arg(long, env = "BRANCH_NAME")]
    pub branch_name: Option<String>,
}

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file (the built-in Python CI pipeline if omitted)
    #[arg(short, long)]
    pub file: Option<String>,

    /// Workspace the build runs in
    #[arg(short, long, default_value = ".")]
    pub workspace: PathBuf,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    #[command(flatten)]
    pub refs: CiRefs,

    /// Don't save the build to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file (the built-in pipeline if omitted)
    #[arg(short, long)]
    pub file: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Compute relevant files
#[derive(Debug, Args, Clone)]
pub struct RelevantFilesCommand {
    /// Repository checkout
    #[arg(short, long, default_value = ".")]
    pub workspace: PathBuf,

    /// Directory whose files are candidates
    #[arg(long, default_value = "hubblestack")]
    pub source_dir: String,

    /// Regex candidate paths must match
    #[arg(long, default_value = r"\.py$")]
    pub pattern: String,

    /// Write the list here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Remote the branch names are looked up on
    #[arg(long, default_value = "origin")]
    pub remote: String,

    #[command(flatten)]
    pub refs: CiRefs,
}

/// List pipelines
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show build counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show build history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent builds to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single build; the global `--verbose` adds its stage list
    #[arg(long)]
    pub build_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[value(name = "parallel-limited")]
    ParallelLimited,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(2),
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
