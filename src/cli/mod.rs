//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ListCommand, RelevantFilesCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Python CI pipeline runner
#[derive(Debug, Parser, Clone)]
#[command(name = "pyci")]
#[command(version)]
#[command(about = "Runs the Python CI pipeline: reset, diff, provision, test, lint, publish", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Stream command output while stages run
    #[arg(short, long, global = true)]
    pub stream: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Compute the changed source files without running a build
    RelevantFiles(RelevantFilesCommand),

    /// Show build history
    History(HistoryCommand),

    /// List pipelines found in history
    List(ListCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
