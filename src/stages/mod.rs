//! Stage implementations
//!
//! Each stage kind drives external tools through a [`StageRun`], which
//! carries the runner, a private copy of the build context, the per-command
//! timeout and the stage log. Stages report context changes (virtualenv
//! activation) through the run instead of touching shared state.

pub mod lint;
pub mod provision;
pub mod publish;
pub mod relevant;
pub mod shell;
pub mod workspace;

use crate::core::{BuildContext, ContextChange};
use crate::execution::runner::{CommandOutput, CommandRunner, RunnerError, ShellCommand};
use crate::vcs::VcsError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors that fail a stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {exit_code}")]
    CommandFailed { command: String, exit_code: i32 },

    #[error("Empty command")]
    EmptyCommand,

    #[error("Module '{0}' is importable but must not be installed")]
    ForbiddenModule(String),

    #[error("Report directory {} does not exist", .0.display())]
    MissingReportDir(PathBuf),

    #[error("Missing report files: {}", .0.join(", "))]
    MissingReports(Vec<String>),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StageError::Io {
            path: path.into(),
            source,
        }
    }

    /// Exit code of the command that failed the stage, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StageError::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// How a stage that did not fail ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Work done; one-line summary
    Done(String),
    /// Nothing to do
    Skipped(String),
}

/// Per-stage execution state
pub struct StageRun<'a> {
    runner: &'a dyn CommandRunner,
    /// The stage's own copy of the build context
    pub context: BuildContext,
    timeout: Duration,
    log: Vec<String>,
    changes: Vec<ContextChange>,
}

impl<'a> StageRun<'a> {
    pub fn new(runner: &'a dyn CommandRunner, context: BuildContext, timeout: Duration) -> Self {
        Self {
            runner,
            context,
            timeout,
            log: Vec::new(),
            changes: Vec::new(),
        }
    }

    /// Append a line to the stage log
    pub fn note(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line);
        self.log.push(line);
    }

    /// Apply a context change now and hand it to later stages
    pub fn change(&mut self, change: ContextChange) {
        self.context.apply(&change);
        self.changes.push(change);
    }

    /// Run a command, whatever its exit code
    pub async fn run(&mut self, command: ShellCommand) -> Result<CommandOutput, StageError> {
        let command = match command.timeout {
            Some(_) => command,
            None => command.timeout(self.timeout),
        };

        self.log.push(format!("+ {}", command.display()));
        let output = self.runner.run(&command, &self.context).await?;

        self.log.extend(output.stdout.lines().map(str::to_string));
        self.log.extend(output.stderr.lines().map(str::to_string));
        Ok(output)
    }

    /// Run a command and require a zero exit
    pub async fn check(&mut self, command: ShellCommand) -> Result<CommandOutput, StageError> {
        let display = command.display();
        let output = self.run(command).await?;
        if !output.success() {
            return Err(StageError::CommandFailed {
                command: display,
                exit_code: output.exit_code,
            });
        }
        Ok(output)
    }

    /// Consume the run, returning its log and context changes
    pub fn finish(self) -> (Vec<String>, Vec<ContextChange>) {
        (self.log, self.changes)
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }
}

/// Render every element of an argv template
pub fn render_argv(context: &BuildContext, argv: &[String]) -> Vec<String> {
    argv.iter().map(|arg| context.render(arg)).collect()
}
