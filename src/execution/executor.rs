//! Stage executor - runs individual stages against the runner and VCS

use crate::{
    core::{config::StageKind, BuildContext, ContextChange, Stage},
    execution::runner::CommandRunner,
    stages::{self, StageOutcome, StageRun},
    vcs::Vcs,
};
use std::sync::Arc;
use tracing::{error, info};

/// Result of executing a stage
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// Stage completed successfully
    Success {
        summary: String,
        log: Vec<String>,
        changes: Vec<ContextChange>,
    },
    /// Stage decided there was nothing to do
    Skipped { reason: String, log: Vec<String> },
    /// Stage failed
    Failed {
        error: String,
        exit_code: Option<i32>,
        log: Vec<String>,
    },
}

impl ExecutionResult {
    pub fn log(&self) -> &[String] {
        match self {
            ExecutionResult::Success { log, .. }
            | ExecutionResult::Skipped { log, .. }
            | ExecutionResult::Failed { log, .. } => log,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionResult::Failed { .. })
    }
}

/// Executes a single stage
pub struct StageExecutor<R> {
    runner: Arc<R>,
    vcs: Arc<dyn Vcs>,
}

impl<R: CommandRunner> StageExecutor<R> {
    pub fn new(runner: R, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            runner: Arc::new(runner),
            vcs,
        }
    }

    /// Execute a stage and return the result. Errors never escape; they
    /// become [`ExecutionResult::Failed`].
    pub async fn execute(&self, stage: &Stage, context: &BuildContext) -> ExecutionResult {
        info!("Executing stage: {} ({})", stage.id, stage.kind.label());

        let mut run = StageRun::new(self.runner.as_ref(), context.clone(), stage.timeout());
        let vcs = self.vcs.as_ref();

        let outcome = match &stage.kind {
            StageKind::Shell(config) => stages::shell::run_shell(&mut run, config).await,
            StageKind::WorkspaceReset(config) => {
                stages::workspace::reset_workspace(vcs, &mut run, config).await
            }
            StageKind::RelevantFiles(config) => {
                stages::relevant::compute_relevant_files(vcs, &mut run, config).await
            }
            StageKind::Provision(config) => stages::provision::provision(&mut run, config).await,
            StageKind::UnitTests(config) => stages::unit_tests::run_unit_tests(&mut run, config).await,
            StageKind::Lint(config) => stages::lint::run_lint(&mut run, config).await,
            StageKind::Publish(config) => stages::publish::publish_reports(&mut run, config).await,
        };

        let (log, changes) = run.finish();

        match outcome {
            Ok(StageOutcome::Done(summary)) => {
                info!("Stage {} completed: {}", stage.id, summary);
                ExecutionResult::Success {
                    summary,
                    log,
                    changes,
                }
            }
            Ok(StageOutcome::Skipped(reason)) => {
                info!("Stage {} skipped: {}", stage.id, reason);
                ExecutionResult::Skipped { reason, log }
            }
            Err(e) => {
                error!("Stage {} failed: {}", stage.id, e);
                ExecutionResult::Failed {
                    error: e.to_string(),
                    exit_code: e.exit_code(),
                    log,
                }
            }
        }
    }
}
