//! Main execution engine - orchestrates a whole build
//!
//! Main stages run as tokio tasks as soon as their dependencies are
//! satisfied. A fatal failure stops new stages from starting; the ones
//! already running finish. Cancellation and the global timeout abort the
//! running stages instead. Post stages run last, whatever happened.

use crate::{
    core::{BuildContext, ExecutionStatus, Pipeline, Stage, StageState},
    execution::{
        runner::CommandRunner, ExecutionResult, ExecutionScheduler, SchedulingStrategy,
        StageExecutor,
    },
    vcs::Vcs,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a build
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        build_id: String,
        pipeline_name: String,
    },
    StageStarted {
        stage_id: String,
        name: String,
    },
    StageOutput {
        stage_id: String,
        lines: Vec<String>,
    },
    StageCompleted {
        stage_id: String,
        summary: String,
    },
    StageSkipped {
        stage_id: String,
        reason: String,
    },
    StageFailed {
        stage_id: String,
        error: String,
        exit_code: Option<i32>,
        tolerated: bool,
    },
    StageCancelled {
        stage_id: String,
        reason: String,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Errors that stop the engine itself (stage failures are not errors)
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Stage {0} not found")]
    UnknownStage(String),

    #[error("No runnable stages left; never started: {}", .0.join(", "))]
    Stalled(Vec<String>),
}

/// How the main stages ended
struct MainOutcome {
    /// Set when the build was cancelled or timed out
    interrupted: Option<String>,
    /// Stages that could never start
    stalled: Vec<String>,
}

/// Main pipeline execution engine
pub struct ExecutionEngine<R> {
    scheduler: ExecutionScheduler,
    executor: Arc<StageExecutor<R>>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<R: CommandRunner + 'static> ExecutionEngine<R> {
    pub fn new(runner: R, vcs: Arc<dyn Vcs>, strategy: SchedulingStrategy) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            executor: Arc::new(StageExecutor::new(runner, vcs)),
            event_handlers: Arc::new(Mutex::new(Vec::new())),
            cancel: None,
        }
    }

    /// Abort the build once `cancel` holds `true`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        let mut handlers = self
            .event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self
            .event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Execute the entire pipeline. `context` ends up holding every change
    /// the stages requested.
    pub async fn execute(
        &self,
        pipeline: &mut Pipeline,
        context: &mut BuildContext,
    ) -> Result<ExecutionStatus, EngineError> {
        let execution_id = pipeline.state.execution_id;
        let pipeline_name = pipeline.name.clone();

        info!(
            "Starting build {} of {} ({})",
            context.build_id, pipeline_name, execution_id
        );
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id,
            build_id: context.build_id.clone(),
            pipeline_name: pipeline_name.clone(),
        });

        pipeline.state.start(pipeline.stages.len());

        let outcome = self.run_main_stages(pipeline, context).await?;

        if !pipeline.post.is_empty() {
            info!("Running {} post stage(s)", pipeline.post.len());
        }
        self.run_post_stages(pipeline, context).await?;

        let status = if outcome.interrupted.is_some() {
            ExecutionStatus::Cancelled
        } else if pipeline.has_failed() || !outcome.stalled.is_empty() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };

        pipeline.state.finish(status);
        self.update_state_counts(pipeline);

        info!("Build finished: {} - {:?}", pipeline_name, status);
        self.emit_event(ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        });

        if !outcome.stalled.is_empty() {
            return Err(EngineError::Stalled(outcome.stalled));
        }

        Ok(status)
    }

    async fn run_main_stages(
        &self,
        pipeline: &mut Pipeline,
        context: &mut BuildContext,
    ) -> Result<MainOutcome, EngineError> {
        let deadline = pipeline.timeout.map(|limit| Instant::now() + limit);
        let timeout_minutes = pipeline.timeout.map(|t| t.as_secs() / 60).unwrap_or_default();
        let mut cancel = self.cancel.clone();
        let mut tasks: JoinSet<(String, ExecutionResult)> = JoinSet::new();
        let mut task_stages: HashMap<Id, String> = HashMap::new();
        let mut halted = false;

        let interrupted = loop {
            if !halted {
                for stage_id in self.scheduler.next_stages(pipeline) {
                    let stage = self.start_stage(pipeline, &stage_id)?;
                    let executor = self.executor.clone();
                    let stage_context = context.clone();
                    let handle = tasks.spawn(async move {
                        let result = executor.execute(&stage, &stage_context).await;
                        (stage.id, result)
                    });
                    task_stages.insert(handle.id(), stage_id);
                }
            }

            if tasks.is_empty() {
                break None;
            }

            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(joined) => {
                        let (stage_id, result) = match joined {
                            Ok(finished) => finished,
                            Err(join_error) => {
                                error!("Stage task ended abnormally: {}", join_error);
                                let Some(stage_id) = task_stages.get(&join_error.id()).cloned() else {
                                    halted = true;
                                    continue;
                                };
                                let result = ExecutionResult::Failed {
                                    error: format!("Stage task ended abnormally: {}", join_error),
                                    exit_code: None,
                                    log: Vec::new(),
                                };
                                (stage_id, result)
                            }
                        };
                        self.finish_stage(pipeline, context, &stage_id, result);
                        if !halted && pipeline.has_failed() {
                            warn!("{} failed; no further stages will start", stage_id);
                            halted = true;
                        }
                    }
                    None => break None,
                },
                _ = cancel_requested(&mut cancel) => {
                    break Some("Build cancelled".to_string());
                }
                _ = deadline_reached(deadline) => {
                    break Some(format!("Build timed out after {} minute(s)", timeout_minutes));
                }
            }
        };

        if let Some(reason) = &interrupted {
            warn!("{}; aborting running stages", reason);
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                // Stages that finished before the abort keep their result
                if let Ok((stage_id, result)) = joined {
                    self.finish_stage(pipeline, context, &stage_id, result);
                }
            }
        }

        for stage_id in running_ids(pipeline) {
            let started_at = Utc::now();
            let Some(stage) = pipeline.stage_mut(&stage_id) else {
                continue;
            };
            match &interrupted {
                Some(reason) => {
                    stage.state = StageState::Cancelled {
                        reason: reason.clone(),
                    };
                    self.emit_event(ExecutionEvent::StageCancelled {
                        stage_id,
                        reason: reason.clone(),
                    });
                }
                None => {
                    let error = "Stage task ended without a result".to_string();
                    stage.state = StageState::Failed {
                        error: error.clone(),
                        exit_code: None,
                        tolerated: stage.continue_on_error,
                        started_at,
                        failed_at: Utc::now(),
                    };
                    self.emit_event(ExecutionEvent::StageFailed {
                        stage_id,
                        error,
                        exit_code: None,
                        tolerated: stage.continue_on_error,
                    });
                }
            }
        }

        let stalled = if interrupted.is_none() && !halted && !pipeline.has_failed() {
            pipeline
                .execution_order()
                .iter()
                .filter(|id| {
                    pipeline
                        .stage(id)
                        .is_some_and(|s| matches!(s.state, StageState::Pending))
                })
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let reason = match &interrupted {
            Some(reason) => reason.as_str(),
            None if stalled.is_empty() => "an earlier stage failed",
            None => "dependencies can never be satisfied",
        };
        for stage_id in pipeline.skip_pending(reason) {
            self.emit_event(ExecutionEvent::StageSkipped {
                stage_id,
                reason: reason.to_string(),
            });
        }
        self.update_state_counts(pipeline);

        Ok(MainOutcome {
            interrupted,
            stalled,
        })
    }

    /// Post stages run one after the other and cannot be cancelled
    async fn run_post_stages(
        &self,
        pipeline: &mut Pipeline,
        context: &mut BuildContext,
    ) -> Result<(), EngineError> {
        let ids: Vec<String> = pipeline.post.iter().map(|s| s.id.clone()).collect();
        for stage_id in ids {
            let stage = self.start_stage(pipeline, &stage_id)?;
            let result = self.executor.execute(&stage, context).await;
            self.finish_stage(pipeline, context, &stage_id, result);
        }
        Ok(())
    }

    fn start_stage(&self, pipeline: &mut Pipeline, stage_id: &str) -> Result<Stage, EngineError> {
        let stage = pipeline
            .stage_mut(stage_id)
            .ok_or_else(|| EngineError::UnknownStage(stage_id.to_string()))?;
        stage.state = StageState::Running {
            started_at: Utc::now(),
        };
        let snapshot = stage.clone();

        self.emit_event(ExecutionEvent::StageStarted {
            stage_id: snapshot.id.clone(),
            name: snapshot.name.clone(),
        });
        self.update_state_counts(pipeline);

        Ok(snapshot)
    }

    /// Record a stage result and apply its context changes
    fn finish_stage(
        &self,
        pipeline: &mut Pipeline,
        context: &mut BuildContext,
        stage_id: &str,
        result: ExecutionResult,
    ) {
        if !result.log().is_empty() {
            self.emit_event(ExecutionEvent::StageOutput {
                stage_id: stage_id.to_string(),
                lines: result.log().to_vec(),
            });
        }

        let Some(stage) = pipeline.stage_mut(stage_id) else {
            warn!("Result for unknown stage {}", stage_id);
            return;
        };
        let started_at = match &stage.state {
            StageState::Running { started_at } => *started_at,
            _ => Utc::now(),
        };

        let event = match result {
            ExecutionResult::Success {
                summary, changes, ..
            } => {
                for change in &changes {
                    context.apply(change);
                }
                stage.state = StageState::Succeeded {
                    summary: summary.clone(),
                    started_at,
                    completed_at: Utc::now(),
                };
                ExecutionEvent::StageCompleted {
                    stage_id: stage_id.to_string(),
                    summary,
                }
            }
            ExecutionResult::Skipped { reason, .. } => {
                stage.state = StageState::Skipped {
                    reason: reason.clone(),
                };
                ExecutionEvent::StageSkipped {
                    stage_id: stage_id.to_string(),
                    reason,
                }
            }
            ExecutionResult::Failed {
                error, exit_code, ..
            } => {
                let tolerated = stage.continue_on_error;
                if tolerated {
                    warn!("Stage {} failed; continuing because it is non-fatal", stage_id);
                }
                stage.state = StageState::Failed {
                    error: error.clone(),
                    exit_code,
                    tolerated,
                    started_at,
                    failed_at: Utc::now(),
                };
                ExecutionEvent::StageFailed {
                    stage_id: stage_id.to_string(),
                    error,
                    exit_code,
                    tolerated,
                }
            }
        };

        self.emit_event(event);
        self.update_state_counts(pipeline);
    }

    /// Update pipeline state counts (main stages only)
    fn update_state_counts(&self, pipeline: &mut Pipeline) {
        let mut completed = 0;
        let mut failed = 0;
        let mut running = 0;

        for stage in pipeline.stages.values() {
            match &stage.state {
                StageState::Succeeded { .. } | StageState::Skipped { .. } => completed += 1,
                StageState::Failed { .. } => failed += 1,
                StageState::Running { .. } => running += 1,
                _ => {}
            }
        }

        pipeline.state.update_counts(completed, failed, running);
    }
}

fn running_ids(pipeline: &Pipeline) -> Vec<String> {
    pipeline.running_stages().iter().map(|s| s.id.clone()).collect()
}

/// Resolves once cancellation is requested; never, without a receiver
async fn cancel_requested(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(receiver) = cancel {
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                break;
            }
        }
    }
    std::future::pending::<()>().await
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;
    use crate::execution::runner::ProcessRunner;
    use crate::vcs::GitCli;
    use std::time::Duration;

    fn engine(strategy: SchedulingStrategy) -> ExecutionEngine<ProcessRunner> {
        ExecutionEngine::new(ProcessRunner::new(), Arc::new(GitCli::new()), strategy)
    }

    fn collect_events(engine: &ExecutionEngine<ProcessRunner>) -> Arc<Mutex<Vec<ExecutionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.add_event_handler(move |event| sink.lock().unwrap().push(event));
        events
    }

    #[tokio::test]
    async fn test_execute_shell_pipeline() {
        let yaml = r#"
name: "Shell"
stages:
  - id: "a"
    shell: { commands: ["true"] }
  - id: "b"
    depends_on: ["a"]
    shell: { commands: ["true"] }
"#;
        let mut pipeline = PipelineConfig::from_yaml(yaml).unwrap().to_pipeline();
        let dir = tempfile::tempdir().unwrap();
        let mut context = pipeline.create_context(dir.path());

        let engine = engine(SchedulingStrategy::Sequential);
        let events = collect_events(&engine);

        let status = engine.execute(&mut pipeline, &mut context).await.unwrap();
        assert_eq!(status, ExecutionStatus::Completed);
        assert!(pipeline.is_complete());
        assert_eq!(pipeline.state.completed_stages, 2);

        let events = events.lock().unwrap();
        assert!(matches!(events.first(), Some(ExecutionEvent::PipelineStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::PipelineCompleted {
                status: ExecutionStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_global_timeout_cancels_and_runs_post() {
        let yaml = r#"
name: "Slow"
stages:
  - id: "slow"
    shell: { commands: ["sleep 5"] }
  - id: "after"
    depends_on: ["slow"]
    shell: { commands: ["true"] }
post:
  - id: "post"
    shell: { commands: ["true"] }
"#;
        let mut pipeline = PipelineConfig::from_yaml(yaml).unwrap().to_pipeline();
        pipeline.timeout = Some(Duration::from_millis(200));
        let dir = tempfile::tempdir().unwrap();
        let mut context = pipeline.create_context(dir.path());

        let status = engine(SchedulingStrategy::Parallel)
            .execute(&mut pipeline, &mut context)
            .await
            .unwrap();

        assert_eq!(status, ExecutionStatus::Cancelled);
        assert!(matches!(
            pipeline.stage("slow").unwrap().state,
            StageState::Cancelled { .. }
        ));
        assert!(matches!(
            pipeline.stage("after").unwrap().state,
            StageState::Skipped { .. }
        ));
        assert!(matches!(
            pipeline.stage("post").unwrap().state,
            StageState::Succeeded { .. }
        ));
    }
}
