//! Pipeline domain model

use crate::core::{
    config::{PipelineConfig, RetentionConfig},
    context::BuildContext,
    stage::{Stage, StageDefaults},
    state::{PipelineState, StageState},
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// A pipeline definition together with its runtime state
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Environment entries, in declaration order
    pub environment: Vec<(String, String)>,

    /// Main stages
    pub stages: HashMap<String, Stage>,

    /// Stages run after everything else, whatever happened before
    pub post: Vec<Stage>,

    /// Execution state
    pub state: PipelineState,

    /// Global build timeout
    pub timeout: Option<Duration>,

    /// Retention policy
    pub retention: RetentionConfig,

    /// Stage execution order (topological sort)
    execution_order: Vec<String>,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let defaults = StageDefaults {
            timeout_secs: config.default_timeout_secs.unwrap_or(3600),
            keep_artifacts: config.retention.keep_artifacts,
        };

        let declared: Vec<String> = config.stages.iter().map(|s| s.id.clone()).collect();

        let stages: HashMap<String, Stage> = config
            .stages
            .iter()
            .map(|stage_config| {
                let stage = Stage::from_config(stage_config, &defaults);
                (stage.id.clone(), stage)
            })
            .collect();

        let post = config
            .post
            .iter()
            .map(|stage_config| Stage::from_config(stage_config, &defaults))
            .collect();

        let execution_order = Self::topological_sort(&declared, &stages);

        Pipeline {
            name: config.name.clone(),
            environment: config.environment(),
            stages,
            post,
            state: PipelineState::new(),
            timeout: config.timeout_minutes.map(|m| Duration::from_secs(m * 60)),
            retention: config.retention,
            execution_order,
        }
    }

    /// Get a stage by ID
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages
            .get(id)
            .or_else(|| self.post.iter().find(|s| s.id == id))
    }

    /// Get a mutable stage by ID
    pub fn stage_mut(&mut self, id: &str) -> Option<&mut Stage> {
        match self.stages.get_mut(id) {
            Some(stage) => Some(stage),
            None => self.post.iter_mut().find(|s| s.id == id),
        }
    }

    /// IDs of stages whose state lets dependents run
    fn satisfied_ids(&self) -> HashSet<String> {
        self.stages
            .values()
            .filter(|s| s.state.satisfies_dependents())
            .map(|s| s.id.clone())
            .collect()
    }

    /// Pending stages whose dependencies are satisfied, in execution order
    pub fn ready_stages(&self) -> Vec<&Stage> {
        let satisfied = self.satisfied_ids();

        self.execution_order
            .iter()
            .filter_map(|id| self.stages.get(id))
            .filter(|s| matches!(s.state, StageState::Pending) && s.dependencies_met(&satisfied))
            .collect()
    }

    /// Get all currently running stages
    pub fn running_stages(&self) -> Vec<&Stage> {
        self.stages
            .values()
            .filter(|s| matches!(s.state, StageState::Running { .. }))
            .collect()
    }

    /// Check if every main stage is in a terminal state
    pub fn is_complete(&self) -> bool {
        self.stages.values().all(|s| s.state.is_terminal())
    }

    /// Check if a fatal failure happened anywhere, post stages included
    pub fn has_failed(&self) -> bool {
        self.stages
            .values()
            .chain(self.post.iter())
            .any(|s| s.state.is_fatal_failure())
    }

    /// Mark every pending main stage as skipped
    pub fn skip_pending(&mut self, reason: &str) -> Vec<String> {
        let mut skipped = Vec::new();
        for id in &self.execution_order {
            if let Some(stage) = self.stages.get_mut(id) {
                if matches!(stage.state, StageState::Pending) {
                    stage.state = StageState::Skipped {
                        reason: reason.to_string(),
                    };
                    skipped.push(id.clone());
                }
            }
        }
        skipped
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Main stages followed by post stages, in execution order
    pub fn ordered_stages(&self) -> Vec<&Stage> {
        self.execution_order
            .iter()
            .filter_map(|id| self.stages.get(id))
            .chain(self.post.iter())
            .collect()
    }

    /// Calculate topological sort of stages, keeping declaration order
    /// wherever dependencies allow it
    fn topological_sort(declared: &[String], stages: &HashMap<String, Stage>) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        for stage_id in declared {
            Self::visit(stage_id, stages, &mut visited, &mut result);
        }

        result
    }

    fn visit(
        stage_id: &str,
        stages: &HashMap<String, Stage>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(stage_id.to_string()) {
            return;
        }

        if let Some(stage) = stages.get(stage_id) {
            for dep in &stage.dependencies {
                Self::visit(dep, stages, visited, result);
            }
        }

        result.push(stage_id.to_string());
    }

    /// Create the build context for a run rooted at `workspace`
    pub fn create_context(&self, workspace: impl Into<PathBuf>) -> BuildContext {
        let mut context = BuildContext::new(workspace).with_build_id(self.state.build_id());
        context.extend_environment(self.environment.clone());
        context
    }
}
