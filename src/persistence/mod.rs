//! Persistence layer for build history and retention

pub mod retention;
#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteBuildStore;

pub use crate::core::ExecutionStatus;
use crate::core::{Pipeline, StageState};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Result of one stage, as stored in history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage_id: String,
    pub name: String,
    /// `SUCCESS`, `FAILURE`, `FAILURE (tolerated)`, `SKIPPED`, `ABORTED`...
    pub result: String,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub post: bool,
}

/// Summary of one build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    pub build_id: String,

    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Final status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed (if complete)
    pub completed_at: Option<DateTime<Utc>>,

    /// Succeeded or skipped main stages
    pub completed_stages: usize,

    /// Failed main stages, tolerated ones included
    pub failed_stages: usize,

    /// Total number of main stages
    pub total_stages: usize,

    /// Every stage, main stages first
    pub stages: Vec<StageRecord>,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a build
    async fn save_build(&self, build: &BuildSummary) -> Result<()>;

    /// Load a build by its build id
    async fn load_build(&self, build_id: &str) -> Result<Option<BuildSummary>>;

    /// Builds of a pipeline, newest first
    async fn list_builds(&self, pipeline_name: &str) -> Result<Vec<BuildSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;

    /// Drop all but the newest `keep + 1` builds of a pipeline; returns how
    /// many were removed
    async fn prune(&self, pipeline_name: &str, keep: usize) -> Result<usize>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    builds: RwLock<HashMap<String, BuildSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_build(&self, build: &BuildSummary) -> Result<()> {
        let mut builds = self.builds.write().await;
        builds.insert(build.build_id.clone(), build.clone());
        Ok(())
    }

    async fn load_build(&self, build_id: &str) -> Result<Option<BuildSummary>> {
        let builds = self.builds.read().await;
        Ok(builds.get(build_id).cloned())
    }

    async fn list_builds(&self, pipeline_name: &str) -> Result<Vec<BuildSummary>> {
        let builds = self.builds.read().await;
        let mut result: Vec<BuildSummary> = builds
            .values()
            .filter(|b| b.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.build_id.cmp(&a.build_id)));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let builds = self.builds.read().await;
        let mut names: Vec<String> = builds.values().map(|b| b.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn prune(&self, pipeline_name: &str, keep: usize) -> Result<usize> {
        let stale: Vec<String> = self
            .list_builds(pipeline_name)
            .await?
            .into_iter()
            .skip(keep + 1)
            .map(|b| b.build_id)
            .collect();

        let mut builds = self.builds.write().await;
        for build_id in &stale {
            builds.remove(build_id);
        }
        Ok(stale.len())
    }
}

fn stage_record(stage: &crate::core::Stage, post: bool) -> StageRecord {
    StageRecord {
        stage_id: stage.id.clone(),
        name: stage.name.clone(),
        result: stage.state.label().to_string(),
        detail: stage.state.detail().map(str::to_string),
        exit_code: match &stage.state {
            StageState::Failed { exit_code, .. } => *exit_code,
            _ => None,
        },
        post,
    }
}

/// Create a summary from a finished pipeline
pub fn create_summary(pipeline: &Pipeline, build_id: &str) -> BuildSummary {
    let post_ids: Vec<&str> = pipeline.post.iter().map(|s| s.id.as_str()).collect();

    BuildSummary {
        build_id: build_id.to_string(),
        execution_id: pipeline.state.execution_id,
        pipeline_name: pipeline.name.clone(),
        status: pipeline.state.status,
        started_at: pipeline.state.started_at.unwrap_or(pipeline.state.created_at),
        completed_at: pipeline.state.completed_at,
        completed_stages: pipeline.state.completed_stages,
        failed_stages: pipeline.state.failed_stages,
        total_stages: pipeline.state.total_stages,
        stages: pipeline
            .ordered_stages()
            .into_iter()
            .map(|s| stage_record(s, post_ids.contains(&s.id.as_str())))
            .collect(),
    }
}
