//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall build status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Build has not started
    Pending,
    /// Build is currently running
    Running,
    /// Build completed successfully (tolerated stage failures included)
    Completed,
    /// A fatal stage failed
    Failed,
    /// Build was aborted by a signal or the global timeout
    Cancelled,
}

impl ExecutionStatus {
    /// Parse the `Debug` representation stored by the persistence layer
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Pending" => Some(ExecutionStatus::Pending),
            "Running" => Some(ExecutionStatus::Running),
            "Completed" => Some(ExecutionStatus::Completed),
            "Failed" => Some(ExecutionStatus::Failed),
            "Cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// State of a single stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageState {
    /// Stage is waiting for its dependencies
    Pending,
    /// Stage is currently running
    Running {
        started_at: DateTime<Utc>,
    },
    /// Stage finished successfully
    Succeeded {
        summary: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Stage failed. `tolerated` failures come from `continue_on_error`
    /// stages and do not affect the build result.
    Failed {
        error: String,
        exit_code: Option<i32>,
        tolerated: bool,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Stage did not run, or ran and decided there was nothing to do
    Skipped {
        reason: String,
    },
    /// Stage was interrupted while running
    Cancelled {
        reason: String,
    },
}

impl StageState {
    /// Check if stage is in a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageState::Pending | StageState::Running { .. })
    }

    /// A failure that fails the whole build
    pub fn is_fatal_failure(&self) -> bool {
        matches!(self, StageState::Failed { tolerated: false, .. })
    }

    /// Whether stages depending on this one may start
    pub fn satisfies_dependents(&self) -> bool {
        matches!(
            self,
            StageState::Succeeded { .. }
                | StageState::Skipped { .. }
                | StageState::Failed { tolerated: true, .. }
        )
    }

    /// Short result label, in the vocabulary of CI hosts
    pub fn label(&self) -> &'static str {
        match self {
            StageState::Pending => "PENDING",
            StageState::Running { .. } => "RUNNING",
            StageState::Succeeded { .. } => "SUCCESS",
            StageState::Failed { tolerated: true, .. } => "FAILURE (tolerated)",
            StageState::Failed { .. } => "FAILURE",
            StageState::Skipped { .. } => "SKIPPED",
            StageState::Cancelled { .. } => "ABORTED",
        }
    }

    /// Human-readable detail (summary, error or reason)
    pub fn detail(&self) -> Option<&str> {
        match self {
            StageState::Succeeded { summary, .. } => Some(summary),
            StageState::Failed { error, .. } => Some(error),
            StageState::Skipped { reason } | StageState::Cancelled { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Overall build state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When the state was created
    pub created_at: DateTime<Utc>,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of stages (post stages excluded)
    pub total_stages: usize,

    /// Number of succeeded or skipped stages
    pub completed_stages: usize,

    /// Number of failed stages, tolerated ones included
    pub failed_stages: usize,

    /// Number of currently running stages
    pub running_stages: usize,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            total_stages: 0,
            completed_stages: 0,
            failed_stages: 0,
            running_stages: 0,
        }
    }

    /// Sortable build identifier used for log and report directories
    pub fn build_id(&self) -> String {
        let id = self.execution_id.to_string();
        format!("{}-{}", self.created_at.format("%Y%m%d-%H%M%S"), &id[..8])
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_stages: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_stages = total_stages;
    }

    /// Mark pipeline as finished with the given status
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Update stage counts
    pub fn update_counts(&mut self, completed: usize, failed: usize, running: usize) {
        self.completed_stages = completed;
        self.failed_stages = failed;
        self.running_stages = running;
    }

    /// Calculate progress percentage (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        (self.completed_stages + self.failed_stages) as f64 / self.total_stages as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
