//! Stage domain model

use crate::core::{
    config::{StageConfig, StageKind},
    state::StageState,
};
use std::collections::HashSet;
use std::time::Duration;

/// A single stage in a pipeline
#[derive(Debug, Clone)]
pub struct Stage {
    /// Unique stage identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// What the stage does
    pub kind: StageKind,

    /// List of stage IDs this stage depends on
    pub dependencies: Vec<String>,

    /// A failure is recorded but does not fail the build
    pub continue_on_error: bool,

    /// Timeout for each command, in seconds
    pub timeout_secs: u64,

    /// Runtime state
    pub state: StageState,
}

/// Values inherited from the pipeline when a stage does not set them
#[derive(Debug, Clone, Copy)]
pub struct StageDefaults {
    pub timeout_secs: u64,
    pub keep_artifacts: usize,
}

impl Default for StageDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 3600,
            keep_artifacts: 1,
        }
    }
}

impl Stage {
    /// Create a stage from a stage config
    pub fn from_config(config: &StageConfig, defaults: &StageDefaults) -> Self {
        let mut kind = config.kind.clone();
        if let StageKind::Publish(publish) = &mut kind {
            publish.keep.get_or_insert(defaults.keep_artifacts);
        }

        Stage {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            description: config.description.clone(),
            kind,
            dependencies: config.depends_on.clone(),
            continue_on_error: config.continue_on_error,
            timeout_secs: config.timeout_secs.unwrap_or(defaults.timeout_secs),
            state: StageState::Pending,
        }
    }

    /// Check if every dependency finished in a state that lets this stage run
    pub fn dependencies_met(&self, satisfied: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| satisfied.contains(dep))
    }

    /// Whether a failure of this stage fails the build
    pub fn is_fatal(&self) -> bool {
        !self.continue_on_error
    }

    /// Per-command timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
