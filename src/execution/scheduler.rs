//! Execution scheduler - determines which stages to run next

use crate::core::Pipeline;

/// Strategy for scheduling stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute stages in dependency order, one at a time
    Sequential,

    /// Execute all ready stages in parallel
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent stages)
    LimitedParallel(usize),
}

/// Scheduler for determining which stages to run
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Get the next batch of stages to start
    pub fn next_stages(&self, pipeline: &Pipeline) -> Vec<String> {
        match self.strategy {
            SchedulingStrategy::Sequential => self.next_limited(pipeline, 1),
            SchedulingStrategy::Parallel => self.next_parallel(pipeline),
            SchedulingStrategy::LimitedParallel(max) => self.next_limited(pipeline, max.max(1)),
        }
    }

    fn next_parallel(&self, pipeline: &Pipeline) -> Vec<String> {
        pipeline.ready_stages().iter().map(|s| s.id.clone()).collect()
    }

    fn next_limited(&self, pipeline: &Pipeline, max: usize) -> Vec<String> {
        let running_count = pipeline.running_stages().len();
        let remaining = max.saturating_sub(running_count);

        if remaining == 0 {
            return vec![];
        }

        pipeline
            .ready_stages()
            .into_iter()
            .take(remaining)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Check if there are more stages to start
    pub fn has_more(&self, pipeline: &Pipeline) -> bool {
        !self.next_stages(pipeline).is_empty()
    }
}
