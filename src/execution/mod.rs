//! Build execution: subprocesses, single stages, and the whole pipeline

pub mod engine;
pub mod executor;
pub mod runner;
pub mod scheduler;

pub use engine::{EngineError, EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{ExecutionResult, StageExecutor};
pub use runner::{
    CommandOutput, CommandRunner, OutputSink, OutputStream, ProcessRunner, RunnerError,
    ShellCommand,
};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
