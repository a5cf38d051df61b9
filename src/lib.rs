//! pyci - a CI pipeline for Python projects
//!
//! A build resets the workspace, works out which source files changed,
//! provisions a virtualenv, then runs the unit tests and the linter side
//! by side. Reports are published whatever happened before.

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod stages;
pub mod vcs;

// Re-export commonly used types
pub use core::{BuildContext, ExecutionStatus, Pipeline, Stage, StageState};
pub use execution::{
    CommandRunner, ExecutionEngine, ExecutionEvent, ProcessRunner, SchedulingStrategy,
};
pub use vcs::{GitCli, Vcs};
