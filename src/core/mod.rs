//! Core domain models
//!
//! This module defines the data structures that describe a build:
//! the pipeline and its stages, their state, and the build context
//! handed from stage to stage.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod stage;
pub mod state;

pub use context::*;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
