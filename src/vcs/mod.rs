//! Version control access
//!
//! The build only needs a handful of git plumbing calls. They sit behind
//! the [`Vcs`] trait so the resolver and the stages can be tested without
//! a repository.

pub mod git;
pub mod relevant_files;
pub mod resolver;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use git::GitCli;
pub use relevant_files::{
    candidate_files, read_relevant_files, resolve_relevant_files, write_relevant_files,
    RelevantFiles,
};
pub use resolver::{RefResolver, RefStrategy, ResolvedRef};

/// Error types for version control operations
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("`git {args}` exited with code {code}: {stderr}")]
    Command {
        args: String,
        code: i32,
        stderr: String,
    },

    #[error("Failed to scan {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Trait for version control access - allows for different implementations
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Resolve `rev` to a commit id; `None` when it does not name a commit
    async fn rev_parse(&self, workdir: &Path, rev: &str) -> Result<Option<String>, VcsError>;

    /// Commit ids of the decorated, simplified history, newest first
    async fn decorated_commits(&self, workdir: &Path) -> Result<Vec<String>, VcsError>;

    /// Paths among `paths` that differ between `lhs` and `rhs`
    async fn changed_files(
        &self,
        workdir: &Path,
        lhs: &str,
        rhs: &str,
        paths: &[String],
    ) -> Result<Vec<String>, VcsError>;

    /// Remove untracked and ignored files, except `keep`
    async fn clean(&self, workdir: &Path, keep: &[String]) -> Result<(), VcsError>;
}
