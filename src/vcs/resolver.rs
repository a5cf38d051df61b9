//! Commit reference resolution
//!
//! Each side of the diff is resolved by an ordered chain of strategies.
//! The first strategy that yields a non-empty revision wins.
//!
//! LHS: `<remote>/<CHANGE_TARGET>`, then the literal `CHANGE_TARGET`, then
//! the second entry of the decorated, simplified log.
//! RHS: `<remote>/<BRANCH_NAME>`, then the literal `BRANCH_NAME`, then `HEAD`.

use crate::vcs::{Vcs, VcsError};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// A revision and the strategy that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub rev: String,
    pub strategy: &'static str,
}

/// One link of a resolution chain
#[async_trait]
pub trait RefStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` passes control to the next strategy
    async fn resolve(&self, vcs: &dyn Vcs, workdir: &Path) -> Result<Option<String>, VcsError>;
}

/// The remote-tracking commit of a branch
pub struct RemoteTracking {
    remote: String,
    branch: Option<String>,
}

impl RemoteTracking {
    pub fn new(remote: impl Into<String>, branch: Option<&str>) -> Self {
        Self {
            remote: remote.into(),
            branch: branch.map(str::to_string),
        }
    }
}

#[async_trait]
impl RefStrategy for RemoteTracking {
    fn name(&self) -> &'static str {
        "remote-tracking"
    }

    async fn resolve(&self, vcs: &dyn Vcs, workdir: &Path) -> Result<Option<String>, VcsError> {
        match &self.branch {
            Some(branch) => {
                vcs.rev_parse(workdir, &format!("{}/{}", self.remote, branch))
                    .await
            }
            None => Ok(None),
        }
    }
}

/// The branch name as given; git reports bad names at diff time
pub struct LiteralName {
    name: Option<String>,
}

impl LiteralName {
    pub fn new(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
        }
    }
}

#[async_trait]
impl RefStrategy for LiteralName {
    fn name(&self) -> &'static str {
        "literal"
    }

    async fn resolve(&self, _vcs: &dyn Vcs, _workdir: &Path) -> Result<Option<String>, VcsError> {
        Ok(self.name.clone())
    }
}

/// Second-most-recent commit of `git log --simplify-by-decoration`.
///
/// Approximates the nearest ancestor carrying a branch or tag; it is not
/// a merge-base.
pub struct NearestDecorated;

#[async_trait]
impl RefStrategy for NearestDecorated {
    fn name(&self) -> &'static str {
        "nearest-decorated"
    }

    async fn resolve(&self, vcs: &dyn Vcs, workdir: &Path) -> Result<Option<String>, VcsError> {
        let commits = vcs.decorated_commits(workdir).await?;
        Ok(commits.into_iter().nth(1))
    }
}

/// The checked-out commit
pub struct CurrentHead;

#[async_trait]
impl RefStrategy for CurrentHead {
    fn name(&self) -> &'static str {
        "head"
    }

    async fn resolve(&self, _vcs: &dyn Vcs, _workdir: &Path) -> Result<Option<String>, VcsError> {
        Ok(Some("HEAD".to_string()))
    }
}

/// Ordered chain of strategies for one side of the diff
pub struct RefResolver {
    side: &'static str,
    strategies: Vec<Box<dyn RefStrategy>>,
}

impl RefResolver {
    pub fn new(side: &'static str) -> Self {
        Self {
            side,
            strategies: Vec::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: impl RefStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Chain for the base of the diff
    pub fn lhs(change_target: Option<&str>, remote: &str) -> Self {
        Self::new("LHS")
            .with_strategy(RemoteTracking::new(remote, change_target))
            .with_strategy(LiteralName::new(change_target))
            .with_strategy(NearestDecorated)
    }

    /// Chain for the head of the diff
    pub fn rhs(branch_name: Option<&str>, remote: &str) -> Self {
        Self::new("RHS")
            .with_strategy(RemoteTracking::new(remote, branch_name))
            .with_strategy(LiteralName::new(branch_name))
            .with_strategy(CurrentHead)
    }

    pub fn side(&self) -> &'static str {
        self.side
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in turn
    pub async fn resolve(
        &self,
        vcs: &dyn Vcs,
        workdir: &Path,
    ) -> Result<Option<ResolvedRef>, VcsError> {
        for strategy in &self.strategies {
            if let Some(rev) = strategy.resolve(vcs, workdir).await? {
                let rev = rev.trim().to_string();
                if rev.is_empty() {
                    continue;
                }
                debug!("{} resolved to {} via {}", self.side, rev, strategy.name());
                return Ok(Some(ResolvedRef {
                    rev,
                    strategy: strategy.name(),
                }));
            }
        }

        debug!("{} did not resolve", self.side);
        Ok(None)
    }
}
