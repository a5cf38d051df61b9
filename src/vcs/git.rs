//! git CLI client - calls git as a subprocess

use crate::vcs::{Vcs, VcsError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};

/// Keeps `git diff` argv well under common ARG_MAX limits
const DIFF_BATCH: usize = 500;

/// Client for executing git as a subprocess
#[derive(Debug, Clone)]
pub struct GitCli {
    /// Path to git executable
    git_path: String,
}

impl GitCli {
    /// Create a client for the `git` found on PATH
    pub fn new() -> Self {
        Self::with_path("git")
    }

    /// Create a client for a specific git executable
    pub fn with_path(git_path: impl Into<String>) -> Self {
        Self {
            git_path: git_path.into(),
        }
    }

    pub fn git_path(&self) -> &str {
        &self.git_path
    }

    async fn output<I, S>(&self, workdir: &Path, args: I) -> Result<Output, VcsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let output = Command::new(&self.git_path)
            .args(args)
            .current_dir(workdir)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    /// Run git and require a zero exit
    async fn checked(&self, workdir: &Path, args: &[String]) -> Result<String, VcsError> {
        debug!("git {}", args.join(" "));
        let output = self.output(workdir, args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            warn!("git exited with code {}: {}", code, stderr);
            return Err(VcsError::Command {
                args: args.join(" "),
                code,
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

fn nul_separated(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split('\0')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Vcs for GitCli {
    async fn rev_parse(&self, workdir: &Path, rev: &str) -> Result<Option<String>, VcsError> {
        let spec = format!("{}^{{commit}}", rev);
        let output = self
            .output(workdir, ["rev-parse", "--verify", "--quiet", spec.as_str()])
            .await?;

        if !output.status.success() {
            debug!("{} does not resolve to a commit", rev);
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let commit = non_empty_lines(&stdout).next();
        Ok(commit)
    }

    async fn decorated_commits(&self, workdir: &Path) -> Result<Vec<String>, VcsError> {
        let output = self
            .output(
                workdir,
                [
                    "log",
                    "--decorate",
                    "--simplify-by-decoration",
                    "--pretty=format:%H",
                ],
            )
            .await?;

        // A repository without commits has no history to walk
        if !output.status.success() {
            debug!(
                "git log failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let commits = non_empty_lines(&stdout).collect();
        Ok(commits)
    }

    async fn changed_files(
        &self,
        workdir: &Path,
        lhs: &str,
        rhs: &str,
        paths: &[String],
    ) -> Result<Vec<String>, VcsError> {
        let mut changed = Vec::new();

        for batch in paths.chunks(DIFF_BATCH) {
            // Names come back NUL separated and unquoted, relative to `workdir`
            let mut args = vec![
                "diff".to_string(),
                "--name-only".to_string(),
                "--relative".to_string(),
                "-z".to_string(),
                lhs.to_string(),
                rhs.to_string(),
                "--".to_string(),
            ];
            args.extend(batch.iter().cloned());

            let stdout = self.checked(workdir, &args).await?;
            changed.extend(nul_separated(&stdout));
        }

        Ok(changed)
    }

    async fn clean(&self, workdir: &Path, keep: &[String]) -> Result<(), VcsError> {
        let mut args = vec!["clean".to_string(), "-ffdx".to_string()];
        for path in keep {
            args.push("-e".to_string());
            args.push(path.clone());
        }
        self.checked(workdir, &args).await.map(|_| ())
    }
}
