//! Relevant files - the changed sources that scope the lint run

use crate::core::BuildContext;
use crate::vcs::{RefResolver, ResolvedRef, Vcs, VcsError};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Outcome of a relevant-files computation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevantFiles {
    pub lhs: Option<ResolvedRef>,
    pub rhs: Option<ResolvedRef>,
    /// Changed files, in git's order, without duplicates
    pub files: Vec<String>,
}

impl RelevantFiles {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// One path per line; an empty list is an empty file
    pub fn to_file_contents(&self) -> String {
        self.files.iter().map(|f| format!("{}\n", f)).collect()
    }
}

/// Working-tree files under `source_dir` whose workspace-relative path
/// matches `pattern`, sorted.
pub fn candidate_files(
    workspace: &Path,
    source_dir: &str,
    pattern: &Regex,
) -> Result<Vec<String>, VcsError> {
    let root = workspace.join(source_dir);
    let mut found = Vec::new();

    if root.is_dir() {
        walk(workspace, &root, pattern, &mut found)?;
    } else {
        debug!("Source directory {} does not exist", root.display());
    }

    found.sort();
    Ok(found)
}

fn walk(workspace: &Path, dir: &Path, pattern: &Regex, found: &mut Vec<String>) -> Result<(), VcsError> {
    let scan_error = |source| VcsError::Workspace {
        path: dir.to_path_buf(),
        source,
    };

    for entry in std::fs::read_dir(dir).map_err(scan_error)? {
        let entry = entry.map_err(scan_error)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(scan_error)?;

        if file_type.is_dir() {
            walk(workspace, &path, pattern, found)?;
            continue;
        }

        let relative = path
            .strip_prefix(workspace)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if pattern.is_match(&relative) {
            found.push(relative);
        }
    }

    Ok(())
}

/// Resolve both sides of the diff and list the changed candidate files.
///
/// When either side stays unresolved, the result is empty.
pub async fn resolve_relevant_files(
    vcs: &dyn Vcs,
    context: &BuildContext,
    source_dir: &str,
    pattern: &Regex,
    remote: &str,
) -> Result<RelevantFiles, VcsError> {
    let workdir = context.workspace.as_path();

    let lhs = RefResolver::lhs(context.change_target.as_deref(), remote)
        .resolve(vcs, workdir)
        .await?;
    let rhs = RefResolver::rhs(context.branch_name.as_deref(), remote)
        .resolve(vcs, workdir)
        .await?;

    info!(
        "LHS={} RHS={}",
        lhs.as_ref().map(|r| r.rev.as_str()).unwrap_or("null"),
        rhs.as_ref().map(|r| r.rev.as_str()).unwrap_or("null"),
    );

    let (Some(left), Some(right)) = (&lhs, &rhs) else {
        return Ok(RelevantFiles {
            lhs,
            rhs,
            files: Vec::new(),
        });
    };

    let candidates = candidate_files(workdir, source_dir, pattern)?;
    if candidates.is_empty() {
        // An empty pathspec would make git list every change
        info!("No files under {} match {}", source_dir, pattern.as_str());
        return Ok(RelevantFiles {
            lhs,
            rhs,
            files: Vec::new(),
        });
    }

    let allowed: HashSet<&str> = candidates.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let files: Vec<String> = vcs
        .changed_files(workdir, &left.rev, &right.rev, &candidates)
        .await?
        .into_iter()
        .filter(|f| allowed.contains(f.as_str()))
        .filter(|f| seen.insert(f.clone()))
        .collect();

    info!("{} relevant file(s) between {} and {}", files.len(), left.rev, right.rev);

    Ok(RelevantFiles { lhs, rhs, files })
}

/// Write the list, creating parent directories
pub fn write_relevant_files(path: &Path, relevant: &RelevantFiles) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, relevant.to_file_contents())
}

/// Read a list written by [`write_relevant_files`]. A missing file is an
/// empty list.
pub fn read_relevant_files(path: &Path) -> std::io::Result<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
