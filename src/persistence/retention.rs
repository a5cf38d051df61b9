//! Retention of build logs and published report sets
//!
//! Entries are named after build ids, which sort chronologically. Keeping
//! `keep` prior builds means keeping the newest `keep + 1` entries: the
//! current build plus its predecessors.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a retention sweep looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Sub-directories (published report sets)
    Directories,
    /// Regular files with this extension (build logs)
    Files(&'static str),
}

impl EntryKind {
    fn matches(&self, path: &Path) -> bool {
        match self {
            EntryKind::Directories => path.is_dir(),
            EntryKind::Files(ext) => {
                path.is_file() && path.extension().is_some_and(|e| e == *ext)
            }
        }
    }
}

/// Delete all but the newest `keep + 1` entries of `kind` in `dir`.
///
/// Returns the removed paths. A missing directory is not an error.
pub fn prune_entries(dir: &Path, kind: EntryKind, keep: usize) -> io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut matching = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if kind.matches(&path) {
            matching.push(path);
        }
    }

    // Newest first
    matching.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = Vec::new();
    for path in matching.into_iter().skip(keep + 1) {
        debug!("Pruning {}", path.display());
        match kind {
            EntryKind::Directories => std::fs::remove_dir_all(&path)?,
            EntryKind::Files(_) => std::fs::remove_file(&path)?,
        }
        removed.push(path);
    }

    if !removed.is_empty() {
        info!("Pruned {} old entries from {}", removed.len(), dir.display());
    }

    Ok(removed)
}
