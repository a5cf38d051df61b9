//! Report publishing
//!
//! Copies the report files of a build into `<publish_dir>/<build_id>/`,
//! writes an index page and a manifest, then prunes older report sets.

use crate::core::config::PublishConfig;
use crate::persistence::retention::{prune_entries, EntryKind};
use crate::stages::{StageError, StageOutcome, StageRun};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// `manifest.json` of a published report set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishManifest {
    pub build_id: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    /// Files copied into the set
    pub files: Vec<String>,
    /// Expected files that did not exist
    pub missing: Vec<String>,
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Index page linking every published file
pub fn render_index(manifest: &PublishManifest) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!(
        "<title>{} - {}</title>\n</head>\n<body>\n",
        escape_html(&manifest.title),
        escape_html(&manifest.build_id)
    ));
    html.push_str(&format!(
        "<h1>{}</h1>\n<p>Build {} published {}</p>\n<ul>\n",
        escape_html(&manifest.title),
        escape_html(&manifest.build_id),
        manifest.published_at.to_rfc3339()
    ));
    for file in &manifest.files {
        let file = escape_html(file);
        html.push_str(&format!("  <li><a href=\"{0}\">{0}</a></li>\n", file));
    }
    html.push_str("</ul>\n");
    if !manifest.missing.is_empty() {
        html.push_str("<p>Not produced:</p>\n<ul>\n");
        for file in &manifest.missing {
            html.push_str(&format!("  <li>{}</li>\n", escape_html(file)));
        }
        html.push_str("</ul>\n");
    }
    html.push_str("</body>\n</html>\n");
    html
}

fn copy_report(source: &Path, target: &Path) -> Result<(), StageError> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StageError::io(parent, e))?;
    }
    std::fs::copy(source, target).map_err(|e| StageError::io(source, e))?;
    Ok(())
}

/// Directory a build's reports are published into
fn publish_target(run: &StageRun<'_>, config: &PublishConfig) -> PathBuf {
    let build_id = if run.context.build_id.is_empty() {
        "latest"
    } else {
        run.context.build_id.as_str()
    };
    run.context.resolve_path(&config.publish_dir).join(build_id)
}

pub async fn publish_reports(run: &mut StageRun<'_>, config: &PublishConfig) -> Result<StageOutcome, StageError> {
    let report_dir = run.context.resolve_path(&config.report_dir);
    if !report_dir.is_dir() {
        return Err(StageError::MissingReportDir(report_dir));
    }

    let target = publish_target(run, config);
    std::fs::create_dir_all(&target).map_err(|e| StageError::io(&target, e))?;

    let mut files = Vec::new();
    let mut missing = Vec::new();
    for name in &config.files {
        let name = run.context.render(name);
        let source = report_dir.join(&name);
        if source.is_file() {
            copy_report(&source, &target.join(&name))?;
            files.push(name);
        } else {
            warn!("Report file {} is missing", source.display());
            missing.push(name);
        }
    }

    if !missing.is_empty() && !config.allow_missing {
        return Err(StageError::MissingReports(missing));
    }

    let manifest = PublishManifest {
        build_id: run.context.build_id.clone(),
        title: run.context.render(&config.title),
        published_at: Utc::now(),
        files,
        missing,
    };

    let manifest_path = target.join("manifest.json");
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .map_err(|e| StageError::io(&manifest_path, e))?;

    let index_path = target.join("index.html");
    std::fs::write(&index_path, render_index(&manifest)).map_err(|e| StageError::io(&index_path, e))?;

    let published = run.context.relative(&target).display().to_string();
    run.note(format!("Published {} report file(s) to {}", manifest.files.len(), published));
    for name in &manifest.missing {
        run.note(format!("  not produced: {}", name));
    }

    if let (Some(keep), Some(root)) = (config.keep, target.parent()) {
        let removed = prune_entries(root, EntryKind::Directories, keep).map_err(|e| StageError::io(root, e))?;
        if !removed.is_empty() {
            run.note(format!("Pruned {} older report set(s)", removed.len()));
        }
    }

    Ok(StageOutcome::Done(format!(
        "{} published, {} missing",
        manifest.files.len(),
        manifest.missing.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BuildContext;
    use crate::execution::runner::ProcessRunner;
    use std::time::Duration;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("pytest.html"), "<html></html>").unwrap();
        std::fs::write(out.join("pylint.json"), "[]").unwrap();
        dir
    }

    fn config() -> PublishConfig {
        PublishConfig {
            report_dir: "out".to_string(),
            files: vec![
                "pytest.html".to_string(),
                "pylint.json".to_string(),
                "combined.svg".to_string(),
            ],
            keep: Some(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_publish_copies_and_tolerates_missing() {
        let dir = workspace();
        let runner = ProcessRunner::new();
        let ctx = BuildContext::new(dir.path()).with_build_id("20240101-000000-abcd1234");
        let mut run = StageRun::new(&runner, ctx, Duration::from_secs(5));

        let outcome = publish_reports(&mut run, &config()).await.unwrap();
        assert_eq!(outcome, StageOutcome::Done("2 published, 1 missing".to_string()));

        let target = dir.path().join(".pyci/reports/20240101-000000-abcd1234");
        assert!(target.join("pytest.html").is_file());
        assert!(target.join("index.html").is_file());

        let manifest: PublishManifest =
            serde_json::from_str(&std::fs::read_to_string(target.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest.files, vec!["pytest.html", "pylint.json"]);
        assert_eq!(manifest.missing, vec!["combined.svg"]);
    }

    #[tokio::test]
    async fn test_publish_strict_mode_fails_on_missing() {
        let dir = workspace();
        let runner = ProcessRunner::new();
        let mut run = StageRun::new(&runner, BuildContext::new(dir.path()), Duration::from_secs(5));

        let strict = PublishConfig {
            allow_missing: false,
            ..config()
        };
        let err = publish_reports(&mut run, &strict).await.unwrap_err();
        assert!(matches!(err, StageError::MissingReports(ref m) if m == &vec!["combined.svg".to_string()]));
    }

    #[tokio::test]
    async fn test_publish_requires_report_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new();
        let mut run = StageRun::new(&runner, BuildContext::new(dir.path()), Duration::from_secs(5));

        let err = publish_reports(&mut run, &config()).await.unwrap_err();
        assert!(matches!(err, StageError::MissingReportDir(_)));
    }

    #[tokio::test]
    async fn test_publish_prunes_older_sets() {
        let dir = workspace();
        let runner = ProcessRunner::new();

        for id in ["20240101-000000-a", "20240102-000000-b", "20240103-000000-c"] {
            let ctx = BuildContext::new(dir.path()).with_build_id(id);
            let mut run = StageRun::new(&runner, ctx, Duration::from_secs(5));
            publish_reports(&mut run, &config()).await.unwrap();
        }

        let root = dir.path().join(".pyci/reports");
        assert!(!root.join("20240101-000000-a").exists());
        assert!(root.join("20240102-000000-b").exists());
        assert!(root.join("20240103-000000-c").exists());
    }

    #[test]
    fn test_index_escapes_names() {
        let manifest = PublishManifest {
            build_id: "b1".to_string(),
            title: "R&D <reports>".to_string(),
            published_at: Utc::now(),
            files: vec!["pytest.html".to_string()],
            missing: vec![],
        };
        let html = render_index(&manifest);
        assert!(html.contains("R&amp;D &lt;reports&gt;"));
        assert!(html.contains("<a href=\"pytest.html\">pytest.html</a>"));
    }
}
