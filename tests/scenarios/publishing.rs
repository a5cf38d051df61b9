//! Report publishing and retention

use crate::helpers::*;
use pyci::core::config::PipelineConfig;
use pyci::core::ExecutionStatus;
use pyci::persistence::{create_summary, InMemoryPersistence, PersistenceBackend};
use pyci::stages::publish::PublishManifest;

#[tokio::test]
async fn test_reports_are_published_with_manifest() {
    let workspace = python_workspace();

    let result = run_build(
        &PipelineConfig::builtin().unwrap(),
        workspace.path(),
        CiRefs::default(),
        MockRunner::python_ci(),
        MockVcs::new(),
    )
    .await;
    assert_eq!(result.status, ExecutionStatus::Completed);

    let published = result.published_dir();
    assert!(published.join("index.html").exists());

    let manifest: PublishManifest =
        serde_json::from_str(&std::fs::read_to_string(published.join("manifest.json")).unwrap())
            .unwrap();
    assert_eq!(manifest.build_id, result.context.build_id);
    assert_eq!(
        manifest.files,
        vec![
            "relevant-files.txt",
            "pytest.html",
            "combined.svg",
            "profile-diagram.svg",
            "pylint.json",
        ]
    );
    // pylint was skipped, so the converter never ran
    assert_eq!(manifest.missing, vec!["pylint.html"]);
}

#[tokio::test]
async fn test_workspace_reset_keeps_pip_cache() {
    let workspace = python_workspace();
    let vcs = MockVcs::new();

    run_build(
        &PipelineConfig::builtin().unwrap(),
        workspace.path(),
        CiRefs::default(),
        MockRunner::python_ci(),
        vcs.clone(),
    )
    .await;

    assert_eq!(
        vcs.cleans.lock().unwrap().clone(),
        vec![vec![".pip-cache".to_string(), ".pyci".to_string()]]
    );
    assert!(workspace.path().join("tests/unittests/output").is_dir());
}

#[tokio::test]
async fn test_old_report_sets_are_pruned() {
    let workspace = python_workspace();
    let config = PipelineConfig::builtin().unwrap();

    for _ in 0..3 {
        run_build(
            &config,
            workspace.path(),
            CiRefs::default(),
            MockRunner::python_ci(),
            MockVcs::new(),
        )
        .await;
    }

    // keep_artifacts: 1 keeps the current set plus one predecessor
    let sets = std::fs::read_dir(workspace.path().join(".pyci/reports"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .count();
    assert_eq!(sets, 2);
}

#[tokio::test]
async fn test_build_summary_is_recorded() {
    let workspace = python_workspace();
    let result = run_build(
        &PipelineConfig::builtin().unwrap(),
        workspace.path(),
        CiRefs::default(),
        MockRunner::python_ci(),
        MockVcs::new(),
    )
    .await;

    let store = InMemoryPersistence::new();
    let summary = create_summary(&result.pipeline, &result.context.build_id);
    store.save_build(&summary).await.unwrap();

    let loaded = store.load_build(&result.context.build_id).await.unwrap().unwrap();
    assert_eq!(loaded.pipeline_name, "python-ci");
    assert_eq!(loaded.status, ExecutionStatus::Completed);
    assert_eq!(loaded.total_stages, 5);
    let ids: Vec<&str> = loaded.stages.iter().map(|s| s.stage_id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["setup", "relevant-files", "provision", "pytest", "pylint", "publish"]
    );
    assert!(loaded.stages.last().unwrap().post);
}
