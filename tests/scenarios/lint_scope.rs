//! Relevant files decide what gets linted

use crate::helpers::*;
use pyci::core::config::PipelineConfig;
use pyci::core::ExecutionStatus;
use pyci::execution::SchedulingStrategy;

const FINDINGS: &str = r#"[
  {"type": "convention", "module": "hubblestack.audit.grep", "path": "hubblestack/audit/grep.py", "symbol": "missing-docstring"},
  {"type": "warning", "module": "hubblestack.files.stat", "path": "hubblestack/files/stat.py", "symbol": "unused-import"},
  {"type": "convention", "module": "hubblestack", "path": "hubblestack/__init__.py", "symbol": "empty-docstring"}
]"#;

fn pull_request_vcs() -> MockVcs {
    MockVcs::new()
        .with_ref("origin/develop", "base111")
        .with_ref("origin/PR-7", "tip999")
        .with_changed(&[
            "hubblestack/audit/grep.py",
            "hubblestack/files/stat.py",
            "hubblestack/__init__.py",
        ])
}

#[tokio::test]
async fn test_three_changed_files_are_linted_and_findings_tolerated() {
    let workspace = python_workspace();
    let runner = MockRunner::python_ci()
        .on("pylint --output-format=json", Reply::exit(20).stdout(FINDINGS));
    let vcs = pull_request_vcs();

    let result = run_build(
        &PipelineConfig::builtin().unwrap(),
        workspace.path(),
        CiRefs::pull_request("develop", "PR-7"),
        runner.clone(),
        vcs.clone(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_labels(
        &result,
        &[
            ("setup", "SUCCESS"),
            ("relevant-files", "SUCCESS"),
            ("provision", "SUCCESS"),
            ("pytest", "SUCCESS"),
            ("pylint", "FAILURE (tolerated)"),
            ("publish", "SUCCESS"),
        ],
    );

    // The diff covers both resolved commits and only candidate files
    let diffs = vcs.diffs.lock().unwrap().clone();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].0, "base111");
    assert_eq!(diffs[0].1, "tip999");
    assert_eq!(
        diffs[0].2,
        vec![
            "hubblestack/__init__.py",
            "hubblestack/audit/grep.py",
            "hubblestack/files/stat.py",
        ]
    );

    assert_eq!(
        result.read("tests/unittests/output/relevant-files.txt"),
        "hubblestack/audit/grep.py\nhubblestack/files/stat.py\nhubblestack/__init__.py\n"
    );

    let lint = runner.find("pylint --output-format=json").unwrap();
    assert_eq!(
        lint.args,
        vec![
            "--output-format=json",
            "hubblestack/audit/grep.py",
            "hubblestack/files/stat.py",
            "hubblestack/__init__.py",
        ]
    );

    let report: serde_json::Value =
        serde_json::from_str(&result.read("tests/unittests/output/pylint.json")).unwrap();
    assert_eq!(report.as_array().unwrap().len(), 3);

    // The HTML report is produced even though lint failed
    assert!(runner.called("pylint-json2html"));
    assert!(result.published_dir().join("pylint.html").exists());

    let log = result.stage_log("relevant-files");
    assert!(log.contains(&"LHS=base111 (remote-tracking)".to_string()));
    assert!(log.contains(&"RHS=tip999 (remote-tracking)".to_string()));
}

#[tokio::test]
async fn test_single_commit_without_ci_refs_skips_pylint() {
    let workspace = python_workspace();
    let runner = MockRunner::python_ci();
    let vcs = MockVcs::new()
        .with_decorated(&["only000"])
        .with_changed(&["hubblestack/audit/grep.py"]);

    let result = run_build(
        &PipelineConfig::builtin().unwrap(),
        workspace.path(),
        CiRefs::default(),
        runner.clone(),
        vcs.clone(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_labels(
        &result,
        &[("pylint", "SKIPPED"), ("pytest", "SUCCESS"), ("publish", "SUCCESS")],
    );

    assert!(vcs.diffs.lock().unwrap().is_empty());
    assert_eq!(result.read("tests/unittests/output/relevant-files.txt"), "");
    assert_eq!(result.read("tests/unittests/output/pylint.json"), "[]");
    assert!(result.stage_log("pylint").contains(&"SKIPPING PYLINT".to_string()));
    assert!(result.stage_log("relevant-files").contains(&"LHS=null".to_string()));

    assert!(!runner.called("pylint --output-format=json"));
    assert!(!runner.called("pylint-json2html"));
}

#[tokio::test]
async fn test_unknown_remote_branches_fall_back_to_literal_names() {
    let workspace = python_workspace();
    let vcs = MockVcs::new().with_changed(&["hubblestack/files/stat.py"]);

    let result = run_build(
        &PipelineConfig::builtin().unwrap(),
        workspace.path(),
        CiRefs::pull_request("develop", "PR-7"),
        MockRunner::python_ci(),
        vcs.clone(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    let diffs = vcs.diffs.lock().unwrap().clone();
    assert_eq!((diffs[0].0.as_str(), diffs[0].1.as_str()), ("develop", "PR-7"));
    assert_eq!(
        result.read("tests/unittests/output/relevant-files.txt"),
        "hubblestack/files/stat.py\n"
    );
}

#[tokio::test]
async fn test_sequential_strategy_runs_tests_before_lint() {
    let workspace = python_workspace();
    let runner = MockRunner::python_ci();

    let result = run_build_with(
        &PipelineConfig::builtin().unwrap(),
        workspace.path(),
        CiRefs::pull_request("develop", "PR-7"),
        runner.clone(),
        pull_request_vcs(),
        SchedulingStrategy::Sequential,
        None,
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    let pytest = runner.position("pytest -v").unwrap();
    let pylint = runner.position("pylint --output-format=json").unwrap();
    assert!(pytest < pylint);
}
