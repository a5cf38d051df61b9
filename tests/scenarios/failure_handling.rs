//! Fatal and non-fatal stage failures

use crate::helpers::*;
use pyci::core::config::PipelineConfig;
use pyci::core::{ExecutionStatus, StageState};
use pyci::execution::SchedulingStrategy;

#[tokio::test]
async fn test_failing_unit_tests_fail_the_build() {
    let workspace = python_workspace();
    let runner = MockRunner::python_ci().on(
        "pytest -v",
        Reply::exit(1)
            .stdout("1 failed, 2 passed")
            .writes("tests/unittests/output/pytest.html", "<html>failed</html>"),
    );

    let result = run_build(
        &PipelineConfig::builtin().unwrap(),
        workspace.path(),
        CiRefs::default(),
        runner,
        MockVcs::new(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_labels(&result, &[("pytest", "FAILURE"), ("publish", "SUCCESS")]);
    match result.state("pytest") {
        StageState::Failed { exit_code, tolerated, .. } => {
            assert_eq!(*exit_code, Some(1));
            assert!(!tolerated);
        }
        other => panic!("unexpected state {:?}", other),
    }

    // Missing artifacts are reported, the report that exists is published
    assert!(result
        .stage_log("pytest")
        .contains(&"missing artifact: combined.svg".to_string()));
    assert!(result.published_dir().join("pytest.html").exists());
}

#[tokio::test]
async fn test_provisioning_stops_at_first_failing_step() {
    let workspace = python_workspace();
    let runner = MockRunner::python_ci().on("-r requirements.txt", Reply::exit(1));

    let result = run_build(
        &PipelineConfig::builtin().unwrap(),
        workspace.path(),
        CiRefs::default(),
        runner.clone(),
        MockVcs::new(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_labels(
        &result,
        &[
            ("provision", "FAILURE"),
            ("pytest", "SKIPPED"),
            ("pylint", "SKIPPED"),
            ("publish", "SUCCESS"),
        ],
    );

    assert!(runner.called("mk-requires.sh"));
    assert!(!runner.called("test-requirements.txt"));
    assert!(!runner.called("import salt"));
    assert!(!runner.called("pytest"));
}

#[tokio::test]
async fn test_importable_forbidden_module_fails_provisioning() {
    let workspace = python_workspace();
    let runner = MockRunner::python_ci().on("import salt", Reply::ok());

    let result = run_build(
        &PipelineConfig::builtin().unwrap(),
        workspace.path(),
        CiRefs::default(),
        runner,
        MockVcs::new(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    match result.state("provision") {
        StageState::Failed { error, exit_code, .. } => {
            assert!(error.contains("salt"), "error was {}", error);
            assert_eq!(*exit_code, None);
        }
        other => panic!("unexpected state {:?}", other),
    }
    assert_labels(&result, &[("pytest", "SKIPPED"), ("publish", "SUCCESS")]);
}

#[tokio::test]
async fn test_provisioning_order_and_virtualenv_activation() {
    let workspace = python_workspace();
    let ws = workspace.path();
    let runner = MockRunner::python_ci();

    let result = run_build(
        &PipelineConfig::builtin().unwrap(),
        ws,
        CiRefs::default(),
        runner.clone(),
        MockVcs::new(),
    )
    .await;
    assert_eq!(result.status, ExecutionStatus::Completed);

    let venv = ws.join("venv");
    let venv_python = venv.join("bin/python").display().to_string();
    let expected = vec![
        "pyenv install --skip-existing 3.7.0".to_string(),
        "pyenv local 3.7.0".to_string(),
        format!(
            "python -m pip install --target {} virtualenv",
            ws.join(".pip-cache/tools").display()
        ),
        format!("python -m virtualenv {}", venv.display()),
        format!("{} -m pip install -U pip==19.3.1", venv_python),
        ws.join("mk-requires.sh").display().to_string(),
        format!("{} -m pip install -r requirements.txt", venv_python),
        format!("{} -m pip install -r test-requirements.txt", venv_python),
        format!("{} -m pip uninstall -y salt-ssh", venv_python),
        format!("{} -c 'import salt'", venv_python),
    ];
    let commands = runner.commands();
    assert_eq!(&commands[..expected.len()], expected.as_slice());

    let script = runner.find("mk-requires.sh").unwrap();
    assert_eq!(script.stdin.as_deref(), Some("n\n"));

    // Later stages run inside the virtualenv
    let pytest = runner.find("pytest -v").unwrap();
    assert_eq!(pytest.virtualenv, Some(venv.clone()));
    assert_eq!(result.context.virtualenv, Some(venv));
}

const CRASHING_LINT: &str = r#"
name: "crash"
stages:
  - id: "lint"
    continue_on_error: true
    shell: { commands: ["flaky-lint src"] }
  - id: "package"
    shell: { commands: ["make dist"] }
"#;

#[tokio::test]
async fn test_crashed_non_fatal_stage_does_not_halt_the_build() {
    let workspace = python_workspace();
    let runner = MockRunner::new().on("flaky-lint", Reply::crash());

    let result = run_build_with(
        &PipelineConfig::from_yaml(CRASHING_LINT).unwrap(),
        workspace.path(),
        CiRefs::default(),
        runner.clone(),
        MockVcs::new(),
        SchedulingStrategy::Sequential,
        None,
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_labels(&result, &[("lint", "FAILURE (tolerated)"), ("package", "SUCCESS")]);
    assert!(runner.called("make dist"));
}

#[tokio::test]
async fn test_crashed_fatal_stage_halts_the_build() {
    let workspace = python_workspace();
    let runner = MockRunner::new().on("flaky-lint", Reply::crash());
    let yaml = CRASHING_LINT.replace("    continue_on_error: true\n", "");

    let result = run_build_with(
        &PipelineConfig::from_yaml(&yaml).unwrap(),
        workspace.path(),
        CiRefs::default(),
        runner.clone(),
        MockVcs::new(),
        SchedulingStrategy::Sequential,
        None,
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_labels(&result, &[("lint", "FAILURE"), ("package", "SKIPPED")]);
    assert!(!runner.called("make dist"));
}
