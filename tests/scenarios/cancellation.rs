//! Aborting a running build

use crate::helpers::*;
use pyci::core::config::PipelineConfig;
use pyci::core::{ExecutionStatus, StageState};
use pyci::execution::SchedulingStrategy;
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[tokio::test]
async fn test_cancel_aborts_running_stages_and_still_publishes() {
    let workspace = python_workspace();
    let runner = MockRunner::python_ci().on(
        "pytest -v",
        Reply::ok().delay(Duration::from_secs(30)),
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = cancel_tx.send(true);
    });

    let started = Instant::now();
    let result = run_build_with(
        &PipelineConfig::builtin().unwrap(),
        workspace.path(),
        CiRefs::default(),
        runner,
        MockVcs::new(),
        SchedulingStrategy::Parallel,
        Some(cancel_rx),
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert_labels(
        &result,
        &[
            ("provision", "SUCCESS"),
            ("pytest", "ABORTED"),
            ("pylint", "SKIPPED"),
            ("publish", "SUCCESS"),
        ],
    );
    assert!(matches!(
        result.state("pytest"),
        StageState::Cancelled { reason } if reason == "Build cancelled"
    ));
}

#[tokio::test]
async fn test_global_timeout_cancels_build() {
    let yaml = r#"
name: "slow"
timeout_minutes: 0
stages:
  - id: "slow"
    shell: { commands: ["sleep 30"] }
"#;
    // A zero-minute limit expires immediately
    let workspace = python_workspace();
    let runner = MockRunner::new().on("sleep 30", Reply::ok().delay(Duration::from_secs(30)));

    let result = run_build(
        &PipelineConfig::from_yaml(yaml).unwrap(),
        workspace.path(),
        CiRefs::default(),
        runner,
        MockVcs::new(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert_labels(&result, &[("slow", "ABORTED")]);
}
