//! Test utilities: a scripted command runner, a fake repository and a
//! harness that runs a whole build against them

#![allow(dead_code)]

use async_trait::async_trait;
use pyci::core::config::PipelineConfig;
use pyci::core::{BuildContext, ExecutionStatus, Pipeline, StageState};
use pyci::execution::runner::{CommandOutput, CommandRunner, RunnerError, ShellCommand};
use pyci::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use pyci::vcs::{Vcs, VcsError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// One command the runner was asked to run
#[derive(Debug, Clone)]
pub struct Call {
    pub command: String,
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    /// Virtualenv active in the context the command ran with
    pub virtualenv: Option<PathBuf>,
}

/// What a scripted command does
#[derive(Debug, Clone, Default)]
pub struct Reply {
    exit_code: i32,
    stdout: String,
    stderr: String,
    /// Files written relative to the workspace
    writes: Vec<(String, String)>,
    delay: Option<Duration>,
    /// Panic instead of returning, like a buggy tool wrapper
    crash: bool,
}

impl Reply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn writes(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.writes.push((path.into(), content.into()));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn crash() -> Self {
        Self {
            crash: true,
            ..Self::default()
        }
    }
}

/// Runner whose commands are matched against substrings of their display
/// form. The most recently added matching rule wins; unmatched commands
/// succeed silently.
#[derive(Clone, Default)]
pub struct MockRunner {
    rules: Arc<Mutex<Vec<(String, Reply)>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tools of the default Python pipeline behaving like a healthy project
    pub fn python_ci() -> Self {
        Self::new()
            .on(
                "import salt",
                Reply::exit(1).stderr("ModuleNotFoundError: No module named 'salt'"),
            )
            .on(
                "pytest -v",
                Reply::ok()
                    .stdout("3 passed")
                    .writes("tests/unittests/output/pytest.html", "<html>pytest</html>")
                    .writes("tests/unittests/output/combined.svg", "<svg/>")
                    .writes("tests/unittests/output/profile-diagram.svg", "<svg/>"),
            )
            .on("pylint --output-format=json", Reply::ok().stdout("[]"))
            .on(
                "pylint-json2html",
                Reply::ok().writes("tests/unittests/output/pylint.html", "<html>pylint</html>"),
            )
    }

    pub fn on(self, pattern: impl Into<String>, reply: Reply) -> Self {
        self.rules
            .lock()
            .unwrap()
            .insert(0, (pattern.into(), reply));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }

    pub fn find(&self, pattern: &str) -> Option<Call> {
        self.calls().into_iter().find(|c| c.command.contains(pattern))
    }

    pub fn called(&self, pattern: &str) -> bool {
        self.find(pattern).is_some()
    }

    /// Position of the first command containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        command: &ShellCommand,
        context: &BuildContext,
    ) -> Result<CommandOutput, RunnerError> {
        let display = command.display();
        self.calls.lock().unwrap().push(Call {
            command: display.clone(),
            program: command.program.clone(),
            args: command.args.clone(),
            stdin: command.stdin.clone(),
            virtualenv: context.virtualenv.clone(),
        });

        let reply = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| display.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_default();

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        if reply.crash {
            panic!("`{}` crashed", display);
        }

        for (path, content) in &reply.writes {
            let path = context.workspace.join(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, content).unwrap();
        }

        Ok(CommandOutput {
            exit_code: reply.exit_code,
            stdout: reply.stdout,
            stderr: reply.stderr,
            duration_ms: 0,
        })
    }
}

/// Repository double: fixed refs, history and diff
#[derive(Clone, Default)]
pub struct MockVcs {
    refs: HashMap<String, String>,
    decorated: Vec<String>,
    changed: Vec<String>,
    pub cleans: Arc<Mutex<Vec<Vec<String>>>>,
    pub diffs: Arc<Mutex<Vec<(String, String, Vec<String>)>>>,
}

impl MockVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ref(mut self, name: &str, commit: &str) -> Self {
        self.refs.insert(name.to_string(), commit.to_string());
        self
    }

    pub fn with_decorated(mut self, commits: &[&str]) -> Self {
        self.decorated = commits.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_changed(mut self, files: &[&str]) -> Self {
        self.changed = files.iter().map(|f| f.to_string()).collect();
        self
    }
}

#[async_trait]
impl Vcs for MockVcs {
    async fn rev_parse(&self, _workdir: &Path, rev: &str) -> Result<Option<String>, VcsError> {
        Ok(self.refs.get(rev).cloned())
    }

    async fn decorated_commits(&self, _workdir: &Path) -> Result<Vec<String>, VcsError> {
        Ok(self.decorated.clone())
    }

    async fn changed_files(
        &self,
        _workdir: &Path,
        lhs: &str,
        rhs: &str,
        paths: &[String],
    ) -> Result<Vec<String>, VcsError> {
        self.diffs
            .lock()
            .unwrap()
            .push((lhs.to_string(), rhs.to_string(), paths.to_vec()));
        Ok(self.changed.clone())
    }

    async fn clean(&self, _workdir: &Path, keep: &[String]) -> Result<(), VcsError> {
        self.cleans.lock().unwrap().push(keep.to_vec());
        Ok(())
    }
}

/// A checkout with a few Python sources under `hubblestack/`
pub fn python_workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in [
        ("hubblestack/__init__.py", ""),
        ("hubblestack/audit/grep.py", "def grep():\n    pass\n"),
        ("hubblestack/files/stat.py", "import os\n"),
        ("hubblestack/README.md", "# hubble\n"),
        ("tests/unittests/test_grep.py", "def test_grep():\n    pass\n"),
        ("requirements.txt", "pyyaml\n"),
    ] {
        let path = dir.path().join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
    dir
}

/// Branch names as the CI host would hand them over
#[derive(Debug, Clone, Copy, Default)]
pub struct CiRefs<'a> {
    pub change_target: Option<&'a str>,
    pub branch_name: Option<&'a str>,
}

impl<'a> CiRefs<'a> {
    pub fn pull_request(change_target: &'a str, branch_name: &'a str) -> Self {
        Self {
            change_target: Some(change_target),
            branch_name: Some(branch_name),
        }
    }
}

/// Everything a finished build left behind
pub struct BuildResult {
    pub pipeline: Pipeline,
    pub context: BuildContext,
    pub status: ExecutionStatus,
    pub events: Vec<ExecutionEvent>,
}

impl BuildResult {
    pub fn state(&self, stage_id: &str) -> &StageState {
        &self
            .pipeline
            .stage(stage_id)
            .unwrap_or_else(|| panic!("Stage '{}' not found", stage_id))
            .state
    }

    pub fn label(&self, stage_id: &str) -> &'static str {
        self.state(stage_id).label()
    }

    /// Log lines a stage reported
    pub fn stage_log(&self, stage_id: &str) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::StageOutput { stage_id: id, lines } if id == stage_id => {
                    Some(lines.clone())
                }
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Read a file relative to the workspace
    pub fn read(&self, path: &str) -> String {
        std::fs::read_to_string(self.context.workspace.join(path))
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", path, e))
    }

    pub fn published_dir(&self) -> PathBuf {
        self.context
            .workspace
            .join(".pyci/reports")
            .join(&self.context.build_id)
    }
}

/// Run `config` in `workspace` with scripted tools
pub async fn run_build(
    config: &PipelineConfig,
    workspace: &Path,
    refs: CiRefs<'_>,
    runner: MockRunner,
    vcs: MockVcs,
) -> BuildResult {
    run_build_with(config, workspace, refs, runner, vcs, SchedulingStrategy::Parallel, None).await
}

pub async fn run_build_with(
    config: &PipelineConfig,
    workspace: &Path,
    refs: CiRefs<'_>,
    runner: MockRunner,
    vcs: MockVcs,
    strategy: SchedulingStrategy,
    cancel: Option<watch::Receiver<bool>>,
) -> BuildResult {
    let mut pipeline = config.to_pipeline();
    let mut context = pipeline.create_context(workspace).with_ci_refs(
        refs.change_target.map(str::to_string),
        refs.branch_name.map(str::to_string),
    );

    let mut engine = ExecutionEngine::new(runner, Arc::new(vcs), strategy);
    if let Some(cancel) = cancel {
        engine = engine.with_cancellation(cancel);
    }

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let status = engine
        .execute(&mut pipeline, &mut context)
        .await
        .expect("engine error");

    let events = events.lock().unwrap().clone();
    BuildResult {
        pipeline,
        context,
        status,
        events,
    }
}

/// Assert the result label of every listed stage
pub fn assert_labels(result: &BuildResult, expected: &[(&str, &str)]) {
    for (stage_id, label) in expected {
        assert_eq!(
            result.label(stage_id),
            *label,
            "stage '{}' ended as {:?}",
            stage_id,
            result.state(stage_id)
        );
    }
}
